//! Common test utilities for integration tests.
//!
//! Provides:
//! - `MockBackend` - a tiny hyper server standing in for a replica
//! - `TestLb` - a load balancer on an ephemeral port with a reqwest client
//! - helpers for building configs and services in code
//!
//! # Example
//!
//! ```rust,ignore
//! #[tokio::test]
//! async fn test_route() {
//!     let backend = MockBackend::start("a").await;
//!     let lb = TestLb::start(config_with(&[service("api", "/api", 0)])).await;
//!     lb.add_backend("api", backend.port());
//!
//!     let resp = lb.get("/api/x").await.unwrap();
//!     assert_eq!(resp.headers()["x-backend"], "a");
//! }
//! ```

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use simlocal::config::{Config, Service};
use simlocal::lb::{LoadBalancer, RouteTable};

/// Delay applied by a mock backend to requests under `/slow`.
pub const SLOW_DELAY: Duration = Duration::from_millis(400);

/// Pause between the two chunks of `/stream`.
pub const STREAM_GAP: Duration = Duration::from_secs(2);

/// `Content-Length` a mock backend declares for `HEAD` requests.
pub const HEAD_LENGTH: usize = 5;

type MockBody = UnsyncBoxBody<Bytes, Infallible>;

/// A mock replica on an ephemeral port.
///
/// Every response carries:
/// - `x-backend`: the backend id
/// - `x-path`: the path and query the backend received
/// - `x-seen-forwarded-for`: the `X-Forwarded-For` it received
/// - `x-seen-connection`: the `Connection` header it received, if any
/// - `x-seen-host`: the `Host` header it received
/// - `x-body-len`: the request body size
///
/// and echoes the request body. `/redirect` answers 302, `/slow` sleeps
/// [`SLOW_DELAY`] first, `/stream` sends two chunks [`STREAM_GAP`] apart,
/// and `HEAD` answers with an empty body declaring [`HEAD_LENGTH`] bytes.
pub struct MockBackend {
    addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl MockBackend {
    pub async fn start(id: &'static str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock backend");
        let addr = listener.local_addr().expect("mock backend addr");

        let handle = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let io = TokioIo::new(stream);
                tokio::spawn(async move {
                    let service = service_fn(move |req| respond(id, req));
                    let _ = http1::Builder::new().serve_connection(io, service).await;
                });
            }
        });

        Self { addr, handle }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn respond(
    id: &'static str,
    req: Request<Incoming>,
) -> Result<Response<MockBody>, Infallible> {
    let path = req
        .uri()
        .path_and_query()
        .map_or_else(|| "/".to_string(), ToString::to_string);
    let header = |name: &str| {
        req.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string()
    };
    let forwarded_for = header("x-forwarded-for");
    let connection = header("connection");
    let host = header("host");
    let is_head = req.method() == Method::HEAD;

    if req.uri().path() == "/slow" {
        tokio::time::sleep(SLOW_DELAY).await;
    }

    let status = if req.uri().path() == "/redirect" {
        StatusCode::FOUND
    } else {
        StatusCode::OK
    };
    let is_stream = req.uri().path() == "/stream";
    let body = req
        .into_body()
        .collect()
        .await
        .map(|c| c.to_bytes())
        .unwrap_or_default();

    let mut response = Response::builder()
        .status(status)
        .header("x-backend", id)
        .header("x-path", path)
        .header("x-seen-forwarded-for", forwarded_for)
        .header("x-seen-connection", connection)
        .header("x-seen-host", host)
        .header("x-body-len", body.len().to_string())
        .header("location", "/elsewhere");

    let body = if is_head {
        response = response.header("content-length", HEAD_LENGTH.to_string());
        full(Bytes::new())
    } else if is_stream {
        // First chunk now, second only after STREAM_GAP.
        let chunks = futures::stream::unfold(0u8, |step| async move {
            match step {
                0 => Some((Ok::<_, Infallible>(Frame::data(Bytes::from_static(b"first\n"))), 1)),
                1 => {
                    tokio::time::sleep(STREAM_GAP).await;
                    Some((Ok(Frame::data(Bytes::from_static(b"second\n"))), 2))
                },
                _ => None,
            }
        });
        StreamBody::new(chunks).boxed_unsync()
    } else {
        full(body)
    };

    Ok(response.body(body).expect("valid mock response"))
}

fn full(bytes: Bytes) -> MockBody {
    Full::new(bytes).map_err(|never| match never {}).boxed_unsync()
}

/// A port nothing is listening on.
pub fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind probe");
    listener.local_addr().expect("probe addr").port()
}

/// A service definition with no replicas, for pools filled by hand.
pub fn service(name: &str, prefix: &str, replicas: usize) -> Service {
    Service {
        name: name.to_string(),
        path: "/bin/true".to_string(),
        args: Vec::new(),
        start_port: 30_000,
        end_port: 30_010,
        replicas,
        route_prefix: prefix.to_string(),
        env: BTreeMap::new(),
    }
}

/// A config holding the given services, keyed by name.
pub fn config_with(services: &[Service]) -> Config {
    let mut config = Config::default();
    for svc in services {
        config.services.insert(svc.name.clone(), svc.clone());
    }
    config
}

/// A load balancer serving on `127.0.0.1:0`.
pub struct TestLb {
    addr: SocketAddr,
    routes: std::sync::Arc<RouteTable>,
    cancel: CancellationToken,
    handle: Option<JoinHandle<simlocal::Result<()>>>,
    client: reqwest::Client,
}

impl TestLb {
    pub async fn start(config: Config) -> Self {
        let lb = LoadBalancer::from_config(&config)
            .expect("build load balancer")
            .listen("127.0.0.1:0".parse().expect("addr"));
        let routes = lb.routes().clone();
        let listening = lb.bind().await.expect("bind load balancer");
        let addr = listening.local_addr();

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(listening.serve(cancel.clone()));

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .build()
            .expect("build client");

        Self {
            addr,
            routes,
            cancel,
            handle: Some(handle),
            client,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Add a backend port to a service's pool.
    pub fn add_backend(&self, service: &str, port: u16) {
        let pool = self.routes.pool(service).expect("service is routed");
        pool.insert(port);
    }

    pub async fn get(&self, path: &str) -> reqwest::Result<reqwest::Response> {
        self.client.get(self.url(path)).send().await
    }

    /// Cancel the load balancer and wait for it to finish draining.
    pub async fn shutdown(mut self) -> simlocal::Result<()> {
        self.cancel.cancel();
        let handle = self.handle.take().expect("not yet shut down");
        tokio::time::timeout(Duration::from_secs(10), handle)
            .await
            .expect("load balancer drained in time")
            .expect("load balancer task did not panic")
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Drop for TestLb {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
