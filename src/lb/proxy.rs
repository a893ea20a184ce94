//! Request forwarding.
//!
//! [`Proxy`] resolves the route for a request, picks a backend of that
//! service in round-robin order and forwards the request over a shared,
//! pooled HTTP client. It does not bind any socket; the
//! [`LoadBalancer`](super::server::LoadBalancer) feeds it connections.
//!
//! Bodies are streamed in both directions and never buffered, so uploads of
//! any size and long-lived responses (SSE, chunked downloads) pass through
//! as they arrive. End-to-end headers, including `Host` and
//! `Content-Length`, are kept; only hop-by-hop headers are dropped.
//!
//! # Response codes
//!
//! | Situation                         | Status |
//! |-----------------------------------|--------|
//! | No route prefix matches           | 404    |
//! | Matching service has no backends  | 503    |
//! | Backend unreachable / broken      | 502    |
//! | Otherwise                         | backend's status |

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use hyper::header::{self, HeaderMap, HeaderName, HeaderValue};
use hyper::{Request, Response, StatusCode};
use tracing::{debug, error, warn};

use super::router::RouteTable;
use crate::constants;
use crate::error::{Error, Result};

/// Boxed error carried by streamed bodies.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Response body produced by the proxy: either a short local message or the
/// backend's body, streamed.
pub type ProxyBody = UnsyncBoxBody<Bytes, BoxError>;

/// Headers that describe a single connection and are never forwarded.
static HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// Remove hop-by-hop headers, including any listed in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
}

/// Append the client address to `X-Forwarded-For`.
fn append_forwarded_for(headers: &mut HeaderMap, remote: SocketAddr) {
    let client = remote.ip().to_string();
    let value = match headers.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        Some(prior) if !prior.is_empty() => format!("{prior}, {client}"),
        _ => client,
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(X_FORWARDED_FOR, value);
    }
}

/// Plain-text response with the given status.
pub fn text_response(status: StatusCode, body: &'static str) -> Response<ProxyBody> {
    let body = Full::new(Bytes::from_static(body.as_bytes()))
        .map_err(|never| match never {})
        .boxed_unsync();
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

/// Core forwarding logic shared by all connections.
#[derive(Debug)]
pub struct Proxy {
    routes: Arc<RouteTable>,
    client: reqwest::Client,
}

impl Proxy {
    /// Create a proxy over `routes`.
    ///
    /// The client never follows redirects and ignores proxy environment
    /// variables. `request_timeout` bounds each forwarded request, body
    /// included; `None` means no limit.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HttpClient`] if the HTTP client cannot be created.
    pub fn new(routes: Arc<RouteTable>, request_timeout: Option<Duration>) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .pool_max_idle_per_host(constants::POOL_MAX_IDLE_PER_HOST);
        if let Some(timeout) = request_timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(Error::HttpClient)?;

        Ok(Self { routes, client })
    }

    /// The routing table.
    pub fn routes(&self) -> &Arc<RouteTable> {
        &self.routes
    }

    /// Route and forward one request.
    ///
    /// The response head is returned as soon as the backend sends it; the
    /// body follows as the backend produces it.
    pub async fn forward<B>(&self, req: Request<B>, remote: SocketAddr) -> Response<ProxyBody>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let start = Instant::now();
        let (parts, body) = req.into_parts();
        let path = parts.uri.path();

        let Some(route) = self.routes.resolve(path) else {
            debug!(path = %path, "No route matched");
            return text_response(StatusCode::NOT_FOUND, "404 page not found\n");
        };
        let pool = route.pool;
        let Some(backend) = pool.next() else {
            warn!(service = %pool.service(), path = %path, "No backends available");
            return text_response(StatusCode::SERVICE_UNAVAILABLE, "Service unavailable\n");
        };

        let url = match parts.uri.query() {
            Some(query) => format!("{}{}?{query}", backend.target(), route.path),
            None => format!("{}{}", backend.target(), route.path),
        };

        // Host and Content-Length stay: the backend sees the client's Host,
        // and a streamed body keeps its declared length.
        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);
        append_forwarded_for(&mut headers, remote);

        let mut request = self
            .client
            .request(parts.method.clone(), &url)
            .headers(headers);
        if !body.is_end_stream() {
            request = request.body(reqwest::Body::wrap_stream(body.into_data_stream()));
        }

        let upstream = match request.send().await {
            Ok(upstream) => upstream,
            Err(e) => {
                error!(
                    service = %pool.service(),
                    backend = %backend,
                    error = %e,
                    "Backend request failed"
                );
                return text_response(StatusCode::BAD_GATEWAY, "Bad Gateway\n");
            },
        };

        debug!(
            method = %parts.method,
            service = %pool.service(),
            backend = %backend,
            status = upstream.status().as_u16(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Response headers received"
        );

        let upstream: Response<reqwest::Body> = upstream.into();
        let (mut head, body) = upstream.into_parts();
        strip_hop_by_hop(&mut head.headers);

        Response::from_parts(head, body.map_err(BoxError::from).boxed_unsync())
    }
}
