//! Minimal replica for trying simlocal out.
//!
//! Listens on `$PORT` and answers `GET /health` with `OK on port {PORT}`;
//! every other path is a 404. Point a service at this binary to see the
//! load balancer rotate between replicas:
//!
//! ```toml
//! [services.demo]
//! path = "./target/debug/simlocal-demo"
//! start_port = 9000
//! end_port = 9010
//! replicas = 2
//! route_prefix = "/demo"
//! ```

use std::convert::Infallible;
use std::net::SocketAddr;

use anyhow::{Context, Result};
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{debug, info};

use simlocal::constants;
use simlocal::logging::{LogConfig, init_logging};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging(&LogConfig::default());

    let port: u16 = std::env::var(constants::PORT_ENV)
        .context("PORT is not set")?
        .parse()
        .context("PORT is not a valid port")?;

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(port = port, "Demo service is starting");

    loop {
        let (stream, remote) = listener.accept().await.context("Accept failed")?;
        tokio::spawn(async move {
            let service = service_fn(move |req| respond(port, req));
            if let Err(e) = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                debug!(remote = %remote, error = %e, "Connection error");
            }
        });
    }
}

async fn respond(port: u16, req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    let (status, body) = if req.uri().path() == "/health" {
        (StatusCode::OK, format!("OK on port {port}"))
    } else {
        (StatusCode::NOT_FOUND, "404 page not found\n".to_string())
    };

    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    Ok(response)
}
