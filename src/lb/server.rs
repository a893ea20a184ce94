//! Network serving for the load balancer.
//!
//! [`LoadBalancer`] wraps a [`Proxy`] and binds it to a TCP listener. Every
//! accepted connection is served by its own task over HTTP/1.1. Cancelling
//! the token passed to [`Listening::serve`] stops accepting, asks open
//! connections to close after their current request, and waits for them
//! (bounded by the optional drain timeout).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use hyper_util::server::graceful::GracefulShutdown;
use tokio::net::TcpListener;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::proxy::Proxy;
use super::router::RouteTable;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::supervisor::ReplicaEvent;

/// Routing load balancer, not yet bound.
#[derive(Debug)]
pub struct LoadBalancer {
    proxy: Arc<Proxy>,
    addr: SocketAddr,
    drain_timeout: Option<Duration>,
}

impl LoadBalancer {
    /// Build pools and the forwarding client from the config.
    ///
    /// Listens on `0.0.0.0:{lb_port}` unless overridden with
    /// [`listen`](Self::listen).
    ///
    /// # Errors
    ///
    /// Returns [`Error::HttpClient`] if the forwarding client cannot be built.
    pub fn from_config(config: &Config) -> Result<Self> {
        let routes = Arc::new(RouteTable::from_config(config));
        let proxy = Proxy::new(routes, config.request_timeout_secs.map(Duration::from_secs))?;

        Ok(Self {
            proxy: Arc::new(proxy),
            addr: SocketAddr::from(([0, 0, 0, 0], config.lb_port)),
            drain_timeout: config.drain_timeout_secs.map(Duration::from_secs),
        })
    }

    /// Override the listen address.
    #[must_use]
    pub fn listen(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    /// Listen address.
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// The routing table.
    pub fn routes(&self) -> &Arc<RouteTable> {
        self.proxy.routes()
    }

    /// Keep the backend pools in step with supervisor membership events
    /// until `cancel` fires or the supervisor goes away.
    pub fn follow_membership(
        &self,
        events: broadcast::Receiver<ReplicaEvent>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(follow_events(self.routes().clone(), events, cancel))
    }

    /// Bind the listener.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Bind`] if the address cannot be bound.
    pub async fn bind(self) -> Result<Listening> {
        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(|source| Error::Bind {
                addr: self.addr,
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| Error::io("reading load balancer address", e))?;

        Ok(Listening {
            listener,
            local_addr,
            proxy: self.proxy,
            drain_timeout: self.drain_timeout,
        })
    }

    /// Build, bind and serve until `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns an error if the client cannot be built, the address cannot be
    /// bound, or accepting connections fails.
    pub async fn start(config: &Config, cancel: CancellationToken) -> Result<()> {
        Self::from_config(config)?.bind().await?.serve(cancel).await
    }
}

/// A bound load balancer.
#[derive(Debug)]
pub struct Listening {
    listener: TcpListener,
    local_addr: SocketAddr,
    proxy: Arc<Proxy>,
    drain_timeout: Option<Duration>,
}

impl Listening {
    /// The address actually bound (useful with port 0).
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve connections until `cancel` fires, then drain.
    ///
    /// Cancellation is a normal shutdown and returns `Ok(())`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if accepting connections fails.
    pub async fn serve(self, cancel: CancellationToken) -> Result<()> {
        info!(addr = %self.local_addr, "Load balancer listening");
        for pool in self.proxy.routes().pools() {
            info!(
                service = %pool.service(),
                prefix = %pool.prefix(),
                backends = pool.len(),
                "Route"
            );
        }

        let graceful = GracefulShutdown::new();

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, remote_addr) = accepted
                        .map_err(|e| Error::io("accepting load balancer connection", e))?;
                    let io = TokioIo::new(stream);
                    let proxy = self.proxy.clone();

                    let service = service_fn(move |req: hyper::Request<Incoming>| {
                        let proxy = proxy.clone();
                        async move { Ok::<_, std::convert::Infallible>(proxy.forward(req, remote_addr).await) }
                    });
                    let conn = graceful.watch(http1::Builder::new().serve_connection(io, service));

                    tokio::spawn(async move {
                        if let Err(e) = conn.await {
                            if !e.is_incomplete_message() {
                                debug!(remote = %remote_addr, error = %e, "Connection error");
                            }
                        }
                    });
                }

                () = cancel.cancelled() => {
                    break;
                }
            }
        }

        info!("Load balancer shutting down");
        drop(self.listener);

        match self.drain_timeout {
            Some(timeout) => {
                if tokio::time::timeout(timeout, graceful.shutdown()).await.is_ok() {
                    info!("All connections completed gracefully");
                } else {
                    warn!(timeout = ?timeout, "Drain timeout, abandoning open connections");
                }
            },
            None => {
                graceful.shutdown().await;
                info!("All connections completed gracefully");
            },
        }

        Ok(())
    }
}

async fn follow_events(
    routes: Arc<RouteTable>,
    mut events: broadcast::Receiver<ReplicaEvent>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            event = events.recv() => match event {
                Ok(event) => routes.apply(&event),
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed = missed, "Missed replica membership events");
                },
                Err(RecvError::Closed) => break,
            },
        }
    }
    debug!("Stopped following replica membership");
}
