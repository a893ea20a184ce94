//! Routing load balancer.
//!
//! An HTTP/1.1 reverse proxy that maps path prefixes to services and spreads
//! requests over each service's replicas in round-robin order.
//!
//! # Architecture
//!
//! ```text
//! LoadBalancer ──bind──> Listening ──accept──> Proxy::forward
//!                                                 │
//!                       RouteTable::resolve <─────┘
//!                                │
//!                       ServicePool::next (RoundRobin)
//! ```
//!
//! # Example
//!
//! ```no_run
//! use simlocal::config::Config;
//! use simlocal::lb::LoadBalancer;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run(config: Config) -> simlocal::error::Result<()> {
//! let cancel = CancellationToken::new();
//! LoadBalancer::start(&config, cancel).await?;
//! # Ok(())
//! # }
//! ```

mod backend;
mod proxy;
mod router;
mod selection;
mod server;

pub use backend::{Backend, ServicePool};
pub use proxy::{BoxError, Proxy, ProxyBody, strip_hop_by_hop};
pub use router::{Route, RouteTable, strip_prefix};
pub use selection::RoundRobin;
pub use server::{Listening, LoadBalancer};
