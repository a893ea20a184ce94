//! Prefix routing.
//!
//! Each service claims one route prefix. A request path matches prefix `p`
//! when it equals `p` or continues with `/` after it; the longest matching
//! prefix wins. The prefix is stripped before forwarding.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use super::backend::ServicePool;
use crate::config::Config;
use crate::supervisor::ReplicaEvent;

/// Strip `prefix` from `path`, returning the remainder to forward.
///
/// Returns `None` when `path` is not under `prefix`. An empty remainder
/// becomes `/`. `prefix` must be normalized (see
/// [`Service::normalized_prefix`](crate::config::Service::normalized_prefix)).
pub fn strip_prefix<'a>(prefix: &str, path: &'a str) -> Option<&'a str> {
    if prefix == "/" {
        return path.starts_with('/').then_some(path);
    }
    let rest = path.strip_prefix(prefix)?;
    if rest.is_empty() {
        Some("/")
    } else if rest.starts_with('/') {
        Some(rest)
    } else {
        None
    }
}

/// A resolved route: the pool to use and the path to forward.
#[derive(Debug)]
pub struct Route<'a> {
    pub pool: &'a Arc<ServicePool>,
    pub path: &'a str,
}

/// All service pools, ordered for longest-prefix matching.
#[derive(Debug, Default)]
pub struct RouteTable {
    /// Sorted by prefix length, longest first.
    pools: Vec<Arc<ServicePool>>,
    by_service: HashMap<String, Arc<ServicePool>>,
}

impl RouteTable {
    /// Build one pool per service, visiting services in name order.
    ///
    /// A service whose prefix is already claimed by an earlier service is
    /// skipped with a warning.
    pub fn from_config(config: &Config) -> Self {
        let mut table = Self::default();

        for service in config.services_in_order() {
            let prefix = service.normalized_prefix();
            if let Some(owner) = table.pools.iter().find(|p| p.prefix() == prefix) {
                warn!(
                    service = %service.name,
                    prefix = %prefix,
                    owner = %owner.service(),
                    "Route prefix already registered, skipping service"
                );
                continue;
            }

            let ports = (0..service.replicas).filter_map(|i| service.port_for(i));
            let pool = ServicePool::new(&service.name, prefix, ports);
            info!(
                service = %service.name,
                prefix = %prefix,
                replicas = pool.len(),
                "Registered service"
            );
            table.insert(Arc::new(pool));
        }

        table
    }

    fn insert(&mut self, pool: Arc<ServicePool>) {
        self.by_service
            .insert(pool.service().to_string(), pool.clone());
        self.pools.push(pool);
        // Stable: equal lengths keep registration order.
        self.pools
            .sort_by(|a, b| b.prefix().len().cmp(&a.prefix().len()));
    }

    /// Find the pool for a request path.
    pub fn resolve<'a>(&'a self, path: &'a str) -> Option<Route<'a>> {
        self.pools.iter().find_map(|pool| {
            strip_prefix(pool.prefix(), path).map(|rest| Route { pool, path: rest })
        })
    }

    /// Pool registered for a service, if any.
    pub fn pool(&self, service: &str) -> Option<&Arc<ServicePool>> {
        self.by_service.get(service)
    }

    /// All pools, longest prefix first.
    pub fn pools(&self) -> &[Arc<ServicePool>] {
        &self.pools
    }

    /// Update pool membership from a supervisor event.
    ///
    /// `Started` adds the replica's backend and `Stopped` removes it. Replicas
    /// that exit on their own stay in the pool.
    pub fn apply(&self, event: &ReplicaEvent) {
        match event {
            ReplicaEvent::Started {
                service,
                name,
                port,
            } => {
                if let Some(pool) = self.pool(service) {
                    if pool.insert(*port) {
                        info!(service = %service, replica = %name, port = port, "Backend added");
                    }
                }
            },
            ReplicaEvent::Stopped {
                service,
                name,
                port,
            } => {
                if let Some(pool) = self.pool(service) {
                    if pool.remove(*port) {
                        info!(service = %service, replica = %name, port = port, "Backend removed");
                    }
                }
            },
            ReplicaEvent::Exited { .. } => {},
        }
    }
}
