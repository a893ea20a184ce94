//! Backends and per-service backend pools.
//!
//! A [`ServicePool`] holds the backends of one service as a copy-on-write
//! snapshot: request handling clones the `Arc` under a short read lock and
//! works on that snapshot, while membership changes build a new vector and
//! swap it in.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use super::selection::RoundRobin;
use crate::constants;

/// One replica endpoint, addressed over loopback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backend {
    port: u16,
    /// Base URL without trailing slash, e.g. `http://localhost:9000`.
    target: String,
}

impl Backend {
    /// Backend for a replica listening on `port`.
    pub fn new(port: u16) -> Self {
        Self {
            port,
            target: format!("http://{}:{port}", constants::BACKEND_HOST),
        }
    }

    /// Replica port.
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Base URL requests are forwarded to.
    pub fn target(&self) -> &str {
        &self.target
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.target)
    }
}

/// The backends of one service plus its rotation counter.
#[derive(Debug)]
pub struct ServicePool {
    service: String,
    prefix: String,
    backends: RwLock<Arc<Vec<Backend>>>,
    selector: RoundRobin,
}

impl ServicePool {
    /// Create a pool with backends for the given ports, in order.
    pub fn new(
        service: impl Into<String>,
        prefix: impl Into<String>,
        ports: impl IntoIterator<Item = u16>,
    ) -> Self {
        Self {
            service: service.into(),
            prefix: prefix.into(),
            backends: RwLock::new(Arc::new(ports.into_iter().map(Backend::new).collect())),
            selector: RoundRobin::new(),
        }
    }

    /// Owning service name.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Normalized route prefix (no trailing slash, except the root `/`).
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Current backend snapshot.
    pub fn snapshot(&self) -> Arc<Vec<Backend>> {
        self.backends.read().clone()
    }

    /// Number of backends.
    pub fn len(&self) -> usize {
        self.backends.read().len()
    }

    /// True when the pool has no backends.
    pub fn is_empty(&self) -> bool {
        self.backends.read().is_empty()
    }

    /// Select the next backend in rotation.
    pub fn next(&self) -> Option<Backend> {
        let backends = self.snapshot();
        self.selector
            .select(backends.len())
            .map(|idx| backends[idx].clone())
    }

    /// Add a backend for `port` unless one is already present.
    ///
    /// Returns true if the pool changed.
    pub fn insert(&self, port: u16) -> bool {
        let mut guard = self.backends.write();
        if guard.iter().any(|b| b.port == port) {
            return false;
        }
        let mut next = Vec::with_capacity(guard.len() + 1);
        next.extend(guard.iter().cloned());
        next.push(Backend::new(port));
        *guard = Arc::new(next);
        true
    }

    /// Remove the backend for `port`. Returns true if the pool changed.
    pub fn remove(&self, port: u16) -> bool {
        let mut guard = self.backends.write();
        if !guard.iter().any(|b| b.port == port) {
            return false;
        }
        let next: Vec<Backend> = guard.iter().filter(|b| b.port != port).cloned().collect();
        *guard = Arc::new(next);
        true
    }
}
