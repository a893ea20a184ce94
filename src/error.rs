//! Error types for the orchestrator core.
//!
//! The supervisor, load balancer and console return these structured errors;
//! the binary and config loading wrap them in `anyhow` with context.

/// Result type for orchestrator operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Orchestrator errors with structured context.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Replica is not tracked by the supervisor.
    #[error("replica {name} not found")]
    ReplicaNotFound { name: String },

    /// A replica process could not be spawned (pipe or exec failure).
    ///
    /// `started` lists the replicas the same call had already started; they
    /// keep running.
    #[error("[{name}] failed to start replica: {source}")]
    SpawnFailed {
        name: String,
        started: Vec<String>,
        #[source]
        source: std::io::Error,
    },

    /// A service has no free port left in its configured range.
    ///
    /// `started` lists the replicas the same call had already started.
    #[error("[{name}] port {port} is outside the range {start_port}-{end_port} of service {service}")]
    PortRangeExhausted {
        service: String,
        name: String,
        port: u32,
        start_port: u16,
        end_port: u16,
        started: Vec<String>,
    },

    /// The load balancer could not bind its listen address.
    #[error("failed to bind load balancer on {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The HTTP client used for forwarding could not be built.
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),

    /// IO error with context.
    #[error("IO error in {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// The console received a command it does not know.
    #[error("Unknown command: {0} (type 'help' for available commands)")]
    UnknownCommand(String),

    /// A known command was given the wrong arguments.
    #[error("Usage: {0}")]
    Usage(&'static str),
}

impl Error {
    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a replica not found error.
    pub fn replica_not_found(name: impl Into<String>) -> Self {
        Self::ReplicaNotFound { name: name.into() }
    }

    /// Create a spawn failure for the named replica.
    pub fn spawn_failed(name: impl Into<String>, source: std::io::Error) -> Self {
        Self::SpawnFailed {
            name: name.into(),
            started: Vec::new(),
            source,
        }
    }

    /// Record the replicas a partially failed `start_service` call did start.
    #[must_use]
    pub fn with_started(mut self, names: Vec<String>) -> Self {
        if let Self::SpawnFailed { started, .. } | Self::PortRangeExhausted { started, .. } = &mut self {
            *started = names;
        }
        self
    }

    /// Replicas left running by a partially failed start.
    pub fn started(&self) -> &[String] {
        match self {
            Self::SpawnFailed { started, .. } | Self::PortRangeExhausted { started, .. } => started,
            _ => &[],
        }
    }

    /// Returns true if this is a "not found" condition.
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::ReplicaNotFound { .. })
    }
}
