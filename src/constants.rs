//! Centralized constants and defaults.
//!
//! All magic numbers used by the supervisor, the load balancer and the
//! console live here.

// =============================================================================
// Configuration Defaults
// =============================================================================

/// Default config file looked up when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "simlocal.toml";

/// Load balancer port used when the config omits `lb_port`.
pub const DEFAULT_LB_PORT: u16 = 8080;

/// Host used to build backend target URLs.
pub const BACKEND_HOST: &str = "localhost";

/// Environment variable carrying the replica's assigned port.
pub const PORT_ENV: &str = "PORT";

/// Ports below this are privileged on most systems.
pub const PRIVILEGED_PORT_LIMIT: u16 = 1024;

// =============================================================================
// Log Stream
// =============================================================================

/// Number of log records retained for history replay.
pub const DEFAULT_LOG_CAPACITY: usize = 100_000;

/// Capacity of the live log sink channel.
pub const DEFAULT_SINK_CAPACITY: usize = 1024;

/// Longest log line kept as one record; longer output is split.
pub const MAX_LOG_LINE_BYTES: usize = 64 * 1024;

/// Capacity of the replica membership event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

// =============================================================================
// Load Balancer
// =============================================================================

/// Idle pooled connections kept per backend.
pub const POOL_MAX_IDLE_PER_HOST: usize = 32;

// =============================================================================
// Console and Shutdown
// =============================================================================

/// Pending console lines buffered between the input thread and the console.
pub const CONSOLE_INPUT_CAPACITY: usize = 16;

/// How long shutdown waits for stopped replicas to be reaped.
pub const REAP_TIMEOUT_SECS: u64 = 5;
