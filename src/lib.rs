// =============================================================================
// Lint Configuration
// =============================================================================

// Safety: no unsafe code anywhere
#![deny(unsafe_code)]
// Correctness: Must handle all fallible operations
#![deny(unused_must_use)]
// Quality: Pedantic but pragmatic
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(rust_2018_idioms)]
#![warn(unreachable_pub)]

// Allowed with documented reasons
#![allow(clippy::missing_errors_doc)] // Error returns self-documenting via type
#![allow(clippy::missing_panics_doc)] // Panics only in tests
#![allow(clippy::module_name_repetitions)] // e.g., lb::LoadBalancer is clearer
#![allow(clippy::doc_markdown)] // Too many false positives in code docs
#![allow(clippy::must_use_candidate)] // Not all returned values need annotation
#![allow(clippy::cast_possible_truncation)] // Port arithmetic is range-checked

//! Local development orchestrator.
//!
//! Runs several replicas of each configured service as child processes,
//! merges their output into one log stream, and fronts them with a
//! round-robin HTTP load balancer that routes by path prefix.
//!
//! # Modules
//!
//! - [`supervisor`] - spawns, tracks and kills replica processes
//! - [`lb`] - routing load balancer
//! - [`console`] - interactive command surface
//! - [`app`] - driver tying the pieces together
//! - [`config`] - TOML/YAML configuration and validation
//!
//! # Example
//!
//! ```no_run
//! use simlocal::config::Config;
//! use simlocal::supervisor::Supervisor;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = Config::load_from("simlocal.toml")?;
//! let supervisor = Supervisor::with_log_capacity(config.log_capacity);
//! for service in config.services_in_order() {
//!     supervisor.start_service(service)?;
//! }
//! println!("{:?}", supervisor.list_replicas());
//! supervisor.shutdown_all();
//! # Ok(())
//! # }
//! ```

pub mod app;
pub mod config;
pub mod console;
pub mod constants;
pub mod error;
pub mod lb;
pub mod logging;
pub mod supervisor;

pub use config::{Config, Service};
pub use error::{Error, Result};
pub use lb::LoadBalancer;
pub use supervisor::Supervisor;
