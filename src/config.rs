//! Configuration types for the orchestrator.
//!
//! A config file declares the load balancer port and a map of services. Each
//! service names an executable, a replica count, an inclusive port range and
//! the route prefix the load balancer exposes it under.
//!
//! - [`Config`] - Root configuration struct
//! - [`Service`] - One declared service
//! - [`ValidationResult`] - Non-fatal findings from [`Config::validate`]
//!
//! Files ending in `.yaml`/`.yml` are parsed as YAML, everything else as TOML.
//! Services are kept in a [`BTreeMap`], so every walk over them (spawn order,
//! route registration) is lexicographic by service key.
//!
//! # Example
//!
//! ```
//! use simlocal::config::Config;
//!
//! let toml = r#"
//! lb_port = 8080
//!
//! [services.auth]
//! path = "./bin/auth"
//! start_port = 9000
//! end_port = 9010
//! replicas = 2
//! route_prefix = "/auth"
//! "#;
//!
//! let config = Config::from_toml_str(toml).unwrap();
//! assert!(config.validate().is_ok());
//! assert_eq!(config.services["auth"].name, "auth");
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use crate::constants;

/// Result of configuration validation.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Non-fatal warnings that should be logged but don't prevent operation.
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// Returns true if there are any warnings.
    #[must_use]
    pub const fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// Root configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Port the load balancer listens on.
    #[serde(default = "default_lb_port")]
    pub lb_port: u16,
    /// Optional timeout for forwarded requests. No timeout when unset.
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    /// Optional bound on how long shutdown waits for in-flight requests.
    #[serde(default)]
    pub drain_timeout_secs: Option<u64>,
    /// Number of log records kept for history replay.
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,
    /// Declared services, keyed by name.
    #[serde(default)]
    pub services: BTreeMap<String, Service>,
}

/// A declared service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    /// Unique service name. Defaults to the services-map key.
    #[serde(default)]
    pub name: String,
    /// Executable started for every replica.
    pub path: String,
    /// Extra arguments passed to the executable.
    #[serde(default)]
    pub args: Vec<String>,
    /// First port of the inclusive range reserved for this service.
    pub start_port: u16,
    /// Last port of the inclusive range reserved for this service.
    pub end_port: u16,
    /// Number of replicas to start.
    #[serde(default)]
    pub replicas: usize,
    /// URL prefix the load balancer routes to this service.
    #[serde(default)]
    pub route_prefix: String,
    /// Extra environment variables for every replica.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

const fn default_lb_port() -> u16 {
    constants::DEFAULT_LB_PORT
}

const fn default_log_capacity() -> usize {
    constants::DEFAULT_LOG_CAPACITY
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lb_port: default_lb_port(),
            request_timeout_secs: None,
            drain_timeout_secs: None,
            log_capacity: default_log_capacity(),
            services: BTreeMap::new(),
        }
    }
}

impl Service {
    /// Name of the replica at `index` (zero-based): `{name}-{index+1}`.
    pub fn replica_name(&self, index: usize) -> String {
        format!("{}-{}", self.name, index + 1)
    }

    /// Port assigned to the replica at `index`, if it fits the range.
    pub fn port_for(&self, index: usize) -> Option<u16> {
        let port = usize::from(self.start_port).checked_add(index)?;
        if port > usize::from(self.end_port) {
            return None;
        }
        u16::try_from(port).ok()
    }

    /// Number of ports in the inclusive range.
    pub fn port_capacity(&self) -> usize {
        (usize::from(self.end_port) + 1).saturating_sub(usize::from(self.start_port))
    }

    /// Route prefix without trailing slashes; the root prefix stays `/`.
    pub fn normalized_prefix(&self) -> &str {
        let trimmed = self.route_prefix.trim_end_matches('/');
        if trimmed.is_empty() { "/" } else { trimmed }
    }
}

impl Config {
    /// Load, normalize and validate a config file.
    ///
    /// Validation warnings are logged; validation errors fail the load.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file cannot be read (IO error)
    /// - The file is not valid TOML/YAML or has missing/mistyped fields
    /// - Validation fails (bad ports, ranges, prefixes)
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let is_yaml = path
            .extension()
            .is_some_and(|ext| ext == "yaml" || ext == "yml");

        let config = if is_yaml {
            Self::from_yaml_str(&content)
        } else {
            Self::from_toml_str(&content)
        }
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        let result = config
            .validate()
            .with_context(|| format!("Config validation failed: {}", path.display()))?;
        for warning in &result.warnings {
            tracing::warn!(config = %path.display(), "{warning}");
        }

        Ok(config)
    }

    /// Parse a TOML document and fill in defaulted service names.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("Invalid TOML")?;
        Ok(config.normalized())
    }

    /// Parse a YAML document and fill in defaulted service names.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content).context("Invalid YAML")?;
        Ok(config.normalized())
    }

    fn normalized(mut self) -> Self {
        for (key, service) in &mut self.services {
            if service.name.trim().is_empty() {
                service.name.clone_from(key);
            }
        }
        self
    }

    /// Services in registration order (lexicographic by key).
    pub fn services_in_order(&self) -> impl Iterator<Item = &Service> {
        self.services.values()
    }

    /// Route prefix collisions in registration order.
    ///
    /// Each entry is `(skipped service, prefix, service that claimed it)`.
    pub fn duplicate_prefixes(&self) -> Vec<(&str, &str, &str)> {
        let mut claimed: HashMap<&str, &str> = HashMap::new();
        let mut duplicates = Vec::new();
        for service in self.services_in_order() {
            let prefix = service.normalized_prefix();
            match claimed.get(prefix) {
                Some(owner) => duplicates.push((service.name.as_str(), prefix, *owner)),
                None => {
                    claimed.insert(prefix, service.name.as_str());
                },
            }
        }
        duplicates
    }

    /// Validate configuration with comprehensive checks.
    ///
    /// Returns a `ValidationResult` containing any non-fatal warnings.
    ///
    /// # Errors
    ///
    /// Returns an error listing every violation:
    /// - `lb_port` is 0
    /// - a service has `start_port` 0, `end_port <= start_port`, or a range
    ///   smaller than its replica count
    /// - a service has an empty `path` or a `route_prefix` not starting with `/`
    /// - two services share a name
    pub fn validate(&self) -> Result<ValidationResult> {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if self.lb_port == 0 {
            errors.push("lb_port must be greater than 0".to_string());
        }

        let mut names: HashMap<&str, &str> = HashMap::new();
        for (key, svc) in &self.services {
            if let Some(other) = names.insert(svc.name.as_str(), key.as_str()) {
                errors.push(format!(
                    "service {}: name is also used by services.{other}",
                    svc.name
                ));
            }

            if svc.start_port == 0 {
                errors.push(format!("service {}: start_port must be > 0", svc.name));
            }
            if svc.end_port <= svc.start_port {
                errors.push(format!(
                    "service {}: end_port must be greater than start_port",
                    svc.name
                ));
            } else if svc.port_capacity() < svc.replicas {
                errors.push(format!(
                    "service {}: port range ({}-{}) is too small for {} replicas",
                    svc.name, svc.start_port, svc.end_port, svc.replicas
                ));
            }

            if svc.path.trim().is_empty() {
                errors.push(format!("service {}: path cannot be empty", svc.name));
            }
            if !svc.route_prefix.starts_with('/') {
                errors.push(format!(
                    "service {}: route_prefix must start with '/' (got: '{}')",
                    svc.name, svc.route_prefix
                ));
            }

            if svc.replicas == 0 {
                warnings.push(format!(
                    "service {}: replicas is 0, requests under {} will get 503",
                    svc.name, svc.route_prefix
                ));
            }
            if svc.start_port > 0 && svc.start_port < constants::PRIVILEGED_PORT_LIMIT {
                warnings.push(format!(
                    "service {}: start_port {} is a privileged port (< {})",
                    svc.name,
                    svc.start_port,
                    constants::PRIVILEGED_PORT_LIMIT
                ));
            }
        }

        for (skipped, prefix, owner) in self.duplicate_prefixes() {
            warnings.push(format!(
                "service {skipped}: route prefix {prefix} is already claimed by {owner}, it will not be routable"
            ));
        }

        if !errors.is_empty() {
            anyhow::bail!("{}", errors.join("\n"));
        }

        Ok(ValidationResult { warnings })
    }
}
