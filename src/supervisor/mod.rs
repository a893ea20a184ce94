//! Process supervisor for service replicas.
//!
//! The [`Supervisor`] owns the table of running replicas. For each replica it
//! spawns the child in its own process group, pumps stdout and stderr into
//! the shared [`LogStream`], and runs a waiter task that removes the replica
//! from the table when its process exits.
//!
//! # Lifecycle
//!
//! ```text
//! Starting ──(table insert)──> Running ──(waiter sees exit)──> gone
//!                                  └────(stop_replica)───────> gone
//! ```
//!
//! There is no tombstone for exited replicas: a replica that is not in the
//! table does not exist. A `stop_replica` racing with a natural exit may
//! therefore report "not found".
//!
//! # Concurrency
//!
//! The table sits behind one reader/writer lock that is never held across
//! an `.await`. The waiter task exclusively owns the [`Child`] handle and is
//! the only place that signals or reaps it; the table keeps the pid (for
//! display) and a one-shot stop trigger.

pub mod lifecycle;
pub mod log_stream;
mod pump;
pub mod types;

pub use log_stream::{LogRecord, LogStream};
pub use types::{Backpressure, ReplicaEvent, ReplicaInfo, StreamKind};

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use tokio::process::Child;
use tokio::sync::{broadcast, oneshot, watch};
use tracing::{error, info, warn};

use crate::config::Service;
use crate::constants;
use crate::error::{Error, Result};
use lifecycle::ReplicaSpec;

/// A tracked replica. Exit is modelled by removing the entry.
struct ReplicaEntry {
    /// Generation id, so a waiter never removes somebody else's entry.
    id: u64,
    service: String,
    port: u16,
    pid: Option<u32>,
    started_at: Instant,
    stop: oneshot::Sender<()>,
}

struct Inner {
    table: RwLock<HashMap<String, ReplicaEntry>>,
    /// Next replica index per service; names are never reused.
    counters: Mutex<HashMap<String, usize>>,
    logs: Arc<LogStream>,
    events: broadcast::Sender<ReplicaEvent>,
    next_id: AtomicU64,
    /// Number of waiter tasks still running.
    live: watch::Sender<usize>,
}

/// Supervisor for replica processes.
///
/// Cheap to clone; clones share the same table and log stream. Spawning
/// needs a Tokio runtime, so all methods must be called from within one.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("replicas", &self.list_replicas())
            .field("isolated", &self.isolated_replica())
            .finish_non_exhaustive()
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Supervisor {
    /// Create a supervisor with the default log retention.
    pub fn new() -> Self {
        Self::with_log_capacity(constants::DEFAULT_LOG_CAPACITY)
    }

    /// Create a supervisor retaining at most `capacity` log records.
    pub fn with_log_capacity(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(constants::EVENT_CHANNEL_CAPACITY);
        let (live, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                table: RwLock::new(HashMap::new()),
                counters: Mutex::new(HashMap::new()),
                logs: Arc::new(LogStream::new(capacity)),
                events,
                next_id: AtomicU64::new(1),
                live,
            }),
        }
    }

    /// Start `service.replicas` new replicas of a service.
    ///
    /// Replica names continue from earlier calls for the same service
    /// (`auth-1`, `auth-2`, then `auth-3`, ...), and the replica with index
    /// `i` gets port `start_port + i`. Returns the names started.
    ///
    /// # Errors
    ///
    /// Stops at the first replica that cannot be started and returns:
    /// - [`Error::PortRangeExhausted`] if the next index has no port left
    /// - [`Error::SpawnFailed`] if the process or its pipes cannot be created
    ///
    /// Replicas already started by the same call keep running; the error
    /// lists them (see [`Error::started`]).
    pub fn start_service(&self, service: &Service) -> Result<Vec<String>> {
        // Held for the whole call so concurrent starts of one service
        // cannot hand out the same index.
        let mut counters = self.inner.counters.lock();
        let next = counters.entry(service.name.clone()).or_insert(0);
        let mut started = Vec::with_capacity(service.replicas);

        for _ in 0..service.replicas {
            let index = *next;
            let name = service.replica_name(index);
            let Some(port) = service.port_for(index) else {
                error!(service = %service.name, replica = %name, "No port left in range");
                return Err(Error::PortRangeExhausted {
                    service: service.name.clone(),
                    name,
                    port: u32::from(service.start_port) + index as u32,
                    start_port: service.start_port,
                    end_port: service.end_port,
                    started,
                });
            };

            let spec = ReplicaSpec {
                name: name.clone(),
                port,
                service,
            };
            if let Err(e) = self.launch(&spec) {
                error!(service = %service.name, replica = %name, error = %e, "Failed to start replica");
                return Err(e.with_started(started));
            }

            *next = index + 1;
            info!(service = %service.name, replica = %name, port = port, "Starting replica");
            started.push(name);
        }

        Ok(started)
    }

    /// Spawn one replica, register it, and start its pumps and waiter.
    fn launch(&self, spec: &ReplicaSpec<'_>) -> Result<()> {
        let mut child = lifecycle::spawn_replica(spec)?;

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            lifecycle::kill_single(&mut child, &spec.name);
            return Err(Error::spawn_failed(
                &spec.name,
                std::io::Error::other("output pipes were not created"),
            ));
        };

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (stop_tx, stop_rx) = oneshot::channel();
        let service = spec.service.name.clone();

        self.inner.table.write().insert(
            spec.name.clone(),
            ReplicaEntry {
                id,
                service: service.clone(),
                port: spec.port,
                pid: child.id(),
                started_at: Instant::now(),
                stop: stop_tx,
            },
        );
        let _ = self.inner.events.send(ReplicaEvent::Started {
            service,
            name: spec.name.clone(),
            port: spec.port,
        });

        let logs = &self.inner.logs;
        tokio::spawn(pump::pump_lines(
            logs.clone(),
            spec.name.clone(),
            StreamKind::Stdout,
            stdout,
        ));
        tokio::spawn(pump::pump_lines(
            logs.clone(),
            spec.name.clone(),
            StreamKind::Stderr,
            stderr,
        ));

        self.inner.live.send_modify(|n| *n += 1);
        tokio::spawn(wait_for_exit(
            self.inner.clone(),
            spec.name.clone(),
            id,
            child,
            stop_rx,
        ));

        Ok(())
    }

    /// Stop one replica.
    ///
    /// The entry is removed first, so nobody can observe a replica that is
    /// being killed. The waiter task, which owns the process handle, then
    /// sends `SIGKILL` to the whole process group and reaps the process.
    /// Signals are only ever sent before the reap, never to a pid that may
    /// have been reused.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReplicaNotFound`] if the replica is not tracked.
    pub fn stop_replica(&self, name: &str) -> Result<()> {
        let entry = self
            .inner
            .table
            .write()
            .remove(name)
            .ok_or_else(|| Error::replica_not_found(name))?;

        // Err means the waiter already saw the exit and reaped it.
        let _ = entry.stop.send(());

        info!(replica = %name, pid = ?entry.pid, "Stopped replica");
        let _ = self.inner.events.send(ReplicaEvent::Stopped {
            service: entry.service,
            name: name.to_string(),
            port: entry.port,
        });
        Ok(())
    }

    /// Names of all tracked replicas, sorted.
    pub fn list_replicas(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.table.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Snapshot of all tracked replicas, sorted by name.
    pub fn replicas(&self) -> Vec<ReplicaInfo> {
        let mut replicas: Vec<ReplicaInfo> = self
            .inner
            .table
            .read()
            .iter()
            .map(|(name, entry)| ReplicaInfo {
                name: name.clone(),
                service: entry.service.clone(),
                port: entry.port,
                pid: entry.pid,
                uptime: entry.started_at.elapsed(),
            })
            .collect();
        replicas.sort_by(|a, b| a.name.cmp(&b.name));
        replicas
    }

    /// Whether a replica is currently tracked.
    pub fn contains(&self, name: &str) -> bool {
        self.inner.table.read().contains_key(name)
    }

    /// Set the isolation filter; an empty name shows all replicas again.
    pub fn set_isolated_replica(&self, name: &str) {
        self.inner.logs.set_isolated(name);
    }

    /// The current isolation filter.
    pub fn isolated_replica(&self) -> Option<String> {
        self.inner.logs.isolated()
    }

    /// The merged output of all replicas.
    pub fn log_stream(&self) -> &Arc<LogStream> {
        &self.inner.logs
    }

    /// Register the live log sink. See [`LogStream::subscribe`].
    pub fn subscribe_logs(
        &self,
        capacity: usize,
        policy: Backpressure,
    ) -> tokio::sync::mpsc::Receiver<LogRecord> {
        self.inner.logs.subscribe(capacity, policy)
    }

    /// Receive replica membership changes from now on.
    pub fn subscribe_events(&self) -> broadcast::Receiver<ReplicaEvent> {
        self.inner.events.subscribe()
    }

    /// Stop every tracked replica. Safe to call repeatedly.
    pub fn shutdown_all(&self) {
        let names = self.list_replicas();
        if !names.is_empty() {
            info!(count = names.len(), "Stopping all replicas");
        }
        for name in names {
            // A replica may exit on its own between the snapshot and here.
            if let Err(e) = self.stop_replica(&name) {
                tracing::debug!(replica = %name, error = %e, "Replica already gone");
            }
        }
    }

    /// Wait until every spawned process has been reaped.
    pub async fn wait_idle(&self) {
        let mut live = self.inner.live.subscribe();
        // The sender lives in `inner`, which we hold, so this cannot fail.
        let _ = live.wait_for(|n| *n == 0).await;
    }
}

/// Wait for a replica to exit or to be stopped, then drop its table entry.
async fn wait_for_exit(
    inner: Arc<Inner>,
    name: String,
    id: u64,
    mut child: Child,
    stop: oneshot::Receiver<()>,
) {
    tokio::select! {
        status = child.wait() => {
            match &status {
                Ok(status) if status.success() => {
                    info!(replica = %name, "Replica exited successfully");
                },
                Ok(status) => {
                    warn!(replica = %name, status = %status, "Replica exited with error");
                },
                Err(e) => {
                    error!(replica = %name, error = %e, "Failed to wait for replica");
                },
            }

            let removed = {
                let mut table = inner.table.write();
                match table.get(&name) {
                    Some(entry) if entry.id == id => table.remove(&name),
                    _ => None,
                }
            };
            if let Some(entry) = removed {
                let _ = inner.events.send(ReplicaEvent::Exited {
                    service: entry.service,
                    name: name.clone(),
                    port: entry.port,
                    success: status.is_ok_and(|s| s.success()),
                });
            }
        }
        _ = stop => {
            let outcome = lifecycle::terminate(&mut child, &name);
            tracing::debug!(replica = %name, outcome = ?outcome, "Killed replica process group");
            match child.wait().await {
                Ok(status) => tracing::debug!(replica = %name, status = %status, "Stopped replica reaped"),
                Err(e) => error!(replica = %name, error = %e, "Failed to reap stopped replica"),
            }
        }
    }

    inner.live.send_modify(|n| *n = n.saturating_sub(1));
}
