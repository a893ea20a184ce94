//! Type definitions shared across the supervisor.

use std::fmt;
use std::time::Duration;

/// Which child output stream a log line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

impl StreamKind {
    /// Tag used in formatted log lines.
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Stdout => "STDOUT",
            Self::Stderr => "STDERR",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// What a log pump does when the live sink channel is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Backpressure {
    /// Wait for the consumer. Lossless, but a stalled consumer stalls the
    /// pump and eventually the child once its pipe buffer fills.
    #[default]
    Block,
    /// Skip live delivery of the record. It is still kept in history and
    /// counted in [`LogStream::dropped`](super::LogStream::dropped).
    DropNewest,
}

/// Snapshot of one tracked replica.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaInfo {
    /// Replica name (`{service}-{n}`).
    pub name: String,
    /// Owning service.
    pub service: String,
    /// Port passed to the replica in `PORT`.
    pub port: u16,
    /// OS process id, if the process was still alive when spawned.
    pub pid: Option<u32>,
    /// Time since the replica was spawned.
    pub uptime: Duration,
}

/// Replica membership changes broadcast by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicaEvent {
    /// A replica was spawned and registered.
    Started {
        service: String,
        name: String,
        port: u16,
    },
    /// A replica was removed by an explicit stop.
    Stopped {
        service: String,
        name: String,
        port: u16,
    },
    /// A replica's process exited on its own.
    Exited {
        service: String,
        name: String,
        port: u16,
        success: bool,
    },
}

impl ReplicaEvent {
    /// Name of the replica the event is about.
    pub fn name(&self) -> &str {
        match self {
            Self::Started { name, .. } | Self::Stopped { name, .. } | Self::Exited { name, .. } => {
                name
            },
        }
    }
}
