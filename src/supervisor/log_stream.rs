//! Merged replica output.
//!
//! Every line any replica prints ends up here as a [`LogRecord`]. Records are
//! kept in insertion order (bounded by a retention capacity) for history
//! replay, and records passing the isolation filter are pushed to the live
//! sink, a bounded channel drained by a dedicated consumer task.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tokio::sync::mpsc;

use super::types::{Backpressure, StreamKind};

/// One line of replica output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Position in the stream; strictly increasing in insertion order.
    pub seq: u64,
    /// Replica that produced the line.
    pub replica: String,
    /// Stream the line was read from.
    pub stream: StreamKind,
    /// The line itself, without the trailing newline.
    pub message: String,
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}][{}] {}", self.stream, self.replica, self.message)
    }
}

struct LogSink {
    tx: mpsc::Sender<LogRecord>,
    policy: Backpressure,
}

/// Append-only, thread-safe log of replica output with an isolation filter.
pub struct LogStream {
    records: RwLock<VecDeque<LogRecord>>,
    capacity: usize,
    next_seq: AtomicU64,
    isolated: RwLock<Option<String>>,
    sink: RwLock<Option<LogSink>>,
    dropped: AtomicU64,
}

impl fmt::Debug for LogStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogStream")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .field("isolated", &self.isolated())
            .finish_non_exhaustive()
    }
}

impl LogStream {
    /// Create a stream retaining at most `capacity` records (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            records: RwLock::new(VecDeque::new()),
            capacity: capacity.max(1),
            next_seq: AtomicU64::new(0),
            isolated: RwLock::new(None),
            sink: RwLock::new(None),
            dropped: AtomicU64::new(0),
        }
    }

    /// Append a record and return it with its sequence number.
    ///
    /// The oldest record is evicted once the retention capacity is reached.
    pub fn append(
        &self,
        replica: &str,
        stream: StreamKind,
        message: impl Into<String>,
    ) -> LogRecord {
        let mut records = self.records.write();
        let record = LogRecord {
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            replica: replica.to_string(),
            stream,
            message: message.into(),
        };
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(record.clone());
        record
    }

    /// Append a record and deliver it to the live sink if it passes the
    /// isolation filter.
    pub async fn publish(&self, replica: &str, stream: StreamKind, message: impl Into<String>) {
        let record = self.append(replica, stream, message);
        if !self.passes_filter(&record) {
            return;
        }

        let (tx, policy) = {
            let sink = self.sink.read();
            match sink.as_ref() {
                Some(sink) => (sink.tx.clone(), sink.policy),
                None => return,
            }
        };

        match policy {
            Backpressure::Block => {
                // A closed receiver just means nobody is watching anymore.
                let _ = tx.send(record).await;
            },
            Backpressure::DropNewest => {
                if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(record) {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
            },
        }
    }

    /// Register the live sink, replacing any previous one.
    ///
    /// Only records appended after this call are delivered; use
    /// [`records_for`](Self::records_for) or [`snapshot`](Self::snapshot)
    /// to replay history.
    pub fn subscribe(&self, capacity: usize, policy: Backpressure) -> mpsc::Receiver<LogRecord> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        *self.sink.write() = Some(LogSink { tx, policy });
        rx
    }

    /// Drop the live sink.
    pub fn unsubscribe(&self) {
        *self.sink.write() = None;
    }

    /// Set the isolation filter. An empty name clears it.
    ///
    /// Names are not validated: an unknown name simply matches nothing.
    pub fn set_isolated(&self, name: &str) {
        let name = name.trim();
        *self.isolated.write() = if name.is_empty() {
            None
        } else {
            Some(name.to_string())
        };
    }

    /// The current isolation filter, if any.
    pub fn isolated(&self) -> Option<String> {
        self.isolated.read().clone()
    }

    /// Whether a record reaches the live sink under the current filter.
    pub fn passes_filter(&self, record: &LogRecord) -> bool {
        self.isolated
            .read()
            .as_deref()
            .is_none_or(|name| name == record.replica)
    }

    /// Retained records of one replica, oldest first.
    pub fn records_for(&self, replica: &str) -> Vec<LogRecord> {
        self.records
            .read()
            .iter()
            .filter(|r| r.replica == replica)
            .cloned()
            .collect()
    }

    /// All retained records, oldest first.
    pub fn snapshot(&self) -> Vec<LogRecord> {
        self.records.read().iter().cloned().collect()
    }

    /// Number of retained records.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// True when nothing has been retained.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Records skipped by the live sink under [`Backpressure::DropNewest`].
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
