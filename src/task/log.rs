//! Operator log: append-only, timestamped, broadcast to subscribers.

use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SubsecRound, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

/// Default broadcast channel capacity.
const DEFAULT_BROADCAST_CAPACITY: usize = 256;

/// One line of operator-facing log output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    /// Wall-clock time, whole seconds.
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl std::fmt::Display for LogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.timestamp.format("%H:%M:%S"), self.message)
    }
}

/// Ordered log of the session. Entries are never reordered or evicted.
pub struct LogChannel {
    entries: Mutex<Vec<LogEntry>>,
    tx: broadcast::Sender<LogEntry>,
}

impl LogChannel {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(DEFAULT_BROADCAST_CAPACITY);
        Self {
            entries: Mutex::new(Vec::new()),
            tx,
        }
    }

    fn entries_mut(&self) -> MutexGuard<'_, Vec<LogEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append a message stamped with the current time.
    pub fn append(&self, message: impl Into<String>) -> LogEntry {
        let entry = LogEntry {
            timestamp: Utc::now().trunc_subsecs(0),
            message: message.into(),
        };
        tracing::debug!(message = %entry.message, "Operator log");

        self.entries_mut().push(entry.clone());

        // Ok if nobody is listening
        let _ = self.tx.send(entry.clone());
        entry
    }

    /// Subscribe to entries appended from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.tx.subscribe()
    }

    /// All entries in insertion order.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries_mut().clone()
    }

    pub fn len(&self) -> usize {
        self.entries_mut().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries_mut().is_empty()
    }

    /// Whether any entry contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.entries_mut().iter().any(|e| e.message.contains(needle))
    }
}

impl Default for LogChannel {
    fn default() -> Self {
        Self::new()
    }
}
