//! In-memory event log
//!
//! A bounded ring of the most recent supervisor events, written by the
//! engine and host client, snapshot-read by the status API. Nothing here is
//! persisted; the ring exists so an operator glancing at the dashboard can
//! see what the watchdog has been doing.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Maximum entries retained; the oldest entry is evicted first
const EVENT_LOG_CAPACITY: usize = 100;

/// One event-log line
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventLogEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

/// Bounded FIFO event ring
#[derive(Default)]
pub struct EventLog {
    entries: Mutex<VecDeque<EventLogEntry>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self { entries: Mutex::new(VecDeque::with_capacity(EVENT_LOG_CAPACITY)) }
    }

    /// Append an entry, evicting the oldest when full
    pub fn push(&self, message: impl Into<String>) {
        let mut entries = self.entries.lock().expect("event log lock poisoned");
        if entries.len() == EVENT_LOG_CAPACITY {
            entries.pop_front();
        }
        entries.push_back(EventLogEntry { timestamp: Utc::now(), message: message.into() });
    }

    /// Defensive copy for concurrent readers
    pub fn snapshot(&self) -> Vec<EventLogEntry> {
        self.entries.lock().expect("event log lock poisoned").iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("event log lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
