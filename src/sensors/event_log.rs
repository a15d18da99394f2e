//! Bounded history of confirmed sensor transitions

use super::{SensorKind, SensorState};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Number of transitions retained
pub const EVENT_LOG_CAPACITY: usize = 100;

/// What a log entry refers to: one sensor, or all of them for an operator reset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogScope {
    Water,
    Gas,
    All,
}

impl LogScope {
    /// Whether an entry with this scope should appear when filtering by `kind`
    pub fn matches(&self, kind: SensorKind) -> bool {
        matches!(
            (self, kind),
            (LogScope::Water, SensorKind::Water) | (LogScope::Gas, SensorKind::Gas)
        )
    }
}

impl From<SensorKind> for LogScope {
    fn from(kind: SensorKind) -> Self {
        match kind {
            SensorKind::Water => LogScope::Water,
            SensorKind::Gas => LogScope::Gas,
        }
    }
}

/// Immutable record of one confirmed transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub timestamp: DateTime<Utc>,
    pub sensor: LogScope,
    pub from: SensorState,
    pub to: SensorState,
}

/// Append-only, oldest-evicted-first transition log
pub struct EventLog {
    entries: Mutex<VecDeque<EventLogEntry>>,
    capacity: usize,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog {
    pub fn new() -> Self {
        Self::with_capacity(EVENT_LOG_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
        }
    }

    pub fn append(&self, entry: EventLogEntry) {
        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
        tracing::debug!(
            "Logging: {:?}: {:?} -> {:?}",
            entry.sensor,
            entry.from,
            entry.to
        );
    }

    /// The last `limit` entries, oldest first
    pub fn history(&self, limit: usize) -> Vec<EventLogEntry> {
        let entries = self.entries.lock();
        let skip = entries.len().saturating_sub(limit);
        entries.iter().skip(skip).copied().collect()
    }

    /// Up to `n` entries, newest first, optionally restricted to one sensor
    pub fn recent(&self, n: usize, kind: Option<SensorKind>) -> Vec<EventLogEntry> {
        self.entries
            .lock()
            .iter()
            .rev()
            .filter(|e| kind.map_or(true, |k| e.sensor.matches(k)))
            .take(n)
            .copied()
            .collect()
    }

    /// Number of entries recorded for one sensor
    pub fn count_for(&self, kind: SensorKind) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.sensor.matches(kind))
            .count()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
