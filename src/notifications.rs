//! User-facing notification history
//!
//! A bounded, newest-first ring of alerts and events raised on this node.
//! The UI collaborator and the companion app read it over HTTP.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Number of notifications retained per node
pub const NOTIFICATION_CAPACITY: usize = 100;

/// Notification severity, mirrored by the UI colour scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    Info,
    Success,
    Warning,
    Danger,
}

/// A single stored notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEntry {
    pub id: String,
    pub title: String,
    pub message: String,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_ref: Option<String>,
    pub source_node: String,
}

/// Bounded notification ring buffer
pub struct NotificationStore {
    source_node: String,
    entries: Mutex<VecDeque<NotificationEntry>>,
    capacity: usize,
}

impl NotificationStore {
    pub fn new(source_node: impl Into<String>) -> Self {
        Self::with_capacity(source_node, NOTIFICATION_CAPACITY)
    }

    pub fn with_capacity(source_node: impl Into<String>, capacity: usize) -> Self {
        Self {
            source_node: source_node.into(),
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
        }
    }

    /// Record a notification and return the stored entry
    pub fn add(&self, title: &str, message: &str, severity: Severity) -> NotificationEntry {
        self.add_with_media(title, message, severity, None)
    }

    /// Record a notification that references a media clip
    pub fn add_with_media(
        &self,
        title: &str,
        message: &str,
        severity: Severity,
        media_ref: Option<String>,
    ) -> NotificationEntry {
        let entry = NotificationEntry {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.to_string(),
            message: message.to_string(),
            severity,
            timestamp: Utc::now(),
            media_ref,
            source_node: self.source_node.clone(),
        };

        {
            let mut entries = self.entries.lock();
            entries.push_front(entry.clone());
            entries.truncate(self.capacity);
        }

        tracing::info!("Notification saved: {} ({:?})", title, severity);
        entry
    }

    /// Newest-first view of up to `limit` notifications
    pub fn recent(&self, limit: usize) -> Vec<NotificationEntry> {
        self.entries.lock().iter().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn source_node(&self) -> &str {
        &self.source_node
    }
}
