//! Periodic reachability check of the peer node
//!
//! The panel pings the hub's `/health` on a fixed interval. A lost link
//! raises one warning; the next successful ping re-arms it.

use super::client::PeerLink;
use crate::notifications::{NotificationStore, Severity};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Last known state of the peer link
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerHealth {
    /// `None` until the first check completes
    pub connected: Option<bool>,
    pub last_checked: Option<DateTime<Utc>>,
}

/// Shared view of the peer link, written by [`PeerMonitor`]
#[derive(Debug, Default)]
pub struct PeerStatus {
    health: Mutex<PeerHealth>,
}

impl PeerStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> PeerHealth {
        *self.health.lock()
    }

    pub fn is_connected(&self) -> Option<bool> {
        self.health.lock().connected
    }

    /// Record a ping result; returns the previous connection state
    pub fn record(&self, connected: bool, now: DateTime<Utc>) -> Option<bool> {
        let mut health = self.health.lock();
        health.last_checked = Some(now);
        health.connected.replace(connected)
    }
}

pub struct PeerMonitor {
    link: Arc<dyn PeerLink>,
    status: Arc<PeerStatus>,
    notifications: Arc<NotificationStore>,
    peer_url: String,
    interval: Duration,
}

impl PeerMonitor {
    pub fn new(
        link: Arc<dyn PeerLink>,
        status: Arc<PeerStatus>,
        notifications: Arc<NotificationStore>,
        peer_url: impl Into<String>,
        interval: Duration,
    ) -> Self {
        Self {
            link,
            status,
            notifications,
            peer_url: peer_url.into(),
            interval,
        }
    }

    /// Ping once; returns whether the peer answered
    pub async fn check(&self) -> bool {
        let result = self.link.ping().await;
        let connected = result.is_ok();
        let previous = self.status.record(connected, Utc::now());

        match (previous, result) {
            (Some(false), Ok(())) => tracing::info!("Connection to {} restored", self.peer_url),
            (None, Ok(())) => tracing::info!("Peer {} reachable", self.peer_url),
            (Some(true) | None, Err(e)) => {
                tracing::warn!("Connection to {} lost: {}", self.peer_url, e);
                self.notifications.add(
                    "PEER DISCONNECTED",
                    &format!("Connection to {} lost", self.peer_url),
                    Severity::Warning,
                );
            }
            (Some(false), Err(e)) => tracing::debug!("Peer still unreachable: {}", e),
            (Some(true), Ok(())) => {}
        }
        connected
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("Peer monitor started ({:?} interval)", self.interval);
        // First check after one interval, so a peer started alongside can bind
        let first = tokio::time::Instant::now() + self.interval;
        let mut ticker = tokio::time::interval_at(first, self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check().await;
                }
                _ = shutdown.changed() => break,
            }
        }
        tracing::info!("Peer monitor stopped");
    }
}
