//! Hold-to-confirm gesture tracking
//!
//! High-consequence controls (arming security, passcode digits, SOS) only
//! fire after the pointer has been held for `hold_time`. A press records the
//! start; the periodic [`HoldTracker::poll_completions`] call is the only path
//! that confirms. A release before that poll always discards the hold, even
//! if the hold time had already elapsed.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// A press in progress
#[derive(Debug, Clone)]
struct HoldAction {
    started_at: Instant,
    payload: Option<String>,
}

/// An action confirmed by a sustained hold
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmedAction {
    pub action_id: String,
    pub payload: Option<String>,
}

/// Tracks concurrent holds keyed by action id
#[derive(Debug)]
pub struct HoldTracker {
    hold_time: Duration,
    active: HashMap<String, HoldAction>,
}

impl HoldTracker {
    pub fn new(hold_time: Duration) -> Self {
        Self {
            hold_time,
            active: HashMap::new(),
        }
    }

    pub fn hold_time(&self) -> Duration {
        self.hold_time
    }

    /// Start tracking a press; a re-press of a tracked action is ignored
    pub fn on_press_start(&mut self, action_id: &str, payload: Option<String>, now: Instant) {
        if self.active.contains_key(action_id) {
            return;
        }
        tracing::debug!("Hold started: {}", action_id);
        self.active.insert(
            action_id.to_string(),
            HoldAction {
                started_at: now,
                payload,
            },
        );
    }

    /// Stop tracking a press without confirming it
    pub fn on_press_end(&mut self, action_id: &str, now: Instant) {
        if let Some(hold) = self.active.remove(action_id) {
            let held = now.saturating_duration_since(hold.started_at);
            if held >= self.hold_time {
                tracing::debug!("Hold {} released before confirmation, discarded", action_id);
            } else {
                tracing::debug!("Hold {} cancelled after {:?}", action_id, held);
            }
        }
    }

    /// Confirm and remove every hold that has lasted at least `hold_time`
    ///
    /// Returned in start order so confirmations apply deterministically.
    pub fn poll_completions(&mut self, now: Instant) -> Vec<ConfirmedAction> {
        let mut done: Vec<(String, HoldAction)> = Vec::new();
        let hold_time = self.hold_time;

        self.active.retain(|id, hold| {
            if now.saturating_duration_since(hold.started_at) >= hold_time {
                done.push((id.clone(), hold.clone()));
                false
            } else {
                true
            }
        });

        done.sort_by(|a, b| a.1.started_at.cmp(&b.1.started_at).then_with(|| a.0.cmp(&b.0)));
        done.into_iter()
            .map(|(action_id, hold)| {
                tracing::info!("Hold confirmed: {}", action_id);
                ConfirmedAction {
                    action_id,
                    payload: hold.payload,
                }
            })
            .collect()
    }

    /// Fill fraction of a tracked hold, for the UI progress ring
    pub fn progress(&self, action_id: &str, now: Instant) -> Option<f32> {
        let hold = self.active.get(action_id)?;
        if self.hold_time.is_zero() {
            return Some(1.0);
        }
        let held = now.saturating_duration_since(hold.started_at);
        Some((held.as_secs_f32() / self.hold_time.as_secs_f32()).min(1.0))
    }

    /// Drop every tracked hold
    pub fn cancel_all(&mut self) {
        if !self.active.is_empty() {
            tracing::debug!("Cancelling {} active holds", self.active.len());
        }
        self.active.clear();
    }

    pub fn is_tracking(&self, action_id: &str) -> bool {
        self.active.contains_key(action_id)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}
