//! Pointer input loop
//!
//! Raw press/release events from the UI collaborator are queued here and
//! folded into the hold tracker on a fixed tick. Each tick then polls for
//! completed holds and submits the decoded actions to the mode controller in
//! completion order. The loop never waits on the controller or the network.

use crate::gesture::HoldTracker;
use crate::mode::{ModeHandle, UiAction};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};

/// Raw input from the UI collaborator
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputEvent {
    PressStart {
        action_id: String,
        #[serde(default)]
        payload: Option<String>,
    },
    PressEnd {
        action_id: String,
    },
    Escape,
}

/// Progress of one hold, served to the UI's progress ring
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldStatus {
    pub action_id: String,
    pub holding: bool,
    /// Fill fraction in `0.0..=1.0`; zero when not holding
    pub progress: f32,
    pub hold_time_ms: u64,
    pub active_holds: usize,
}

/// Producer side of the input loop
#[derive(Clone)]
pub struct InputHandle {
    tx: mpsc::Sender<InputEvent>,
    tracker: Arc<Mutex<HoldTracker>>,
}

impl InputHandle {
    pub fn send(&self, event: InputEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Input queue rejected event: {}", e);
                false
            }
        }
    }

    pub fn hold_status(&self, action_id: &str) -> HoldStatus {
        self.hold_status_at(action_id, Instant::now())
    }

    fn hold_status_at(&self, action_id: &str, now: Instant) -> HoldStatus {
        let tracker = self.tracker.lock();
        HoldStatus {
            action_id: action_id.to_string(),
            holding: tracker.is_tracking(action_id),
            progress: tracker.progress(action_id, now).unwrap_or(0.0),
            hold_time_ms: u64::try_from(tracker.hold_time().as_millis()).unwrap_or(u64::MAX),
            active_holds: tracker.active_count(),
        }
    }
}

/// Consumer side: owns the tick and feeds the controller
pub struct InputLoop {
    rx: mpsc::Receiver<InputEvent>,
    tracker: Arc<Mutex<HoldTracker>>,
    mode: ModeHandle,
    tick: Duration,
}

impl InputLoop {
    pub fn new(hold_time: Duration, tick_hz: u32, mode: ModeHandle) -> (Self, InputHandle) {
        let (tx, rx) = mpsc::channel(256);
        let tracker = Arc::new(Mutex::new(HoldTracker::new(hold_time)));
        let tick = Duration::from_secs_f64(1.0 / f64::from(tick_hz.max(1)));

        let handle = InputHandle {
            tx,
            tracker: tracker.clone(),
        };
        (
            Self {
                rx,
                tracker,
                mode,
                tick,
            },
            handle,
        )
    }

    /// Process queued events and confirmed holds for one tick
    pub fn step(&mut self, now: Instant) {
        let mut tracker = self.tracker.lock();

        while let Ok(event) = self.rx.try_recv() {
            match event {
                InputEvent::PressStart { action_id, payload } => {
                    tracker.on_press_start(&action_id, payload, now)
                }
                InputEvent::PressEnd { action_id } => tracker.on_press_end(&action_id, now),
                InputEvent::Escape => {
                    tracker.cancel_all();
                    self.mode.submit_escape();
                }
            }
        }

        for confirmed in tracker.poll_completions(now) {
            match UiAction::from_confirmed(&confirmed.action_id, confirmed.payload.as_deref()) {
                Some(action) => {
                    self.mode.submit(action);
                }
                None => tracing::debug!("No action bound to {}", confirmed.action_id),
            }
        }
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("Input loop started ({:?} tick)", self.tick);
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.step(Instant::now()),
                _ = shutdown.changed() => break,
            }
        }
        tracing::info!("Input loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_event_wire_format() {
        let event: InputEvent = serde_json::from_str(
            r#"{"type":"press_start","action_id":"security_digit","payload":"4"}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            InputEvent::PressStart {
                action_id: "security_digit".into(),
                payload: Some("4".into())
            }
        );

        let event: InputEvent = serde_json::from_str(r#"{"type":"escape"}"#).unwrap();
        assert_eq!(event, InputEvent::Escape);
    }

    #[test]
    fn test_hold_status_follows_press() {
        let (tx, _rx) = mpsc::channel(4);
        let handle = InputHandle {
            tx,
            tracker: Arc::new(Mutex::new(HoldTracker::new(Duration::from_millis(400)))),
        };
        let start = Instant::now();

        let idle = handle.hold_status_at("sos_btn", start);
        assert!(!idle.holding);
        assert_eq!(idle.progress, 0.0);
        assert_eq!(idle.hold_time_ms, 400);

        handle.tracker.lock().on_press_start("sos_btn", None, start);
        let half = handle.hold_status_at("sos_btn", start + Duration::from_millis(200));
        assert!(half.holding);
        assert!((half.progress - 0.5).abs() < 0.01);
        assert_eq!(half.active_holds, 1);

        handle
            .tracker
            .lock()
            .on_press_end("sos_btn", start + Duration::from_millis(250));
        let released = handle.hold_status_at("sos_btn", start + Duration::from_millis(300));
        assert!(!released.holding);
        assert_eq!(released.active_holds, 0);
    }
}
