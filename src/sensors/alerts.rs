//! Reactions to confirmed sensor transitions
//!
//! Every path that feeds the debounce engine (the serial poller, inbound
//! `/sensor_event`, `/sensor_test`) goes through [`AlertDispatcher`], so the
//! notification, chat and voice fan-out is identical regardless of origin.
//! Chat and voice go through the [`AlertQueue`]; nothing here waits on them.

use super::{DebounceEngine, SensorEvent, SensorKind, SensorState, Transition};
use crate::capabilities::{voice_phrase, AlertQueue};
use crate::notifications::{NotificationStore, Severity};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Result of handling an event relayed by the peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundOutcome {
    Processed,
    Cooldown,
}

fn alert_text(kind: SensorKind) -> (&'static str, &'static str) {
    match kind {
        SensorKind::Water => ("WATER LEAK", "Water leak detected! Check the plumbing."),
        SensorKind::Gas => ("GAS ALERT", "Gas leak detected! Open the windows."),
    }
}

fn normal_text(kind: SensorKind) -> (&'static str, &'static str) {
    match kind {
        SensorKind::Water => ("WATER NORMAL", "Water leak resolved."),
        SensorKind::Gas => ("GAS NORMAL", "Gas levels back to normal."),
    }
}

pub struct AlertDispatcher {
    engine: Arc<DebounceEngine>,
    notifications: Arc<NotificationStore>,
    alerts: AlertQueue,
    inbound_cooldown: Duration,
    inbound_seen: Mutex<HashMap<SensorEvent, DateTime<Utc>>>,
}

impl AlertDispatcher {
    pub fn new(
        engine: Arc<DebounceEngine>,
        notifications: Arc<NotificationStore>,
        alerts: AlertQueue,
        inbound_cooldown_secs: i64,
    ) -> Self {
        Self {
            engine,
            notifications,
            alerts,
            inbound_cooldown: Duration::seconds(inbound_cooldown_secs.max(1)),
            inbound_seen: Mutex::new(HashMap::new()),
        }
    }

    /// Feed a raw sample and fan out the confirmed transition, if any
    pub fn report(
        &self,
        kind: SensorKind,
        raw: SensorState,
        now: DateTime<Utc>,
    ) -> Option<Transition> {
        let transition = self.engine.report_sample(kind, raw, now)?;
        self.dispatch(transition, now);
        Some(transition)
    }

    fn dispatch(&self, transition: Transition, now: DateTime<Utc>) {
        let kind = transition.kind;
        let event = kind.event_for(transition.to);

        match transition.to {
            SensorState::Alert => {
                let (title, message) = alert_text(kind);
                self.notifications.add(title, message, Severity::Danger);

                let delivery = self.engine.claim_delivery(kind, now);
                if delivery.chat {
                    self.alerts.chat(format!("{}: {}", title, message));
                }
                if delivery.voice {
                    self.alerts.voice(event);
                }
                if !delivery.any() {
                    tracing::info!("{} alert inside cooldown, not notifying", kind);
                }
            }
            SensorState::Normal => {
                let (title, message) = normal_text(kind);
                self.notifications.add(title, message, Severity::Success);

                let settings = self.engine.settings();
                if settings.telegram_enabled {
                    self.alerts.chat(format!("{}: {}", title, message));
                }
                if settings.voice_enabled {
                    self.alerts.voice(event);
                }
            }
        }
    }

    /// Speak an event relayed by the peer, at most once per event type per window
    pub fn relay_inbound(
        &self,
        event: SensorEvent,
        source: &str,
        now: DateTime<Utc>,
    ) -> InboundOutcome {
        {
            let mut seen = self.inbound_seen.lock();
            if let Some(last) = seen.get(&event) {
                if now.signed_duration_since(*last) < self.inbound_cooldown {
                    tracing::info!("Ignoring {} from {}: cooldown", event.as_str(), source);
                    return InboundOutcome::Cooldown;
                }
            }
            seen.insert(event, now);
        }

        let severity = match event.state() {
            SensorState::Alert => Severity::Danger,
            SensorState::Normal => Severity::Success,
        };
        let title = match event.state() {
            SensorState::Alert => alert_text(event.kind()).0,
            SensorState::Normal => normal_text(event.kind()).0,
        };
        self.notifications.add(title, voice_phrase(event), severity);
        self.alerts.voice(event);
        InboundOutcome::Processed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{ChatNotifier, VoiceAnnouncer};
    use crate::config::SensorConfig;
    use crate::error::NodeResult;
    use crate::sensors::{EventLog, SensorSettings};
    use async_trait::async_trait;
    use tokio::task::JoinHandle;

    #[derive(Default)]
    struct Counting {
        chats: Mutex<Vec<String>>,
        voices: Mutex<Vec<SensorEvent>>,
    }

    #[async_trait]
    impl ChatNotifier for Counting {
        async fn send_message(&self, text: &str) -> NodeResult<()> {
            self.chats.lock().push(text.to_string());
            Ok(())
        }
    }

    #[async_trait]
    impl VoiceAnnouncer for Counting {
        async fn speak(&self, _text: &str) -> NodeResult<()> {
            Ok(())
        }

        async fn announce(&self, event: SensorEvent) -> NodeResult<()> {
            self.voices.lock().push(event);
            Ok(())
        }
    }

    /// Chat backend that never answers
    struct Hung;

    #[async_trait]
    impl ChatNotifier for Hung {
        async fn send_message(&self, _text: &str) -> NodeResult<()> {
            std::future::pending().await
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + Duration::seconds(secs)
    }

    fn engine() -> Arc<DebounceEngine> {
        Arc::new(DebounceEngine::new(
            SensorSettings::from(&SensorConfig::default()),
            Arc::new(EventLog::new()),
        ))
    }

    fn dispatcher() -> (
        AlertDispatcher,
        Arc<Counting>,
        Arc<NotificationStore>,
        JoinHandle<()>,
    ) {
        let sink = Arc::new(Counting::default());
        let notifications = Arc::new(NotificationStore::new("panel"));
        let (alerts, workers) = AlertQueue::spawn(sink.clone(), sink.clone(), 16);
        let dispatcher = AlertDispatcher::new(engine(), notifications.clone(), alerts, 30);
        (dispatcher, sink, notifications, workers)
    }

    /// Drop the dispatcher and wait for queued deliveries to drain
    async fn settle(dispatcher: AlertDispatcher, workers: JoinHandle<()>) {
        drop(dispatcher);
        workers.await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_alerts_notify_once() {
        let (dispatcher, sink, notifications, workers) = dispatcher();

        for i in 0..5 {
            dispatcher.report(SensorKind::Water, SensorState::Alert, at(i));
        }
        settle(dispatcher, workers).await;

        assert_eq!(sink.chats.lock().len(), 1);
        assert_eq!(*sink.voices.lock(), vec![SensorEvent::WaterLeak]);
        assert_eq!(notifications.len(), 1);
    }

    #[tokio::test]
    async fn test_recovery_is_not_cooldown_gated() {
        let (dispatcher, sink, notifications, workers) = dispatcher();
        dispatcher.report(SensorKind::Water, SensorState::Alert, at(0));
        dispatcher.report(SensorKind::Water, SensorState::Normal, at(6));
        settle(dispatcher, workers).await;

        assert_eq!(
            *sink.voices.lock(),
            vec![SensorEvent::WaterLeak, SensorEvent::WaterNormal]
        );
        assert_eq!(sink.chats.lock().len(), 2);
        assert_eq!(notifications.recent(1)[0].severity, Severity::Success);
    }

    #[tokio::test]
    async fn test_realert_within_cooldown_is_silent() {
        let (dispatcher, sink, _, workers) = dispatcher();
        dispatcher.report(SensorKind::Water, SensorState::Alert, at(0));
        dispatcher.report(SensorKind::Water, SensorState::Normal, at(6));
        dispatcher.report(SensorKind::Water, SensorState::Alert, at(20));
        settle(dispatcher, workers).await;

        // Second alert is a real transition but both windows are still closed
        let voices = sink.voices.lock();
        assert_eq!(voices.iter().filter(|e| **e == SensorEvent::WaterLeak).count(), 1);
    }

    #[tokio::test]
    async fn test_inbound_cooldown_per_event_type() {
        let (dispatcher, sink, _, workers) = dispatcher();

        assert_eq!(
            dispatcher.relay_inbound(SensorEvent::WaterLeak, "panel", at(0)),
            InboundOutcome::Processed
        );
        assert_eq!(
            dispatcher.relay_inbound(SensorEvent::WaterLeak, "panel", at(10)),
            InboundOutcome::Cooldown
        );
        assert_eq!(
            dispatcher.relay_inbound(SensorEvent::GasAlert, "panel", at(10)),
            InboundOutcome::Processed
        );
        assert_eq!(
            dispatcher.relay_inbound(SensorEvent::WaterLeak, "panel", at(31)),
            InboundOutcome::Processed
        );
        settle(dispatcher, workers).await;
        assert_eq!(sink.voices.lock().len(), 3);
    }

    #[tokio::test]
    async fn test_hung_chat_backend_does_not_block_report() {
        let voice = Arc::new(Counting::default());
        let notifications = Arc::new(NotificationStore::new("panel"));
        let (alerts, _workers) = AlertQueue::spawn(Arc::new(Hung), voice.clone(), 4);
        let dispatcher = AlertDispatcher::new(engine(), notifications.clone(), alerts, 30);

        dispatcher.report(SensorKind::Water, SensorState::Alert, at(0));
        dispatcher.report(SensorKind::Water, SensorState::Normal, at(6));
        dispatcher.report(SensorKind::Water, SensorState::Alert, at(100));

        assert_eq!(notifications.len(), 3);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(
            *voice.voices.lock(),
            vec![
                SensorEvent::WaterLeak,
                SensorEvent::WaterNormal,
                SensorEvent::WaterLeak
            ]
        );
    }
}
