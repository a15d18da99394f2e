//! Debounced sensor state machine
//!
//! Normal→Alert is accepted on the first alert sample. Alert→Normal is only
//! accepted once the alert has persisted for the sensor's minimum duration;
//! earlier normal samples are treated as noise. Every accepted transition is
//! appended to the event log while the sensor's lock is still held, so the
//! log order always matches the order of state changes.

use super::{EventLog, EventLogEntry, LogScope, SensorKind, SensorState, Transition};
use crate::config::{MinDurations, SensorConfig, COOLDOWN_FLOOR_SECS, MIN_DURATION_FLOOR_SECS};
use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Mutable per-sensor record, guarded by its own lock
#[derive(Debug, Clone)]
struct SensorRecord {
    state: SensorState,
    last_change_at: Option<DateTime<Utc>>,
    detected_at: Option<DateTime<Utc>>,
    last_notified_at: Option<DateTime<Utc>>,
    last_voice_alert_at: Option<DateTime<Utc>>,
    enabled: bool,
}

impl SensorRecord {
    fn new(enabled: bool) -> Self {
        Self {
            state: SensorState::Normal,
            last_change_at: None,
            detected_at: None,
            last_notified_at: None,
            last_voice_alert_at: None,
            enabled,
        }
    }
}

/// Read-only view of one sensor, as served by `/sensor_status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorSnapshot {
    pub state: SensorState,
    pub last_change: Option<DateTime<Utc>>,
    pub detected_time: Option<DateTime<Utc>>,
    pub last_notification: Option<DateTime<Utc>>,
    pub last_voice_alert: Option<DateTime<Utc>>,
    pub enabled: bool,
}

/// Runtime-tunable sensor settings, as served by `GET /sensor_config`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorSettings {
    pub water_enabled: bool,
    pub gas_enabled: bool,
    pub telegram_enabled: bool,
    pub voice_enabled: bool,
    pub min_duration: MinDurations,
    pub cooldown: i64,
    pub voice_cooldown: i64,
}

impl From<&SensorConfig> for SensorSettings {
    fn from(config: &SensorConfig) -> Self {
        Self {
            water_enabled: config.water_enabled,
            gas_enabled: config.gas_enabled,
            telegram_enabled: config.telegram_enabled,
            voice_enabled: config.voice_enabled,
            min_duration: config.min_duration,
            cooldown: config.cooldown,
            voice_cooldown: config.voice_cooldown,
        }
    }
}

impl SensorSettings {
    fn clamped(mut self) -> Self {
        self.min_duration.water = self.min_duration.water.max(MIN_DURATION_FLOOR_SECS);
        self.min_duration.gas = self.min_duration.gas.max(MIN_DURATION_FLOOR_SECS);
        self.cooldown = self.cooldown.max(COOLDOWN_FLOOR_SECS);
        self.voice_cooldown = self.voice_cooldown.max(COOLDOWN_FLOOR_SECS);
        self
    }

    fn min_duration_for(&self, kind: SensorKind) -> Duration {
        match kind {
            SensorKind::Water => Duration::seconds(self.min_duration.water),
            SensorKind::Gas => Duration::seconds(self.min_duration.gas),
        }
    }

    fn enabled_for(&self, kind: SensorKind) -> bool {
        match kind {
            SensorKind::Water => self.water_enabled,
            SensorKind::Gas => self.gas_enabled,
        }
    }
}

/// Partial update accepted by `POST /sensor_config`; absent fields are left alone
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SensorSettingsUpdate {
    pub water_enabled: Option<bool>,
    pub gas_enabled: Option<bool>,
    pub telegram_enabled: Option<bool>,
    pub voice_enabled: Option<bool>,
    pub min_duration: Option<MinDurationsUpdate>,
    pub cooldown: Option<i64>,
    pub voice_cooldown: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MinDurationsUpdate {
    pub water: Option<i64>,
    pub gas: Option<i64>,
}

/// Outbound channels cleared to fire for an accepted alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Delivery {
    pub chat: bool,
    pub voice: bool,
}

impl Delivery {
    pub fn any(&self) -> bool {
        self.chat || self.voice
    }
}

/// Per-sensor debounce and cooldown bookkeeping
pub struct DebounceEngine {
    water: Mutex<SensorRecord>,
    gas: Mutex<SensorRecord>,
    settings: RwLock<SensorSettings>,
    log: Arc<EventLog>,
}

impl DebounceEngine {
    pub fn new(settings: SensorSettings, log: Arc<EventLog>) -> Self {
        let settings = settings.clamped();
        Self {
            water: Mutex::new(SensorRecord::new(settings.water_enabled)),
            gas: Mutex::new(SensorRecord::new(settings.gas_enabled)),
            settings: RwLock::new(settings),
            log,
        }
    }

    fn record(&self, kind: SensorKind) -> &Mutex<SensorRecord> {
        match kind {
            SensorKind::Water => &self.water,
            SensorKind::Gas => &self.gas,
        }
    }

    pub fn log(&self) -> &Arc<EventLog> {
        &self.log
    }

    /// Feed one raw sample and return the confirmed transition, if any
    pub fn report_sample(
        &self,
        kind: SensorKind,
        raw: SensorState,
        now: DateTime<Utc>,
    ) -> Option<Transition> {
        let min_duration = self.settings.read().min_duration_for(kind);
        let mut record = self.record(kind).lock();

        if !record.enabled || raw == record.state {
            return None;
        }

        match raw {
            SensorState::Alert => {
                record.detected_at = Some(now);
            }
            SensorState::Normal => {
                let Some(detected_at) = record.detected_at else {
                    // Alert without a detection time can only come from a bug; recover
                    tracing::warn!("{} in alert with no detection time, accepting normal", kind);
                    return Some(self.commit(&mut record, kind, raw, now));
                };
                let elapsed = now.signed_duration_since(detected_at);
                if elapsed < min_duration {
                    tracing::debug!(
                        "{} normal sample ignored: alert held {}s of {}s",
                        kind,
                        elapsed.num_seconds(),
                        min_duration.num_seconds()
                    );
                    return None;
                }
                record.detected_at = None;
            }
        }

        Some(self.commit(&mut record, kind, raw, now))
    }

    fn commit(
        &self,
        record: &mut SensorRecord,
        kind: SensorKind,
        to: SensorState,
        now: DateTime<Utc>,
    ) -> Transition {
        let from = record.state;
        record.state = to;
        record.last_change_at = Some(now);
        if to == SensorState::Normal {
            record.detected_at = None;
        }
        self.log.append(EventLogEntry {
            timestamp: now,
            sensor: LogScope::from(kind),
            from,
            to,
        });
        tracing::info!("{}: {:?} -> {:?}", kind, from, to);
        Transition { kind, from, to }
    }

    /// Decide which outbound channels may fire for an alert on `kind`
    ///
    /// Each channel fires only if its last firing is unset or strictly older
    /// than its cooldown window; firing stamps the window. Master switches are
    /// applied afterwards, so a muted channel still consumes its window.
    pub fn claim_delivery(&self, kind: SensorKind, now: DateTime<Utc>) -> Delivery {
        let settings = self.settings.read().clone();
        let mut record = self.record(kind).lock();
        if !record.enabled {
            return Delivery::default();
        }

        let window_open = |last: Option<DateTime<Utc>>, secs: i64| {
            last.map_or(true, |t| now.signed_duration_since(t) > Duration::seconds(secs))
        };

        let chat = window_open(record.last_notified_at, settings.cooldown);
        if chat {
            record.last_notified_at = Some(now);
        }
        let voice = window_open(record.last_voice_alert_at, settings.voice_cooldown);
        if voice {
            record.last_voice_alert_at = Some(now);
        }

        Delivery {
            chat: chat && settings.telegram_enabled,
            voice: voice && settings.voice_enabled,
        }
    }

    /// Force every sensor back to normal and clear cooldowns
    pub fn reset_all(&self, now: DateTime<Utc>) {
        let mut water = self.water.lock();
        let mut gas = self.gas.lock();
        for record in [&mut *water, &mut *gas] {
            if record.state != SensorState::Normal {
                record.last_change_at = Some(now);
            }
            record.state = SensorState::Normal;
            record.detected_at = None;
            record.last_notified_at = None;
            record.last_voice_alert_at = None;
        }
        self.log.append(EventLogEntry {
            timestamp: now,
            sensor: LogScope::All,
            from: SensorState::Alert,
            to: SensorState::Normal,
        });
        tracing::info!("All sensor alerts reset");
    }

    pub fn status(&self, kind: SensorKind) -> SensorSnapshot {
        let record = self.record(kind).lock();
        SensorSnapshot {
            state: record.state,
            last_change: record.last_change_at,
            detected_time: record.detected_at,
            last_notification: record.last_notified_at,
            last_voice_alert: record.last_voice_alert_at,
            enabled: record.enabled,
        }
    }

    pub fn state(&self, kind: SensorKind) -> SensorState {
        self.record(kind).lock().state
    }

    pub fn settings(&self) -> SensorSettings {
        self.settings.read().clone()
    }

    /// Apply a partial settings update, clamping numeric fields to their floors
    pub fn update_settings(&self, update: SensorSettingsUpdate) -> SensorSettings {
        let updated = {
            let mut settings = self.settings.write();
            let mut next = settings.clone();
            if let Some(v) = update.water_enabled {
                next.water_enabled = v;
            }
            if let Some(v) = update.gas_enabled {
                next.gas_enabled = v;
            }
            if let Some(v) = update.telegram_enabled {
                next.telegram_enabled = v;
            }
            if let Some(v) = update.voice_enabled {
                next.voice_enabled = v;
            }
            if let Some(durations) = update.min_duration {
                if let Some(v) = durations.water {
                    next.min_duration.water = v;
                }
                if let Some(v) = durations.gas {
                    next.min_duration.gas = v;
                }
            }
            if let Some(v) = update.cooldown {
                next.cooldown = v;
            }
            if let Some(v) = update.voice_cooldown {
                next.voice_cooldown = v;
            }
            *settings = next.clamped();
            settings.clone()
        };

        for kind in SensorKind::ALL {
            self.record(kind).lock().enabled = updated.enabled_for(kind);
        }

        tracing::info!(
            "Sensor config updated: water={}, gas={}, cooldown={}s, voice_cooldown={}s",
            updated.water_enabled,
            updated.gas_enabled,
            updated.cooldown,
            updated.voice_cooldown
        );
        updated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + Duration::seconds(secs)
    }

    fn engine() -> DebounceEngine {
        let mut settings = SensorSettings::from(&SensorConfig::default());
        settings.gas_enabled = true;
        DebounceEngine::new(settings, Arc::new(EventLog::new()))
    }

    #[test]
    fn test_alert_then_early_normal_is_noise() {
        let engine = engine();

        let t = engine.report_sample(SensorKind::Water, SensorState::Alert, at(0));
        assert_eq!(
            t,
            Some(Transition {
                kind: SensorKind::Water,
                from: SensorState::Normal,
                to: SensorState::Alert
            })
        );

        assert_eq!(engine.report_sample(SensorKind::Water, SensorState::Normal, at(2)), None);
        assert_eq!(engine.state(SensorKind::Water), SensorState::Alert);

        let t = engine.report_sample(SensorKind::Water, SensorState::Normal, at(6));
        assert_eq!(t.map(|t| t.to), Some(SensorState::Normal));
        assert_eq!(engine.log().count_for(SensorKind::Water), 2);
        assert!(engine.status(SensorKind::Water).detected_time.is_none());
    }

    #[test]
    fn test_normal_exactly_at_min_duration_is_accepted() {
        let engine = engine();
        engine.report_sample(SensorKind::Gas, SensorState::Alert, at(0));
        assert!(engine
            .report_sample(SensorKind::Gas, SensorState::Normal, at(10))
            .is_some());
    }

    #[test]
    fn test_repeated_samples_are_noops() {
        let engine = engine();
        for i in 0..5 {
            assert!(engine.report_sample(SensorKind::Water, SensorState::Normal, at(i)).is_none());
        }
        assert!(engine.log().is_empty());

        engine.report_sample(SensorKind::Water, SensorState::Alert, at(10));
        for i in 11..15 {
            assert!(engine.report_sample(SensorKind::Water, SensorState::Alert, at(i)).is_none());
        }
        assert_eq!(engine.log().len(), 1);
        assert_eq!(engine.status(SensorKind::Water).detected_time, Some(at(10)));
    }

    #[test]
    fn test_disabled_sensor_never_transitions() {
        let engine = DebounceEngine::new(
            SensorSettings::from(&SensorConfig::default()),
            Arc::new(EventLog::new()),
        );
        assert!(engine.report_sample(SensorKind::Gas, SensorState::Alert, at(0)).is_none());
        assert_eq!(engine.claim_delivery(SensorKind::Gas, at(0)), Delivery::default());
        assert!(engine.log().is_empty());
    }

    #[test]
    fn test_cooldowns_are_independent() {
        let engine = engine();
        engine.report_sample(SensorKind::Water, SensorState::Alert, at(0));

        let first = engine.claim_delivery(SensorKind::Water, at(0));
        assert_eq!(first, Delivery { chat: true, voice: true });

        // Voice window (60s) has passed, chat window (300s) has not
        let second = engine.claim_delivery(SensorKind::Water, at(61));
        assert_eq!(second, Delivery { chat: false, voice: true });

        // Exactly at the window boundary nothing fires
        let third = engine.claim_delivery(SensorKind::Water, at(121));
        assert_eq!(third, Delivery { chat: false, voice: false });

        let fourth = engine.claim_delivery(SensorKind::Water, at(301));
        assert!(fourth.chat);
    }

    #[test]
    fn test_master_switch_mutes_channel() {
        let engine = engine();
        engine.update_settings(SensorSettingsUpdate {
            voice_enabled: Some(false),
            ..Default::default()
        });
        let delivery = engine.claim_delivery(SensorKind::Water, at(0));
        assert!(delivery.chat);
        assert!(!delivery.voice);
    }

    #[test]
    fn test_reset_all_skips_min_duration() {
        let engine = engine();
        engine.report_sample(SensorKind::Water, SensorState::Alert, at(0));
        engine.report_sample(SensorKind::Gas, SensorState::Alert, at(0));
        engine.claim_delivery(SensorKind::Water, at(0));

        engine.reset_all(at(1));

        assert_eq!(engine.state(SensorKind::Water), SensorState::Normal);
        assert_eq!(engine.state(SensorKind::Gas), SensorState::Normal);
        assert!(engine.status(SensorKind::Water).last_notification.is_none());

        let last = engine.log().recent(1, None);
        assert_eq!(last[0].sensor, LogScope::All);
        assert_eq!(engine.log().len(), 3);

        // Cooldowns cleared: the next alert notifies again
        engine.report_sample(SensorKind::Water, SensorState::Alert, at(2));
        assert!(engine.claim_delivery(SensorKind::Water, at(2)).chat);
    }

    #[test]
    fn test_update_settings_clamps() {
        let engine = engine();
        let settings = engine.update_settings(SensorSettingsUpdate {
            min_duration: Some(MinDurationsUpdate {
                water: Some(-3),
                gas: None,
            }),
            cooldown: Some(0),
            voice_cooldown: Some(-10),
            gas_enabled: Some(false),
            ..Default::default()
        });
        assert_eq!(settings.min_duration.water, MIN_DURATION_FLOOR_SECS);
        assert_eq!(settings.min_duration.gas, 10);
        assert_eq!(settings.cooldown, COOLDOWN_FLOOR_SECS);
        assert_eq!(settings.voice_cooldown, COOLDOWN_FLOOR_SECS);
        assert!(!engine.status(SensorKind::Gas).enabled);
    }

    #[test]
    fn test_concurrent_samples_log_once() {
        let engine = Arc::new(engine());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let engine = engine.clone();
                std::thread::spawn(move || {
                    engine.report_sample(SensorKind::Water, SensorState::Alert, at(0))
                })
            })
            .collect();
        let accepted = handles
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .count();
        assert_eq!(accepted, 1);
        assert_eq!(engine.log().len(), 1);
    }
}
