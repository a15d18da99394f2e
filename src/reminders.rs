//! Daily reminders
//!
//! The panel owns the list and the draft being edited in the time editor.
//! The hub reads the list over HTTP every few seconds and announces entries
//! whose time matches the wall clock, once per entry per day.

use crate::capabilities::AlertQueue;
use crate::config::ReminderConfig;
use crate::error::{NodeError, NodeResult};
use crate::notifications::{NotificationStore, Severity};
use async_trait::async_trait;
use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

/// Wire form of a reminder without a time
pub const UNSET_TIME: &str = "--:--";

/// Parse "HH:MM"; [`UNSET_TIME`] yields `None`
pub fn parse_time(text: &str) -> NodeResult<Option<NaiveTime>> {
    let text = text.trim();
    if text == UNSET_TIME {
        return Ok(None);
    }
    NaiveTime::parse_from_str(text, "%H:%M")
        .map(Some)
        .map_err(|_| NodeError::InvalidInput(format!("invalid reminder time: {:?}", text)))
}

mod hhmm {
    use super::UNSET_TIME;
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &Option<NaiveTime>, s: S) -> Result<S::Ok, S::Error> {
        match time {
            Some(time) => s.collect_str(&time.format("%H:%M")),
            None => s.serialize_str(UNSET_TIME),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<NaiveTime>, D::Error> {
        let text = String::deserialize(d)?;
        super::parse_time(&text).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reminder {
    pub id: Uuid,
    #[serde(with = "hhmm")]
    pub time: Option<NaiveTime>,
    pub task: String,
}

impl Reminder {
    /// Whether the reminder falls in the same minute as `now`
    pub fn is_due(&self, now: NaiveTime) -> bool {
        self.time.is_some_and(|t| t.hour() == now.hour() && t.minute() == now.minute())
    }
}

/// Body of `GET /reminders`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemindersBody {
    pub reminders: Vec<Reminder>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub editor: Option<TimeDraft>,
}

/// Time editor buttons
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeStep {
    HourUp,
    HourDown,
    MinuteUp,
    MinuteDown,
}

/// Time being edited for one reminder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeDraft {
    pub id: Uuid,
    pub hours: u32,
    pub minutes: u32,
}

impl TimeDraft {
    fn step(&mut self, step: TimeStep) {
        match step {
            TimeStep::HourUp => self.hours = (self.hours + 1) % 24,
            TimeStep::HourDown => self.hours = (self.hours + 23) % 24,
            TimeStep::MinuteUp => self.minutes = (self.minutes + 1) % 60,
            TimeStep::MinuteDown => self.minutes = (self.minutes + 59) % 60,
        }
    }

    fn time(&self) -> Option<NaiveTime> {
        NaiveTime::from_hms_opt(self.hours, self.minutes, 0)
    }
}

#[derive(Debug, Default)]
struct Inner {
    items: Vec<Reminder>,
    draft: Option<TimeDraft>,
}

impl Inner {
    /// Unscheduled first, then by time; ties keep insertion order
    fn sort(&mut self) {
        self.items.sort_by_key(|r| r.time);
    }

    fn position(&self, id: Uuid) -> NodeResult<usize> {
        self.items
            .iter()
            .position(|r| r.id == id)
            .ok_or_else(|| NodeError::InvalidInput(format!("no reminder with id {}", id)))
    }
}

/// Bounded, ordered reminder list kept on the panel
#[derive(Debug)]
pub struct ReminderStore {
    inner: Mutex<Inner>,
    capacity: usize,
}

impl ReminderStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            capacity: capacity.max(1),
        }
    }

    /// Build the store from config; entries with an unreadable time are skipped
    pub fn from_config(config: &ReminderConfig) -> Self {
        let store = Self::new(config.capacity);
        for entry in &config.initial {
            let added = parse_time(&entry.time).and_then(|time| store.add(&entry.task, time));
            if let Err(e) = added {
                tracing::warn!("Skipping configured reminder {:?}: {}", entry.task, e);
            }
        }
        store
    }

    pub fn list(&self) -> Vec<Reminder> {
        self.inner.lock().items.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn body(&self) -> RemindersBody {
        let inner = self.inner.lock();
        RemindersBody {
            reminders: inner.items.clone(),
            editor: inner.draft,
        }
    }

    pub fn add(&self, task: &str, time: Option<NaiveTime>) -> NodeResult<Reminder> {
        let task = task.trim();
        if task.is_empty() {
            return Err(NodeError::InvalidInput("No task provided".to_string()));
        }
        let mut inner = self.inner.lock();
        if inner.items.len() >= self.capacity {
            return Err(NodeError::InvalidInput(format!(
                "reminder list is full ({} entries)",
                self.capacity
            )));
        }
        let reminder = Reminder {
            id: Uuid::new_v4(),
            time,
            task: task.to_string(),
        };
        inner.items.insert(0, reminder.clone());
        inner.sort();
        Ok(reminder)
    }

    pub fn set_time(&self, id: Uuid, time: Option<NaiveTime>) -> NodeResult<Reminder> {
        let mut inner = self.inner.lock();
        let index = inner.position(id)?;
        inner.items[index].time = time;
        let reminder = inner.items[index].clone();
        inner.sort();
        Ok(reminder)
    }

    pub fn delete(&self, id: Uuid) -> NodeResult<Reminder> {
        let mut inner = self.inner.lock();
        let index = inner.position(id)?;
        if inner.draft.is_some_and(|d| d.id == id) {
            inner.draft = None;
        }
        Ok(inner.items.remove(index))
    }

    /// Open the editor on the reminder at `index` in list order
    pub fn begin_edit(&self, index: usize, now: NaiveTime) -> NodeResult<TimeDraft> {
        let id = {
            let inner = self.inner.lock();
            inner
                .items
                .get(index)
                .map(|r| r.id)
                .ok_or_else(|| NodeError::InvalidInput(format!("no reminder at {}", index)))?
        };
        self.begin_edit_id(id, now)
    }

    /// Open the editor on `id`, starting from its time or `now` when unscheduled
    pub fn begin_edit_id(&self, id: Uuid, now: NaiveTime) -> NodeResult<TimeDraft> {
        let mut inner = self.inner.lock();
        let index = inner.position(id)?;
        let start = inner.items[index].time.unwrap_or(now);
        let draft = TimeDraft {
            id,
            hours: start.hour(),
            minutes: start.minute(),
        };
        inner.draft = Some(draft);
        Ok(draft)
    }

    pub fn adjust(&self, step: TimeStep) -> Option<TimeDraft> {
        let mut inner = self.inner.lock();
        let draft = inner.draft.as_mut()?;
        draft.step(step);
        Some(*draft)
    }

    pub fn draft(&self) -> Option<TimeDraft> {
        self.inner.lock().draft
    }

    /// Write the draft time back to its reminder and close the draft
    pub fn save_draft(&self) -> NodeResult<Reminder> {
        let draft = self.take_draft()?;
        self.set_time(draft.id, draft.time())
    }

    /// Delete the reminder being edited
    pub fn delete_draft(&self) -> NodeResult<Reminder> {
        let draft = self.take_draft()?;
        self.delete(draft.id)
    }

    pub fn cancel_edit(&self) {
        self.inner.lock().draft = None;
    }

    fn take_draft(&self) -> NodeResult<TimeDraft> {
        self.inner
            .lock()
            .draft
            .take()
            .ok_or_else(|| NodeError::InvalidInput("no reminder is being edited".to_string()))
    }
}

/// Where the hub reads the reminder list from
#[async_trait]
pub trait ReminderSource: Send + Sync {
    async fn reminders(&self) -> NodeResult<Vec<Reminder>>;
}

#[async_trait]
impl ReminderSource for ReminderStore {
    async fn reminders(&self) -> NodeResult<Vec<Reminder>> {
        Ok(self.list())
    }
}

/// Hub task announcing due reminders by voice, notification and chat
pub struct ReminderChecker {
    source: Arc<dyn ReminderSource>,
    alerts: AlertQueue,
    notifications: Arc<NotificationStore>,
    interval: Duration,
    announced: Mutex<HashSet<(Uuid, NaiveDate, NaiveTime)>>,
}

impl ReminderChecker {
    pub fn new(
        source: Arc<dyn ReminderSource>,
        alerts: AlertQueue,
        notifications: Arc<NotificationStore>,
        config: &ReminderConfig,
    ) -> Self {
        Self {
            source,
            alerts,
            notifications,
            interval: Duration::from_secs(config.check_interval_secs.max(1)),
            announced: Mutex::new(HashSet::new()),
        }
    }

    /// Announce reminders due at `now`; returns how many were announced
    pub async fn check(&self, now: NaiveDateTime) -> usize {
        let reminders = match self.source.reminders().await {
            Ok(reminders) => reminders,
            Err(e) => {
                tracing::debug!("Reminder check skipped: {}", e);
                return 0;
            }
        };

        let today = now.date();
        let mut announced = self.announced.lock();
        announced.retain(|(_, date, _)| *date == today);

        let mut count = 0;
        for reminder in reminders.iter().filter(|r| r.is_due(now.time())) {
            let Some(time) = reminder.time else { continue };
            if !announced.insert((reminder.id, today, time)) {
                continue;
            }
            tracing::info!("Reminder due: {}", reminder.task);
            self.notifications.add("REMINDER", &reminder.task, Severity::Info);
            self.alerts.speak(format!("Task: {}", reminder.task));
            self.alerts.chat(format!("Reminder: {}", reminder.task));
            count += 1;
        }
        count
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("Reminder checker started ({:?} interval)", self.interval);
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check(Local::now().naive_local()).await;
                }
                _ = shutdown.changed() => break,
            }
        }
        tracing::info!("Reminder checker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{ChatNotifier, VoiceAnnouncer};
    use crate::config::ReminderEntry;

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn on(day: u32, h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, day)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[derive(Default)]
    struct Sink {
        chats: Mutex<Vec<String>>,
        spoken: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ChatNotifier for Sink {
        async fn send_message(&self, text: &str) -> NodeResult<()> {
            self.chats.lock().push(text.to_string());
            Ok(())
        }
    }

    #[async_trait]
    impl VoiceAnnouncer for Sink {
        async fn speak(&self, text: &str) -> NodeResult<()> {
            self.spoken.lock().push(text.to_string());
            Ok(())
        }
    }

    struct Offline;

    #[async_trait]
    impl ReminderSource for Offline {
        async fn reminders(&self) -> NodeResult<Vec<Reminder>> {
            Err(NodeError::Unreachable("connection refused".into()))
        }
    }

    #[test]
    fn test_time_parsing() {
        assert_eq!(parse_time("08:30").unwrap(), Some(hm(8, 30)));
        assert_eq!(parse_time("--:--").unwrap(), None);
        assert!(parse_time("25:00").is_err());
        assert!(parse_time("soon").is_err());
    }

    #[test]
    fn test_wire_format() {
        let store = ReminderStore::new(4);
        store.add("Walk", Some(hm(10, 0))).unwrap();
        store.add("Call Anna", None).unwrap();

        let json = serde_json::to_value(store.body()).unwrap();
        assert_eq!(json["reminders"][0]["time"], "--:--");
        assert_eq!(json["reminders"][1]["time"], "10:00");
        assert_eq!(json["reminders"][1]["task"], "Walk");
        assert!(json.get("editor").is_none());

        let back: RemindersBody = serde_json::from_value(json).unwrap();
        assert_eq!(back.reminders, store.list());
    }

    #[test]
    fn test_list_is_sorted_and_bounded() {
        let store = ReminderStore::new(3);
        store.add("Dinner", Some(hm(19, 0))).unwrap();
        store.add("Breakfast", Some(hm(8, 0))).unwrap();
        store.add("  New  ", None).unwrap();

        let tasks: Vec<_> = store.list().into_iter().map(|r| r.task).collect();
        assert_eq!(tasks, vec!["New", "Breakfast", "Dinner"]);

        assert!(store.add("Overflow", None).is_err());
        assert!(store.add("   ", None).is_err());
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_from_config_skips_bad_times() {
        let config = ReminderConfig {
            capacity: 10,
            check_interval_secs: 30,
            initial: vec![
                ReminderEntry {
                    time: "12:00".into(),
                    task: "Medication A".into(),
                },
                ReminderEntry {
                    time: "noon".into(),
                    task: "Broken".into(),
                },
            ],
        };
        let store = ReminderStore::from_config(&config);
        assert_eq!(store.len(), 1);
        assert_eq!(store.list()[0].time, Some(hm(12, 0)));
    }

    #[test]
    fn test_editor_wraps_and_saves() {
        let store = ReminderStore::new(8);
        store.add("Walk", Some(hm(23, 59))).unwrap();
        store.add("Lunch", Some(hm(14, 0))).unwrap();

        let draft = store.begin_edit(1, hm(9, 0)).unwrap();
        assert_eq!((draft.hours, draft.minutes), (23, 59));
        store.adjust(TimeStep::HourUp);
        let draft = store.adjust(TimeStep::MinuteUp).unwrap();
        assert_eq!((draft.hours, draft.minutes), (0, 0));
        store.adjust(TimeStep::MinuteDown);

        let saved = store.save_draft().unwrap();
        assert_eq!(saved.task, "Walk");
        assert_eq!(saved.time, Some(hm(0, 59)));
        assert_eq!(store.list()[0].task, "Walk");
        assert!(store.draft().is_none());
        assert!(store.save_draft().is_err());
    }

    #[test]
    fn test_unscheduled_edit_starts_from_now() {
        let store = ReminderStore::new(8);
        let reminder = store.add("Call Anna", None).unwrap();

        let draft = store.begin_edit_id(reminder.id, hm(7, 45)).unwrap();
        assert_eq!((draft.hours, draft.minutes), (7, 45));

        store.delete_draft().unwrap();
        assert!(store.is_empty());
        assert!(store.begin_edit(0, hm(7, 45)).is_err());
    }

    #[tokio::test]
    async fn test_due_reminder_announced_once_per_day() {
        let store = Arc::new(ReminderStore::new(8));
        store.add("Medication A", Some(hm(12, 0))).unwrap();
        store.add("Walk", Some(hm(10, 0))).unwrap();
        store.add("Unscheduled", None).unwrap();

        let sink = Arc::new(Sink::default());
        let (alerts, workers) = AlertQueue::spawn(sink.clone(), sink.clone(), 8);
        let notifications = Arc::new(NotificationStore::new("hub"));
        let checker = ReminderChecker::new(
            store.clone(),
            alerts,
            notifications.clone(),
            &ReminderConfig::default(),
        );

        assert_eq!(checker.check(on(1, 11, 59, 50)).await, 0);
        assert_eq!(checker.check(on(1, 12, 0, 5)).await, 1);
        // Second poll inside the same minute
        assert_eq!(checker.check(on(1, 12, 0, 35)).await, 0);
        // Next day
        assert_eq!(checker.check(on(2, 12, 0, 10)).await, 1);

        assert_eq!(notifications.len(), 2);
        assert_eq!(notifications.recent(1)[0].title, "REMINDER");

        drop(checker);
        workers.await.unwrap();
        assert_eq!(
            *sink.spoken.lock(),
            vec!["Task: Medication A".to_string(), "Task: Medication A".to_string()]
        );
        assert_eq!(sink.chats.lock()[0], "Reminder: Medication A");
    }

    #[tokio::test]
    async fn test_unreachable_source_is_skipped() {
        let sink = Arc::new(Sink::default());
        let (alerts, _) = AlertQueue::spawn(sink.clone(), sink.clone(), 8);
        let notifications = Arc::new(NotificationStore::new("hub"));
        let checker = ReminderChecker::new(
            Arc::new(Offline),
            alerts,
            notifications.clone(),
            &ReminderConfig::default(),
        );

        assert_eq!(checker.check(on(1, 12, 0, 0)).await, 0);
        assert!(notifications.is_empty());
    }
}
