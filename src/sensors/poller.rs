//! Serial sample source
//!
//! The sensor board prints one two-character line per reading: the first
//! character is the water sensor, the second the gas sensor, and `1` means the
//! alert condition is present. A reader thread owns the serial port; the
//! poller applies the most recent line once per sample interval, feeds the
//! alert dispatcher, and tracks whether the board is still talking to us.

use super::{AlertDispatcher, SensorKind, SensorState};
use crate::config::SensorConfig;
use crate::notifications::{NotificationStore, Severity};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::io::{BufRead, ErrorKind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Parse one board line into (water, gas) conditions
pub fn parse_line(line: &str) -> Option<[SensorState; 2]> {
    let bytes = line.trim().as_bytes();
    if bytes.len() != 2 {
        return None;
    }
    let state = |b: u8| match b {
        b'0' => Some(SensorState::Normal),
        b'1' => Some(SensorState::Alert),
        _ => None,
    };
    Some([state(bytes[0])?, state(bytes[1])?])
}

/// Connection health of the sample source
#[derive(Debug, Default)]
pub struct DeviceLink {
    connected: AtomicBool,
    last_data_at: Mutex<Option<DateTime<Utc>>>,
    watching_since: Mutex<Option<DateTime<Utc>>>,
    disconnect_reported: AtomicBool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatus {
    pub connected: bool,
    pub last_data: Option<DateTime<Utc>>,
}

impl DeviceLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the silence clock for a source that has not sent anything yet
    pub fn start_watching(&self, now: DateTime<Utc>) {
        self.watching_since.lock().get_or_insert(now);
    }

    /// Record a valid sample; returns true if the device was previously disconnected
    pub fn record_data(&self, now: DateTime<Utc>) -> bool {
        *self.last_data_at.lock() = Some(now);
        self.disconnect_reported.store(false, Ordering::SeqCst);
        !self.connected.swap(true, Ordering::SeqCst)
    }

    /// Mark the device disconnected if it has been silent too long
    ///
    /// Returns true exactly once per disconnect, so the caller raises a
    /// single notification.
    pub fn check_stale(&self, now: DateTime<Utc>, stale_after: ChronoDuration) -> bool {
        let last_data = *self.last_data_at.lock();
        let watching_since = *self.watching_since.lock();
        let silent = match last_data.or(watching_since) {
            Some(last) => now.signed_duration_since(last) > stale_after,
            None => false,
        };
        if !silent {
            return false;
        }
        self.connected.store(false, Ordering::SeqCst);
        !self.disconnect_reported.swap(true, Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> DeviceStatus {
        DeviceStatus {
            connected: self.is_connected(),
            last_data: *self.last_data_at.lock(),
        }
    }
}

/// Read timeout on the serial port; bounds how long the reader takes to notice a stop request
const SERIAL_TIMEOUT: Duration = Duration::from_secs(1);

/// Delay before reopening a port that failed or closed
const REOPEN_DELAY: Duration = Duration::from_secs(2);

/// Blocking reader for the sensor board's serial port
///
/// Publishes every complete line on a watch channel, so the consumer always
/// sees the most recent reading. Reopens the port after errors until `stop`
/// is set.
struct SerialReader {
    path: String,
    baud_rate: u32,
    latest: watch::Sender<Option<String>>,
    stop: Arc<AtomicBool>,
}

impl SerialReader {
    fn run(self) {
        tracing::info!("Serial reader started on {} @ {} baud", self.path, self.baud_rate);
        while !self.stop.load(Ordering::SeqCst) {
            match serialport::new(self.path.as_str(), self.baud_rate)
                .timeout(SERIAL_TIMEOUT)
                .open()
            {
                Ok(port) => self.read_lines(port),
                Err(e) => tracing::debug!("Cannot open {}: {}", self.path, e),
            }
            if !self.stop.load(Ordering::SeqCst) {
                std::thread::sleep(REOPEN_DELAY);
            }
        }
        tracing::info!("Serial reader stopped");
    }

    fn read_lines(&self, port: Box<dyn serialport::SerialPort>) {
        let mut reader = std::io::BufReader::new(port);
        let mut buf = Vec::new();

        while !self.stop.load(Ordering::SeqCst) {
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => {
                    tracing::debug!("Serial port {} closed", self.path);
                    return;
                }
                Ok(_) => {
                    if buf.ends_with(b"\n") {
                        let line = String::from_utf8_lossy(&buf).trim().to_string();
                        buf.clear();
                        if self.latest.send(Some(line)).is_err() {
                            // Poller is gone
                            return;
                        }
                    }
                }
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {}
                Err(e) => {
                    tracing::warn!("Error reading {}: {}", self.path, e);
                    return;
                }
            }
        }
    }
}

/// Samples the sensor board and drives the debounce engine
pub struct SensorPoller {
    path: String,
    baud_rate: u32,
    interval: Duration,
    stale_after: ChronoDuration,
    dispatcher: Arc<AlertDispatcher>,
    device: Arc<DeviceLink>,
    notifications: Arc<NotificationStore>,
}

impl SensorPoller {
    pub fn new(
        path: impl Into<String>,
        sensors: &SensorConfig,
        dispatcher: Arc<AlertDispatcher>,
        device: Arc<DeviceLink>,
        notifications: Arc<NotificationStore>,
    ) -> Self {
        Self {
            path: path.into(),
            baud_rate: sensors.baud_rate,
            interval: Duration::from_secs(sensors.sample_interval_secs.max(1)),
            stale_after: ChronoDuration::seconds(sensors.stale_after_secs as i64),
            dispatcher,
            device,
            notifications,
        }
    }

    /// Apply one line read from the board
    pub fn handle_line(&self, line: &str, now: DateTime<Utc>) {
        let Some([water, gas]) = parse_line(line) else {
            tracing::debug!("Skipping malformed sensor line: {:?}", line);
            return;
        };
        if self.device.record_data(now) {
            tracing::info!("Sensor board connected on {}", self.path);
        }
        self.dispatcher.report(SensorKind::Water, water, now);
        self.dispatcher.report(SensorKind::Gas, gas, now);
    }

    /// Raise the one-off disconnect warning if the board went quiet
    pub fn check_health(&self, now: DateTime<Utc>) {
        if self.device.check_stale(now, self.stale_after) {
            tracing::warn!(
                "No sensor data for {}s, device disconnected",
                self.stale_after.num_seconds()
            );
            self.notifications.add(
                "SENSOR OFFLINE",
                "Sensor board stopped sending data",
                Severity::Warning,
            );
        }
    }

    /// Open the serial port on a reader thread and sample it until shutdown
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        let (latest_tx, latest_rx) = watch::channel(None);
        let stop = Arc::new(AtomicBool::new(false));
        let reader = SerialReader {
            path: self.path.clone(),
            baud_rate: self.baud_rate,
            latest: latest_tx,
            stop: stop.clone(),
        };
        if let Err(e) = std::thread::Builder::new()
            .name("sensor-serial".to_string())
            .spawn(move || reader.run())
        {
            tracing::error!("Failed to start serial reader thread: {}", e);
        }

        self.run_with(latest_rx, shutdown).await;
        stop.store(true, Ordering::SeqCst);
    }

    /// Apply the latest line once per interval and check device health
    pub async fn run_with(
        &self,
        mut latest: watch::Receiver<Option<String>>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        tracing::info!("Sensor poller started ({:?} interval)", self.interval);
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        self.device.start_watching(Utc::now());

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let line = match latest.has_changed() {
                        Ok(true) => latest.borrow_and_update().clone(),
                        _ => None,
                    };
                    let now = Utc::now();
                    if let Some(line) = line {
                        self.handle_line(&line, now);
                    }
                    self.check_health(now);
                }
                _ = shutdown.changed() => break,
            }
        }
        tracing::info!("Sensor poller stopped");
    }
}
