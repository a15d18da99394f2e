//! Configuration management for HelpMate nodes
//!
//! Settings are stored in `~/.helpmate/config.json` (or the path given with
//! `--config`) with schema versioning and migrations. Unlike the runtime
//! sensor settings, which can be changed over HTTP, the file is only read at
//! startup and written back after a migration.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Current config schema version
const CURRENT_VERSION: u32 = 1;

/// Floor for sensor minimum alert durations (seconds)
pub const MIN_DURATION_FLOOR_SECS: i64 = 1;

/// Floor for notification and voice cooldown windows (seconds)
pub const COOLDOWN_FLOOR_SECS: i64 = 10;

/// Line speed the sensor board firmware is built for
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Schema version for migrations
    pub version: u32,
    /// Node identity and addressing
    pub node: NodeConfig,
    /// Sensor debounce and notification settings
    pub sensors: SensorConfig,
    /// Passcode settings for leaving security mode
    pub security: SecurityConfig,
    /// Hold-to-confirm input settings
    pub input: InputConfig,
    /// Cross-node channel settings
    pub channel: ChannelConfig,
    /// External mode subprocesses
    pub processes: ProcessConfig,
    /// Daily reminders kept on the panel and announced by the hub
    pub reminders: ReminderConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            node: NodeConfig::default(),
            sensors: SensorConfig::default(),
            security: SecurityConfig::default(),
            input: InputConfig::default(),
            channel: ChannelConfig::default(),
            processes: ProcessConfig::default(),
            reminders: ReminderConfig::default(),
        }
    }
}

/// Which half of the two-node deployment this process is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    /// UI/sensor node: owns the sensors, the touch input and the passcode keypad
    #[default]
    Panel,
    /// Controller node: owns the security/conversation subprocesses and voice output
    Hub,
}

impl NodeRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeRole::Panel => "panel",
            NodeRole::Hub => "hub",
        }
    }

    /// Whether mode subprocesses are spawned on this node
    pub fn owns_subprocesses(&self) -> bool {
        matches!(self, NodeRole::Hub)
    }
}

impl std::str::FromStr for NodeRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "panel" => Ok(NodeRole::Panel),
            "hub" => Ok(NodeRole::Hub),
            other => Err(format!("unknown node role: {}", other)),
        }
    }
}

/// Node identity and addressing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Role of this node
    pub role: NodeRole,
    /// Name used as `sourceNode` on notifications and `source` on forwarded events
    pub name: String,
    /// Address the HTTP surface binds to
    pub listen_addr: String,
    /// Base URL of the peer node (e.g. "http://192.168.1.20:5000")
    pub peer_url: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            role: NodeRole::Panel,
            name: "panel".to_string(),
            listen_addr: "0.0.0.0:8000".to_string(),
            peer_url: "http://127.0.0.1:5000".to_string(),
        }
    }
}

/// Per-sensor minimum alert durations in seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MinDurations {
    pub water: i64,
    pub gas: i64,
}

impl Default for MinDurations {
    fn default() -> Self {
        Self { water: 5, gas: 10 }
    }
}

/// Sensor debounce and notification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    pub water_enabled: bool,
    /// The deployed gas sensor is not wired, so it starts disabled
    pub gas_enabled: bool,
    /// Master switch for chat notifications
    pub telegram_enabled: bool,
    /// Master switch for voice alerts
    pub voice_enabled: bool,
    /// Minimum time an alert must persist before a return to normal is accepted
    pub min_duration: MinDurations,
    /// Chat notification cooldown in seconds
    pub cooldown: i64,
    /// Voice alert cooldown in seconds
    pub voice_cooldown: i64,
    /// Hub-side dedup window for inbound sensor events in seconds
    pub event_cooldown: i64,
    /// Serial port of the sensor board; None disables polling
    pub source_path: Option<String>,
    /// Serial line speed of the sensor board
    pub baud_rate: u32,
    /// Seconds between applied samples; only the latest line read in each interval is used
    pub sample_interval_secs: u64,
    /// Seconds without a valid sample before the device counts as disconnected
    pub stale_after_secs: u64,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            water_enabled: true,
            gas_enabled: false,
            telegram_enabled: true,
            voice_enabled: true,
            min_duration: MinDurations::default(),
            cooldown: 300,
            voice_cooldown: 60,
            event_cooldown: 30,
            source_path: Some("/dev/ttyACM0".to_string()),
            baud_rate: DEFAULT_BAUD_RATE,
            sample_interval_secs: 2,
            stale_after_secs: 30,
        }
    }
}

/// Passcode configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Six-digit shared passcode
    pub passcode: String,
    /// Consecutive mismatches before the attempt counter resets
    pub max_attempts: u32,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            passcode: "123456".to_string(),
            max_attempts: 3,
        }
    }
}

/// Hold-to-confirm input configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Minimum hold before an action is confirmed (milliseconds)
    pub hold_time_ms: u64,
    /// Input loop frequency
    pub tick_hz: u32,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            hold_time_ms: 300,
            tick_hz: 60,
        }
    }
}

/// Cross-node channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Timeout for peer commands (clamped to 2..=5 seconds)
    pub command_timeout_secs: u64,
    /// Timeout for the reachability ping
    pub ping_timeout_secs: u64,
    /// Capacity of the best-effort outbound queue
    pub outbox_capacity: usize,
    /// Maximum accepted request body in kilobytes
    pub body_limit_kb: usize,
    /// Seconds between peer health checks on the panel
    pub health_interval_secs: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: 5,
            ping_timeout_secs: 2,
            outbox_capacity: 64,
            body_limit_kb: 64,
            health_interval_secs: 10,
        }
    }
}

/// External subprocesses started as mode side effects (hub only)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    /// argv for the security monitor; None keeps security in-process
    pub security_command: Option<Vec<String>>,
    /// argv for the conversation agent; None keeps conversation in-process
    pub conversation_command: Option<Vec<String>>,
    /// Seconds to wait after SIGTERM before killing
    pub stop_grace_secs: u64,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            security_command: None,
            conversation_command: None,
            stop_grace_secs: 5,
        }
    }
}

/// One configured reminder; `time` is "HH:MM" or "--:--" for unscheduled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderEntry {
    pub time: String,
    pub task: String,
}

impl ReminderEntry {
    fn new(time: &str, task: &str) -> Self {
        Self {
            time: time.to_string(),
            task: task.to_string(),
        }
    }
}

/// Reminder list configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReminderConfig {
    /// Maximum number of stored reminders
    pub capacity: usize,
    /// Seconds between due-reminder checks on the hub
    pub check_interval_secs: u64,
    /// Reminders loaded at startup
    pub initial: Vec<ReminderEntry>,
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            capacity: 50,
            check_interval_secs: 30,
            initial: vec![
                ReminderEntry::new("08:00", "Breakfast and vitamins"),
                ReminderEntry::new("10:00", "Walk"),
                ReminderEntry::new("12:00", "Medication A"),
                ReminderEntry::new("14:00", "Lunch"),
                ReminderEntry::new("15:00", "Afternoon rest"),
                ReminderEntry::new("16:30", "Snack"),
                ReminderEntry::new("18:00", "Medication B"),
                ReminderEntry::new("19:00", "Dinner"),
            ],
        }
    }
}

impl Config {
    /// Clamp numeric fields to their floors and repair invalid values
    ///
    /// Out-of-range values are never rejected; they are pulled back into range
    /// with a warning so a hand-edited file cannot stop the node from starting.
    pub fn sanitised(mut self) -> Self {
        let sensors = &mut self.sensors;
        sensors.min_duration.water = sensors.min_duration.water.max(MIN_DURATION_FLOOR_SECS);
        sensors.min_duration.gas = sensors.min_duration.gas.max(MIN_DURATION_FLOOR_SECS);
        sensors.cooldown = sensors.cooldown.max(COOLDOWN_FLOOR_SECS);
        sensors.voice_cooldown = sensors.voice_cooldown.max(COOLDOWN_FLOOR_SECS);
        sensors.event_cooldown = sensors.event_cooldown.max(1);
        if sensors.baud_rate == 0 {
            sensors.baud_rate = DEFAULT_BAUD_RATE;
        }
        sensors.sample_interval_secs = sensors.sample_interval_secs.max(1);
        sensors.stale_after_secs = sensors.stale_after_secs.max(sensors.sample_interval_secs);

        if !is_valid_passcode(&self.security.passcode) {
            tracing::warn!("Configured passcode is not six digits, falling back to default");
            self.security.passcode = SecurityConfig::default().passcode;
        }
        self.security.max_attempts = self.security.max_attempts.max(1);

        self.input.hold_time_ms = self.input.hold_time_ms.max(50);
        self.input.tick_hz = self.input.tick_hz.clamp(1, 240);

        self.channel.command_timeout_secs = self.channel.command_timeout_secs.clamp(2, 5);
        self.channel.ping_timeout_secs = self.channel.ping_timeout_secs.clamp(1, 5);
        self.channel.outbox_capacity = self.channel.outbox_capacity.max(1);
        self.channel.body_limit_kb = self.channel.body_limit_kb.max(1);
        self.channel.health_interval_secs = self.channel.health_interval_secs.max(1);

        self.processes.stop_grace_secs = self.processes.stop_grace_secs.max(1);

        self.reminders.capacity = self.reminders.capacity.max(1);
        self.reminders.check_interval_secs = self.reminders.check_interval_secs.clamp(1, 60);
        if self.reminders.initial.len() > self.reminders.capacity {
            tracing::warn!(
                "{} initial reminders exceed capacity {}, truncating",
                self.reminders.initial.len(),
                self.reminders.capacity
            );
            self.reminders.initial.truncate(self.reminders.capacity);
        }
        self
    }
}

/// Whether a passcode is exactly six ASCII digits
pub fn is_valid_passcode(code: &str) -> bool {
    code.len() == 6 && code.chars().all(|c| c.is_ascii_digit())
}

/// Get the path to the default config file (~/.helpmate/config.json)
pub fn default_config_path() -> PathBuf {
    helpmate_dir().join("config.json")
}

/// Get the HelpMate data directory, falling back to /tmp if home is unavailable
pub fn helpmate_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| {
            tracing::error!("Could not determine home directory, using /tmp");
            PathBuf::from("/tmp")
        })
        .join(".helpmate")
}

/// Load configuration from disk
///
/// A missing file is not an error: defaults are returned.
pub fn load_from_disk(path: &Path) -> Result<Config> {
    if !path.exists() {
        tracing::info!("Config file {:?} not found, using defaults", path);
        return Ok(Config::default());
    }

    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {:?}", path))?;

    let config: Config =
        serde_json::from_str(&contents).context("Failed to parse config")?;

    migrate_config(config, path)
}

/// Load configuration, falling back to defaults on any error
pub fn load_or_default(path: &Path) -> Config {
    let config = load_from_disk(path).unwrap_or_else(|e| {
        tracing::error!("Failed to load config, using defaults: {:#}", e);
        Config::default()
    });
    tracing::info!(
        "Config loaded: role={}, listen={}, peer={}",
        config.node.role.as_str(),
        config.node.listen_addr,
        config.node.peer_url
    );
    config.sanitised()
}

/// Save configuration to disk, creating the parent directory if needed
pub fn save_to_disk(config: &Config, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        if !dir.exists() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create config directory {:?}", dir))?;
        }
    }

    let contents =
        serde_json::to_string_pretty(config).context("Failed to serialise config")?;
    fs::write(path, contents).with_context(|| format!("Failed to write config file {:?}", path))?;

    tracing::info!("Config saved to {:?}", path);
    Ok(())
}

/// Migrate configuration from older schema versions
fn migrate_config(mut config: Config, path: &Path) -> Result<Config> {
    let original_version = config.version;

    while config.version < CURRENT_VERSION {
        config = apply_migration(config)?;
    }

    if config.version != original_version {
        tracing::info!(
            "Migrated config from version {} to {}",
            original_version,
            config.version
        );
        save_to_disk(&config, path)?;
    }

    Ok(config)
}

/// Apply a single migration step
fn apply_migration(config: Config) -> Result<Config> {
    match config.version {
        // Version 0 files predate the schema field; every section defaults in
        0 => {
            let mut migrated = config;
            migrated.version = 1;
            Ok(migrated)
        }
        v => Err(anyhow!("Unknown config version: {}", v)),
    }
}
