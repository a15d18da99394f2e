//! Environmental sensor monitoring
//!
//! Raw samples from the sensor board are noisy: a wet sensor can flicker
//! between dry and wet for several seconds. The debounce engine turns those
//! samples into confirmed transitions, the event log records every confirmed
//! transition, and the poller drives both from the hardware on a fixed cadence.
//!
//! ```text
//!            sample=alert (always)
//!   ┌────────┐ ─────────────────► ┌───────┐
//!   │ NORMAL │                    │ ALERT │
//!   └────────┘ ◄───────────────── └───────┘
//!        sample=normal, only after min_duration[kind]
//! ```

pub mod alerts;
pub mod debounce;
pub mod event_log;
pub mod poller;

use crate::error::NodeError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use alerts::{AlertDispatcher, InboundOutcome};
pub use debounce::{DebounceEngine, Delivery, SensorSettings, SensorSettingsUpdate, SensorSnapshot};
pub use event_log::{EventLog, EventLogEntry, LogScope};
pub use poller::{DeviceLink, SensorPoller};

/// Monitored sensor kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    Water,
    Gas,
}

impl SensorKind {
    pub const ALL: [SensorKind; 2] = [SensorKind::Water, SensorKind::Gas];

    pub fn as_str(&self) -> &'static str {
        match self {
            SensorKind::Water => "water",
            SensorKind::Gas => "gas",
        }
    }

    /// Wire event name announcing this sensor's alert or recovery
    pub fn event_for(&self, state: SensorState) -> SensorEvent {
        match (self, state) {
            (SensorKind::Water, SensorState::Alert) => SensorEvent::WaterLeak,
            (SensorKind::Water, SensorState::Normal) => SensorEvent::WaterNormal,
            (SensorKind::Gas, SensorState::Alert) => SensorEvent::GasAlert,
            (SensorKind::Gas, SensorState::Normal) => SensorEvent::GasNormal,
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SensorKind {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "water" => Ok(SensorKind::Water),
            "gas" => Ok(SensorKind::Gas),
            other => Err(NodeError::UnknownSensor(other.to_string())),
        }
    }
}

/// Confirmed (or raw) sensor condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SensorState {
    #[default]
    Normal,
    Alert,
}

impl FromStr for SensorState {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(SensorState::Normal),
            "alert" => Ok(SensorState::Alert),
            other => Err(NodeError::InvalidInput(format!("unknown sensor state: {}", other))),
        }
    }
}

/// A confirmed state change returned by the debounce engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub kind: SensorKind,
    pub from: SensorState,
    pub to: SensorState,
}

/// Sensor events exchanged between nodes on `POST /sensor_event`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorEvent {
    WaterLeak,
    GasAlert,
    WaterNormal,
    GasNormal,
}

impl SensorEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorEvent::WaterLeak => "water_leak",
            SensorEvent::GasAlert => "gas_alert",
            SensorEvent::WaterNormal => "water_normal",
            SensorEvent::GasNormal => "gas_normal",
        }
    }

    pub fn kind(&self) -> SensorKind {
        match self {
            SensorEvent::WaterLeak | SensorEvent::WaterNormal => SensorKind::Water,
            SensorEvent::GasAlert | SensorEvent::GasNormal => SensorKind::Gas,
        }
    }

    pub fn state(&self) -> SensorState {
        match self {
            SensorEvent::WaterLeak | SensorEvent::GasAlert => SensorState::Alert,
            SensorEvent::WaterNormal | SensorEvent::GasNormal => SensorState::Normal,
        }
    }

    /// Parse a wire name; the legacy `water_alert` / `gas_leak` spellings are accepted
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "water_leak" | "water_alert" => Some(SensorEvent::WaterLeak),
            "gas_alert" | "gas_leak" => Some(SensorEvent::GasAlert),
            "water_normal" => Some(SensorEvent::WaterNormal),
            "gas_normal" => Some(SensorEvent::GasNormal),
            _ => None,
        }
    }
}
