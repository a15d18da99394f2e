//! Wire types shared by both ends of the cross-node channel

use crate::error::NodeError;
use crate::sensors::SensorEvent;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;
use std::str::FromStr;

/// Mode commands understood by `POST /peer_command`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerCommand {
    OpenSecurity,
    CloseSecurity,
    HideExitButton,
    OpenConversation,
    CloseConversation,
}

impl PeerCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeerCommand::OpenSecurity => "open_security",
            PeerCommand::CloseSecurity => "close_security",
            PeerCommand::HideExitButton => "hide_exit_button",
            PeerCommand::OpenConversation => "open_conversation",
            PeerCommand::CloseConversation => "close_conversation",
        }
    }
}

impl fmt::Display for PeerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PeerCommand {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open_security" => Ok(PeerCommand::OpenSecurity),
            "close_security" => Ok(PeerCommand::CloseSecurity),
            "hide_exit_button" => Ok(PeerCommand::HideExitButton),
            "open_conversation" => Ok(PeerCommand::OpenConversation),
            "close_conversation" => Ok(PeerCommand::CloseConversation),
            other => Err(NodeError::UnknownCommand(other.to_string())),
        }
    }
}

/// Body of `POST /peer_command`
///
/// The command stays a string so unknown names can be answered with a
/// structured rejection instead of a deserialisation error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRequest {
    pub command: String,
}

/// Body of `POST /sensor_event`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorEventRequest {
    pub event: String,
    #[serde(default)]
    pub source: Option<String>,
}

/// Body of `POST /check_password`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PasswordRequest {
    pub password: String,
}

/// Body of `POST /record_video`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClipRequest {
    pub reason: Option<String>,
    pub source: Option<String>,
}

/// Body of `POST /sensor_test`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorTestRequest {
    pub sensor: String,
    pub state: String,
}

/// Body of `POST /add_reminder`; a missing time leaves the reminder unscheduled
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddReminderRequest {
    pub task: String,
    #[serde(default)]
    pub time: Option<String>,
}

/// Body of `POST /edit_reminder`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditReminderRequest {
    pub id: Uuid,
    pub time: String,
}

/// Body of `POST /delete_reminder`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteReminderRequest {
    pub id: Uuid,
}

/// Positive answer from the peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Ack {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            status: "ok".to_string(),
            message: Some(message.into()),
        }
    }
}

/// Negative answer body; either field may carry the reason
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RejectionBody {
    pub status: Option<String>,
    pub reason: Option<String>,
    pub error: Option<String>,
}

impl RejectionBody {
    pub fn into_reason(self, status: u16) -> String {
        self.reason
            .or(self.error)
            .unwrap_or_else(|| format!("http_{}", status))
    }
}

/// Messages a node sends to its peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerMessage {
    Command(PeerCommand),
    SensorEvent { event: SensorEvent, source: String },
    RecordVideo { reason: String, source: String },
}

impl PeerMessage {
    pub fn path(&self) -> &'static str {
        match self {
            PeerMessage::Command(_) => "/peer_command",
            PeerMessage::SensorEvent { .. } => "/sensor_event",
            PeerMessage::RecordVideo { .. } => "/record_video",
        }
    }

    pub fn body(&self) -> serde_json::Value {
        match self {
            PeerMessage::Command(command) => serde_json::json!({ "command": command.as_str() }),
            PeerMessage::SensorEvent { event, source } => {
                serde_json::json!({ "event": event.as_str(), "source": source })
            }
            PeerMessage::RecordVideo { reason, source } => {
                serde_json::json!({ "reason": reason, "source": source })
            }
        }
    }
}

impl fmt::Display for PeerMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerMessage::Command(command) => write!(f, "command {}", command),
            PeerMessage::SensorEvent { event, .. } => write!(f, "sensor event {}", event.as_str()),
            PeerMessage::RecordVideo { reason, .. } => write!(f, "clip request ({})", reason),
        }
    }
}
