//! Error taxonomy shared by every node component
//!
//! Sensor and peer failures are recovered locally by their callers; these
//! variants exist so each layer can decide whether a failure is fatal to the
//! operation it was attempting.

/// Domain errors raised by the debounce engine, mode controller and peer channel
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NodeError {
    #[error("Unknown sensor: {0}")]
    UnknownSensor(String),

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Peer unreachable: {0}")]
    Unreachable(String),

    #[error("Peer rejected request: {reason}")]
    Rejected { reason: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Subprocess failure: {0}")]
    SubprocessFailure(String),

    #[error("Mode controller stopped")]
    Stopped,
}

impl NodeError {
    /// Short machine-readable tag used in HTTP error bodies
    pub fn reason(&self) -> &str {
        match self {
            NodeError::UnknownSensor(_) => "unknown_sensor",
            NodeError::UnknownCommand(_) => "unknown_command",
            NodeError::Unreachable(_) => "unreachable",
            NodeError::Rejected { reason } => reason,
            NodeError::InvalidInput(_) => "invalid_input",
            NodeError::SubprocessFailure(_) => "subprocess_failure",
            NodeError::Stopped => "stopped",
        }
    }
}

pub type NodeResult<T> = Result<T, NodeError>;
