//! HelpMate - two-node home assistance coordinator
//!
//! A panel node owns the touch UI, the water/gas sensors and the passcode
//! keypad. A hub node owns the security and conversation subprocesses and
//! voice output and announces the reminders kept on the panel. The two exchange
//! commands and sensor events over HTTP.

pub mod capabilities;
pub mod channel;
pub mod config;
pub mod error;
pub mod gesture;
pub mod input;
pub mod logging;
pub mod mode;
pub mod node;
pub mod notifications;
pub mod reminders;
pub mod sensors;

pub use config::{Config, NodeRole};
pub use error::{NodeError, NodeResult};
pub use node::{run, Node, NodeContext, NodeOptions};
