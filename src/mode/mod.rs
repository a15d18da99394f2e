//! Node mode orchestration
//!
//! MAIN / SECURITY / CONVERSATION / MUSIC, driven by confirmed user actions
//! and commands from the peer node. Only the hub owns external subprocesses.

pub mod controller;
pub mod process;
pub mod state;

pub use controller::{ModeController, ModeDeps, ModeHandle, UiAction};
pub use process::{DetachedProcess, Supervisor};
pub use state::{Effect, KeypadKey, Mode, ModeEvent, ModeMachine, ModeState, ProcessKind};
