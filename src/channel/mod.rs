//! Cross-node command channel
//!
//! Best-effort HTTP request/response between the panel and the hub. The
//! server half exposes named handlers; the client half carries timeouts and
//! maps transport failures to `Unreachable`.

pub mod client;
pub mod health;
pub mod outbox;
pub mod protocol;
pub mod server;

pub use client::{PeerClient, PeerLink};
pub use health::{PeerHealth, PeerMonitor, PeerStatus};
pub use outbox::Outbox;
pub use protocol::{Ack, PeerCommand, PeerMessage};
