//! Request/acknowledgement protocol between the operator and the hosts that
//! own the rig's hardware, plus the shared status board.

pub mod control;
pub mod harness;
pub mod host;
pub mod imaging;
pub mod messages;
pub mod receiver;
pub mod state;

pub use control::ControlClient;
pub use harness::HarnessHost;
pub use host::{mailbox, serve, spawn_host, Host, HostHandle, Mailbox, MAX_REQUEST_DURATION};
pub use imaging::ImagingHost;
pub use messages::{AckKind, Component, Envelope, Reply, ReplyHandle, Request};
pub use receiver::ReceiverHost;
pub use state::{SessionState, SharedState, STATE_VERSION};
