pub mod error;
pub mod signal;
pub mod stage;

pub use error::{Result, RigError};
pub use signal::{Frame, Signal};
pub use stage::{Stage, StageRecord};
