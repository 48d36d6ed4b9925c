pub mod metrics;
pub mod monitor;

pub use metrics::{LatencySnapshot, TickMetrics};
pub use monitor::{session_report, window_report};
