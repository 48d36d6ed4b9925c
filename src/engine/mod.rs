pub mod coordinator;
pub mod pipeline;
pub mod run_loop;
pub mod state;

pub use coordinator::Coordinator;
pub use pipeline::{DecoderPipeline, InstrumentRecord, PipelineConfig};
pub use run_loop::{
    measure_sleep_overshoot, CancelToken, RunLoop, RunLoopConfig, SessionSummary, TickRecord,
    WaitStrategy,
};
pub use state::LoopState;
