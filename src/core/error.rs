use thiserror::Error;

use crate::supervisor::{AckKind, Component};

/// Errors raised by the rig.
///
/// Variants group into the four failure families the loop distinguishes:
/// configuration, transport, resource lifecycle and protocol. Stage failures
/// (`Shape`, `Stage`) abort only the remainder of the current tick.
#[derive(Debug, Error)]
pub enum RigError {
    #[error("unknown stage type '{0}'")]
    UnknownStage(String),

    #[error("invalid parameters for stage '{stage}': {reason}")]
    InvalidParams { stage: String, reason: String },

    #[error("dimension mismatch: expected {expected:?}, found {found:?}")]
    DimensionMismatch {
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("shared region '{name}': {reason}")]
    Resource { name: String, reason: String },

    #[error("protocol error: expected {expected:?}, received {received}")]
    Protocol { expected: AckKind, received: String },

    #[error("{0:?} is busy, request not sent")]
    Busy(Component),

    #[error("{component:?} rejected {kind:?}: {reason}")]
    Rejected {
        component: Component,
        kind: AckKind,
        reason: String,
    },

    #[error("unexpected input shape for {stage}: {reason}")]
    Shape { stage: String, reason: String },

    #[error("stage {stage} failed: {reason}")]
    Stage { stage: String, reason: String },
}

impl RigError {
    pub fn invalid_params(stage: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidParams {
            stage: stage.into(),
            reason: reason.to_string(),
        }
    }

    pub fn shape(stage: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Shape {
            stage: stage.into(),
            reason: reason.into(),
        }
    }

    pub fn resource(name: impl Into<String>, reason: impl ToString) -> Self {
        Self::Resource {
            name: name.into(),
            reason: reason.to_string(),
        }
    }

    /// True when the run loop may carry on with the next tick.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Shape { .. } | Self::Stage { .. }
        )
    }
}

pub type Result<T, E = RigError> = std::result::Result<T, E>;
