use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::Result;
use super::Signal;
use crate::stages::StageKind;

/// Declarative form of one stage: its registry tag plus parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: String,
    #[serde(default)]
    pub params: Value,
}

/// Base trait for every step of a decoder pipeline.
///
/// A stage owns whatever running state it needs (moving averages, last
/// velocity) and only mutates it from `process`.
pub trait Stage: Send {
    fn kind(&self) -> StageKind;

    /// Transform the previous stage's output.
    fn process(&mut self, input: Signal) -> Result<Signal>;

    /// Parameters needed to rebuild this stage.
    fn params(&self) -> Value;

    /// Rebuild from parameters written by `params`.
    fn from_params(params: &Value) -> Result<Self>
    where
        Self: Sized;

    fn to_config(&self) -> StageRecord {
        StageRecord {
            stage: self.kind().tag().to_string(),
            params: self.params(),
        }
    }
}
