use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::registry::{parse_params, to_params};
use super::StageKind;
use crate::core::{Result, Signal, Stage};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdParams {
    pub level: f64,
}

/// Zeroes every sample that is not strictly above `level`.
pub struct Threshold {
    params: ThresholdParams,
}

impl Threshold {
    pub fn new(level: f64) -> Self {
        Self {
            params: ThresholdParams { level },
        }
    }
}

impl Stage for Threshold {
    fn kind(&self) -> StageKind {
        StageKind::Threshold
    }

    fn process(&mut self, input: Signal) -> Result<Signal> {
        let level = self.params.level;
        Ok(input.map_samples(|v| if v > level { v } else { 0.0 }))
    }

    fn params(&self) -> Value {
        to_params(&self.params)
    }

    fn from_params(params: &Value) -> Result<Self> {
        Ok(Self {
            params: parse_params(StageKind::Threshold, params)?,
        })
    }
}
