use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::registry::{parse_params, to_params};
use super::StageKind;
use crate::core::{Result, Signal, Stage};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScaleParams {
    pub scale: f64,
}

/// Linear rescale of every sample.
pub struct Scale {
    params: ScaleParams,
}

impl Scale {
    pub fn new(scale: f64) -> Self {
        Self {
            params: ScaleParams { scale },
        }
    }
}

impl Stage for Scale {
    fn kind(&self) -> StageKind {
        StageKind::Scale
    }

    fn process(&mut self, input: Signal) -> Result<Signal> {
        let scale = self.params.scale;
        Ok(match input {
            Signal::Label(label) => Signal::Scalar(label as f64 * scale),
            other => other.map_samples(|v| v * scale),
        })
    }

    fn params(&self) -> Value {
        to_params(&self.params)
    }

    fn from_params(params: &Value) -> Result<Self> {
        Ok(Self {
            params: parse_params(StageKind::Scale, params)?,
        })
    }
}
