use serde_json::Value;

use super::StageKind;
use crate::core::{Result, RigError, Signal, Stage};

/// Collapses the input to its mean. Diagnostic stage for rig checks, not
/// meant for real decoders.
#[derive(Default)]
pub struct Mean;

impl Mean {
    pub fn new() -> Self {
        Self
    }
}

impl Stage for Mean {
    fn kind(&self) -> StageKind {
        StageKind::Mean
    }

    fn process(&mut self, input: Signal) -> Result<Signal> {
        let samples: &[f64] = match &input {
            Signal::Frame(frame) => &frame.data,
            Signal::Vector(values) => values,
            Signal::Scalar(v) => return Ok(Signal::Scalar(*v)),
            Signal::Label(label) => return Ok(Signal::Scalar(*label as f64)),
        };
        if samples.is_empty() {
            return Err(RigError::shape(StageKind::Mean.tag(), "empty input"));
        }
        Ok(Signal::Scalar(samples.iter().sum::<f64>() / samples.len() as f64))
    }

    fn params(&self) -> Value {
        Value::Object(Default::default())
    }

    fn from_params(_params: &Value) -> Result<Self> {
        Ok(Self)
    }
}
