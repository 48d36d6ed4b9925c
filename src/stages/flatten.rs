use serde_json::Value;

use super::StageKind;
use crate::core::{Result, RigError, Signal, Stage};

/// Frame to row-major vector.
#[derive(Default)]
pub struct Flatten;

impl Flatten {
    pub fn new() -> Self {
        Self
    }
}

impl Stage for Flatten {
    fn kind(&self) -> StageKind {
        StageKind::Flatten
    }

    fn process(&mut self, input: Signal) -> Result<Signal> {
        match input {
            Signal::Frame(frame) => Ok(Signal::Vector(frame.data)),
            vector @ Signal::Vector(_) => Ok(vector),
            other => Err(RigError::shape(
                StageKind::Flatten.tag(),
                format!("cannot flatten a {}", other.shape_name()),
            )),
        }
    }

    fn params(&self) -> Value {
        Value::Object(Default::default())
    }

    fn from_params(_params: &Value) -> Result<Self> {
        Ok(Self)
    }
}
