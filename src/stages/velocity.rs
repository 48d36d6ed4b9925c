use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::blob::{decode_base64, BlobReader, BlobWriter};
use super::registry::{parse_params, to_params};
use super::StageKind;
use crate::core::{Result, RigError, Signal, Stage};

const MAGIC: &[u8; 4] = b"VCTL";

/// Polls further apart than this mean the decoder was stopped and restarted.
pub const MAX_POLL_GAP: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VelocityControllerParams {
    /// Base64 `VCTL` blob.
    pub model: String,
}

/// Fitted per-class velocity table plus acceleration limit.
#[derive(Debug, Clone, PartialEq)]
pub struct VelocityModel {
    pub median_velocity_by_class: Vec<f64>,
    pub max_acceleration: f64,
}

impl VelocityModel {
    pub fn to_blob(&self) -> String {
        BlobWriter::new(MAGIC)
            .u32(self.median_velocity_by_class.len() as u32)
            .f64s(&self.median_velocity_by_class)
            .f64(self.max_acceleration)
            .into_base64()
    }

    pub fn from_blob(text: &str) -> Result<Self> {
        let tag = StageKind::VelocityController.tag();
        let bytes = decode_base64(tag, text)?;
        let mut reader = BlobReader::open(tag, MAGIC, &bytes)?;
        let n_classes = reader.u32()? as usize;
        let median_velocity_by_class = reader.f64s(n_classes)?;
        let max_acceleration = reader.f64()?;
        reader.finish()?;
        Ok(Self {
            median_velocity_by_class,
            max_acceleration,
        })
    }
}

/// Turns a decoded class label into a velocity command, slewing towards the
/// class's fitted velocity no faster than the fitted acceleration allows.
pub struct VelocityController {
    model: VelocityModel,
    current_velocity: f64,
    last_polled: Option<Instant>,
}

impl VelocityController {
    pub fn new(model: VelocityModel) -> Self {
        Self {
            model,
            current_velocity: 0.0,
            last_polled: None,
        }
    }

    pub fn model(&self) -> &VelocityModel {
        &self.model
    }

    /// `process` with an explicit clock reading.
    pub fn process_at(&mut self, label: i64, now: Instant) -> Result<f64> {
        let target = usize::try_from(label)
            .ok()
            .and_then(|idx| self.model.median_velocity_by_class.get(idx).copied())
            .ok_or_else(|| {
                RigError::shape(
                    StageKind::VelocityController.tag(),
                    format!("no velocity fitted for class {}", label),
                )
            })?;

        let elapsed = match self.last_polled {
            Some(last) if now.saturating_duration_since(last) <= MAX_POLL_GAP => {
                now.saturating_duration_since(last)
            }
            _ => {
                // First poll, or resumed after a pause: start from rest.
                self.last_polled = Some(now);
                self.current_velocity = 0.0;
                return Ok(0.0);
            }
        };

        let max_change = self.model.max_acceleration * elapsed.as_secs_f64();
        self.current_velocity = if target > self.current_velocity {
            (self.current_velocity + max_change).min(target)
        } else {
            (self.current_velocity - max_change).max(target)
        };
        self.last_polled = Some(now);
        Ok(self.current_velocity)
    }
}

impl Stage for VelocityController {
    fn kind(&self) -> StageKind {
        StageKind::VelocityController
    }

    fn process(&mut self, input: Signal) -> Result<Signal> {
        match input {
            Signal::Label(label) => self.process_at(label, Instant::now()).map(Signal::Scalar),
            other => Err(RigError::shape(
                StageKind::VelocityController.tag(),
                format!("expected a class label, got a {}", other.shape_name()),
            )),
        }
    }

    fn params(&self) -> Value {
        to_params(&VelocityControllerParams {
            model: self.model.to_blob(),
        })
    }

    fn from_params(params: &Value) -> Result<Self> {
        let params: VelocityControllerParams =
            parse_params(StageKind::VelocityController, params)?;
        Ok(Self::new(VelocityModel::from_blob(&params.model)?))
    }
}
