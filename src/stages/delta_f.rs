use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::blob::{samples_from_base64, samples_to_base64};
use super::registry::{parse_params, to_params};
use super::StageKind;
use crate::core::{Frame, Result, RigError, Signal, Stage};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaFParams {
    pub fast_alpha: f64,
    pub slow_alpha: f64,
    pub rows: usize,
    pub cols: usize,
    /// Image both averages start from (base64, f64 LE). Saved configs carry
    /// the slow average at save time, so a reload resumes from it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_state: Option<String>,
    /// Fast average at save time, when it differs from the slow one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fast_state: Option<String>,
}

/// Band-pass style filter: ratio of a fast and a slow exponential moving
/// average, `(fast - slow) / slow`, per pixel.
///
/// A pixel whose slow average is exactly zero yields 0 rather than NaN or
/// infinity. Downstream stages rely on that.
pub struct DeltaF {
    fast_alpha: f64,
    slow_alpha: f64,
    rows: usize,
    cols: usize,
    fast: Vec<f64>,
    slow: Vec<f64>,
    reference: Option<Vec<f64>>,
    primed: bool,
}

impl DeltaF {
    pub fn new(fast_alpha: f64, slow_alpha: f64, rows: usize, cols: usize) -> Result<Self> {
        Self::build(fast_alpha, slow_alpha, rows, cols, None, None)
    }

    /// Start both averages from `reference` instead of zeros.
    pub fn with_reference(
        fast_alpha: f64,
        slow_alpha: f64,
        reference: Frame,
    ) -> Result<Self> {
        Self::build(
            fast_alpha,
            slow_alpha,
            reference.rows,
            reference.cols,
            Some(reference.data),
            None,
        )
    }

    fn build(
        fast_alpha: f64,
        slow_alpha: f64,
        rows: usize,
        cols: usize,
        reference: Option<Vec<f64>>,
        fast_state: Option<Vec<f64>>,
    ) -> Result<Self> {
        let tag = StageKind::DeltaF.tag();
        if !(fast_alpha > slow_alpha) {
            return Err(RigError::invalid_params(
                tag,
                format!("fast_alpha ({}) must exceed slow_alpha ({})", fast_alpha, slow_alpha),
            ));
        }
        for (name, state) in [("initial state", &reference), ("fast state", &fast_state)] {
            if let Some(state) = state {
                if state.len() != rows * cols {
                    return Err(RigError::invalid_params(
                        tag,
                        format!("{} has {} samples, expected {}", name, state.len(), rows * cols),
                    ));
                }
            }
        }
        let start = reference.clone().unwrap_or_else(|| vec![0.0; rows * cols]);
        Ok(Self {
            fast_alpha,
            slow_alpha,
            rows,
            cols,
            fast: fast_state.unwrap_or_else(|| start.clone()),
            slow: start,
            reference,
            primed: false,
        })
    }
}

impl Stage for DeltaF {
    fn kind(&self) -> StageKind {
        StageKind::DeltaF
    }

    fn process(&mut self, input: Signal) -> Result<Signal> {
        let frame = match input {
            Signal::Frame(frame) => frame,
            other => {
                return Err(RigError::shape(
                    StageKind::DeltaF.tag(),
                    format!("expected a frame, got a {}", other.shape_name()),
                ))
            }
        };
        if frame.dims() != (self.rows, self.cols) {
            return Err(RigError::DimensionMismatch {
                expected: (self.rows, self.cols),
                found: frame.dims(),
            });
        }

        self.primed = true;
        let mut out = Vec::with_capacity(frame.data.len());
        for (i, &sample) in frame.data.iter().enumerate() {
            self.fast[i] = sample * self.fast_alpha + (1.0 - self.fast_alpha) * self.fast[i];
            self.slow[i] = sample * self.slow_alpha + (1.0 - self.slow_alpha) * self.slow[i];
            let slow = self.slow[i];
            out.push(if slow == 0.0 {
                0.0
            } else {
                (self.fast[i] - slow) / slow
            });
        }

        Ok(Signal::Frame(Frame {
            rows: self.rows,
            cols: self.cols,
            data: out,
        }))
    }

    /// Carries the running averages, so a pipeline saved mid-session picks
    /// up where it left off.
    fn params(&self) -> Value {
        let resumable = self.primed || self.reference.is_some();
        to_params(&DeltaFParams {
            fast_alpha: self.fast_alpha,
            slow_alpha: self.slow_alpha,
            rows: self.rows,
            cols: self.cols,
            initial_state: resumable.then(|| samples_to_base64(&self.slow)),
            fast_state: (resumable && self.fast != self.slow)
                .then(|| samples_to_base64(&self.fast)),
        })
    }

    fn from_params(params: &Value) -> Result<Self> {
        let params: DeltaFParams = parse_params(StageKind::DeltaF, params)?;
        let decode = |state: Option<&str>| {
            state
                .map(|text| samples_from_base64(StageKind::DeltaF.tag(), text))
                .transpose()
        };
        Self::build(
            params.fast_alpha,
            params.slow_alpha,
            params.rows,
            params.cols,
            decode(params.initial_state.as_deref())?,
            decode(params.fast_state.as_deref())?,
        )
    }
}
