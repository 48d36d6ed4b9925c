use serde::{Deserialize, Serialize};

use super::error::{Result, RigError};

/// One imaging frame: fixed `rows x cols`, row-major samples.
///
/// Frames are plain values. Anything that crosses a concurrency boundary
/// (the shared region, a stage's history) gets its own copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<f64>,
}

impl Frame {
    pub fn new(rows: usize, cols: usize, data: Vec<f64>) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(RigError::DimensionMismatch {
                expected: (rows, cols),
                found: (data.len(), 1),
            });
        }
        Ok(Self { rows, cols, data })
    }

    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    pub fn filled(rows: usize, cols: usize, value: f64) -> Self {
        Self {
            rows,
            cols,
            data: vec![value; rows * cols],
        }
    }

    pub fn dims(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.cols + col]
    }
}

/// Value passed from one stage to the next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Signal {
    Frame(Frame),
    Vector(Vec<f64>),
    Label(i64),
    Scalar(f64),
}

impl Signal {
    pub fn shape_name(&self) -> &'static str {
        match self {
            Self::Frame(_) => "frame",
            Self::Vector(_) => "vector",
            Self::Label(_) => "label",
            Self::Scalar(_) => "scalar",
        }
    }

    /// Apply `f` to every sample, keeping the shape. Labels are left alone.
    pub fn map_samples(self, f: impl Fn(f64) -> f64) -> Self {
        match self {
            Self::Frame(mut frame) => {
                frame.data.iter_mut().for_each(|v| *v = f(*v));
                Self::Frame(frame)
            }
            Self::Vector(mut values) => {
                values.iter_mut().for_each(|v| *v = f(*v));
                Self::Vector(values)
            }
            Self::Scalar(v) => Self::Scalar(f(v)),
            label @ Self::Label(_) => label,
        }
    }

    /// Coerce the final pipeline output to the single `f64` a command sink accepts.
    pub fn as_command(&self) -> Result<f64> {
        match self {
            Self::Scalar(v) => Ok(*v),
            Self::Label(label) => Ok(*label as f64),
            Self::Vector(values) if values.len() == 1 => Ok(values[0]),
            Self::Frame(frame) if frame.data.len() == 1 => Ok(frame.data[0]),
            other => Err(RigError::shape(
                "command",
                format!("cannot send a {} as a scalar command", other.shape_name()),
            )),
        }
    }
}

impl From<Frame> for Signal {
    fn from(frame: Frame) -> Self {
        Self::Frame(frame)
    }
}
