use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::registry::{parse_params, to_params};
use super::StageKind;
use crate::core::{Frame, Result, RigError, Signal, Stage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownsampleParams {
    /// Block height (rows per output row).
    pub x_dim: usize,
    /// Block width (columns per output column).
    pub y_dim: usize,
}

/// Local-mean downsampling over `x_dim x y_dim` blocks.
///
/// Frames whose size is not a multiple of the block are padded with zeros,
/// so edge blocks are still divided by the full block size.
pub struct Downsample {
    params: DownsampleParams,
}

impl Downsample {
    pub fn new(x_dim: usize, y_dim: usize) -> Result<Self> {
        let params = DownsampleParams { x_dim, y_dim };
        Self::validate(&params)?;
        Ok(Self { params })
    }

    fn validate(params: &DownsampleParams) -> Result<()> {
        if params.x_dim == 0 || params.y_dim == 0 {
            return Err(RigError::invalid_params(
                StageKind::Downsample.tag(),
                "block dimensions must be non-zero",
            ));
        }
        Ok(())
    }

    fn downsample(&self, frame: &Frame) -> Frame {
        let DownsampleParams { x_dim, y_dim } = self.params;
        let out_rows = frame.rows.div_ceil(x_dim);
        let out_cols = frame.cols.div_ceil(y_dim);
        let block_size = (x_dim * y_dim) as f64;

        let mut data = vec![0.0; out_rows * out_cols];
        for row in 0..frame.rows {
            let out_row = row / x_dim;
            for col in 0..frame.cols {
                data[out_row * out_cols + col / y_dim] += frame.get(row, col);
            }
        }
        data.iter_mut().for_each(|v| *v /= block_size);

        Frame {
            rows: out_rows,
            cols: out_cols,
            data,
        }
    }
}

impl Stage for Downsample {
    fn kind(&self) -> StageKind {
        StageKind::Downsample
    }

    fn process(&mut self, input: Signal) -> Result<Signal> {
        match input {
            Signal::Frame(frame) => Ok(Signal::Frame(self.downsample(&frame))),
            other => Err(RigError::shape(
                StageKind::Downsample.tag(),
                format!("expected a frame, got a {}", other.shape_name()),
            )),
        }
    }

    fn params(&self) -> Value {
        to_params(&self.params)
    }

    fn from_params(params: &Value) -> Result<Self> {
        let params: DownsampleParams = parse_params(StageKind::Downsample, params)?;
        Self::validate(&params)?;
        Ok(Self { params })
    }
}
