use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use log::{debug, info};

use crate::core::{Frame, Result, RigError};
use crate::hal::SharedFrameWriter;

const THREAD_NAME: &str = "synthetic-imager";

/// Stand-in for the microscope: a producer thread that overwrites the shared
/// region with a slowly drifting test pattern at a fixed frame rate.
pub struct SyntheticImager {
    stop_tx: Sender<()>,
    handle: JoinHandle<(SharedFrameWriter, Result<u64>)>,
}

impl SyntheticImager {
    /// Start producing into `writer`. `seed` shifts the pattern so different
    /// channels are distinguishable.
    pub fn start(writer: SharedFrameWriter, frame_rate_hz: f64, seed: u32) -> Result<Self> {
        let period = Duration::try_from_secs_f64(1.0 / frame_rate_hz)
            .ok()
            .filter(|period| !period.is_zero() && frame_rate_hz.is_finite())
            .ok_or_else(|| {
                RigError::InvalidConfig(format!(
                    "frame rate must be positive, got {}",
                    frame_rate_hz
                ))
            })?;
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let handle = thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || {
                let mut writer = writer;
                let (rows, cols) = writer.region().dims();
                let mut frames = 0u64;
                let result = loop {
                    match stop_rx.recv_timeout(period) {
                        Err(RecvTimeoutError::Timeout) => {}
                        _ => break Ok(frames),
                    }
                    let frame = pattern(rows, cols, frames, seed);
                    if let Err(e) = writer.write_frame(&frame) {
                        break Err(e);
                    }
                    frames += 1;
                };
                (writer, result)
            })
            .map_err(|e| RigError::resource(THREAD_NAME, e))?;

        info!("synthetic imager started at {:.1} Hz", frame_rate_hz);
        Ok(Self { stop_tx, handle })
    }

    /// Stop producing. Hands the writer back with the number of frames written.
    pub fn stop(self) -> Result<(SharedFrameWriter, u64)> {
        let _ = self.stop_tx.try_send(());
        let (writer, result) = self
            .handle
            .join()
            .map_err(|_| RigError::resource(THREAD_NAME, "producer thread panicked"))?;
        let frames = result?;
        debug!("synthetic imager wrote {} frames", frames);
        Ok((writer, frames))
    }
}

/// Test pattern: a travelling wave over the frame, strictly non-negative.
pub fn pattern(rows: usize, cols: usize, index: u64, seed: u32) -> Frame {
    let phase = index as f64 * 0.1 + seed as f64;
    let data = (0..rows * cols)
        .map(|i| {
            let (r, c) = ((i / cols) as f64, (i % cols) as f64);
            1.0 + (phase + 0.2 * r + 0.1 * c).sin()
        })
        .collect();
    Frame { rows, cols, data }
}
