use log::{debug, warn};

use super::DecoderPipeline;
use crate::core::{Frame, Result, Signal};
use crate::hal::{CommandSink, FrameSource};

/// Holds at most one frame source, pipeline and command sink, and runs one
/// read-decode-send step per `tick`.
///
/// Installing a collaborator closes whatever held that slot before.
#[derive(Default)]
pub struct Coordinator {
    frame_source: Option<Box<dyn FrameSource>>,
    pipeline: Option<DecoderPipeline>,
    command_sink: Option<Box<dyn CommandSink>>,
}

impl Coordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_frame_source(&mut self, source: Box<dyn FrameSource>) {
        if let Some(mut previous) = self.frame_source.replace(source) {
            debug!("replacing frame source");
            if let Err(e) = previous.close() {
                warn!("closing previous frame source failed: {}", e);
            }
        }
    }

    pub fn set_pipeline(&mut self, pipeline: DecoderPipeline) {
        if self.pipeline.replace(pipeline).is_some() {
            debug!("replacing decoder pipeline");
        }
    }

    pub fn set_command_sink(&mut self, sink: Box<dyn CommandSink>) {
        if let Some(mut previous) = self.command_sink.replace(sink) {
            debug!("replacing command sink");
            if let Err(e) = previous.close() {
                warn!("closing previous command sink failed: {}", e);
            }
        }
    }

    pub fn has_frame_source(&self) -> bool {
        self.frame_source.is_some()
    }

    pub fn has_command_sink(&self) -> bool {
        self.command_sink.is_some()
    }

    pub fn pipeline(&self) -> Option<&DecoderPipeline> {
        self.pipeline.as_ref()
    }

    pub fn pipeline_mut(&mut self) -> Option<&mut DecoderPipeline> {
        self.pipeline.as_mut()
    }

    /// Read one frame without decoding it. `None` when no source is set.
    pub fn preview_frame(&mut self) -> Result<Option<Frame>> {
        match self.frame_source.as_mut() {
            Some(source) => source.get_current_frame().map(Some),
            None => Ok(None),
        }
    }

    /// Send a command directly, bypassing the pipeline. `false` when no sink is set.
    pub fn send_direct(&mut self, command: f64) -> Result<bool> {
        match self.command_sink.as_mut() {
            Some(sink) => sink.send_command(command).map(|_| true),
            None => Ok(false),
        }
    }

    /// Advance as far as the installed collaborators allow. Returns the
    /// decoded command when the pipeline produced one.
    pub fn tick(&mut self) -> Result<Option<f64>> {
        let Some(source) = self.frame_source.as_mut() else {
            return Ok(None);
        };
        let frame = source.get_current_frame()?;

        let Some(pipeline) = self.pipeline.as_mut() else {
            return Ok(None);
        };
        let decoded = pipeline.decode(Signal::Frame(frame))?;

        match self.command_sink.as_mut() {
            Some(sink) => {
                let command = decoded.as_command()?;
                sink.send_command(command)?;
                Ok(Some(command))
            }
            None => Ok(decoded.as_command().ok()),
        }
    }

    /// Close the sink, then the source. Safe to call repeatedly.
    pub fn close(&mut self) -> Result<()> {
        let sink_result = match self.command_sink.take() {
            Some(mut sink) => sink.close(),
            None => Ok(()),
        };
        let source_result = match self.frame_source.take() {
            Some(mut source) => source.close(),
            None => Ok(()),
        };
        sink_result.and(source_result)
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("error while closing coordinator: {}", e);
        }
    }
}
