use crate::core::{Frame, Result};

/// Producer of the most recent sensor frame.
pub trait FrameSource: Send {
    /// An independent copy of the current frame. Never a view into memory
    /// the producer may still be writing.
    fn get_current_frame(&mut self) -> Result<Frame>;

    /// Release the underlying resource. Calling it twice is harmless.
    fn close(&mut self) -> Result<()>;
}

/// Consumer of decoded commands, forwarding them to the actuator.
pub trait CommandSink: Send {
    /// Transmit one command. Blocks at most for the sink's send timeout and
    /// reports transport failures instead of dropping the command silently.
    fn send_command(&mut self, command: f64) -> Result<()>;

    /// Release the underlying socket. Calling it twice is harmless.
    fn close(&mut self) -> Result<()>;
}
