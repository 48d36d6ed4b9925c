pub mod actuator;
pub mod mock;
pub mod receiver;
pub mod shared_frame;
pub mod traits;

pub use actuator::{decode_command, encode_command, TcpCommandSink, UdpCommandSink};
pub use receiver::{UdpReceiver, RECEIVER_SLOTS};
pub use shared_frame::{region_path, SharedFrameReader, SharedFrameRegion, SharedFrameWriter};
pub use traits::{CommandSink, FrameSource};
