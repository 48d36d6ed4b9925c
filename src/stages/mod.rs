pub mod autopilot;
pub mod blob;
pub mod classifier;
pub mod delta_f;
pub mod downsample;
pub mod flatten;
pub mod mean;
pub mod registry;
pub mod scale;
pub mod threshold;
pub mod velocity;

pub use autopilot::{PositionAutopilot, TrackAutopilot};
pub use classifier::{LinearClassifier, LinearModel};
pub use delta_f::DeltaF;
pub use downsample::Downsample;
pub use flatten::Flatten;
pub use mean::Mean;
pub use registry::{build_stage, StageKind, REGISTRY_VERSION};
pub use scale::Scale;
pub use threshold::Threshold;
pub use velocity::{VelocityController, VelocityModel};
