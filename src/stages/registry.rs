use serde::{Deserialize, Serialize};

use super::{
    DeltaF, Downsample, Flatten, LinearClassifier, Mean, PositionAutopilot, Scale, Threshold,
    TrackAutopilot, VelocityController,
};
use crate::core::{Result, RigError, Stage, StageRecord};

/// Version of the tag set below. Adding a stage type means adding a tag and
/// bumping this; existing tags never change meaning.
pub const REGISTRY_VERSION: u32 = 1;

/// Closed set of stage types a pipeline file may name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageKind {
    Downsample,
    DeltaF,
    Scale,
    Threshold,
    Flatten,
    Mean,
    LinearClassifier,
    VelocityController,
    TrackAutopilot,
    PositionAutopilot,
}

impl StageKind {
    pub const ALL: [StageKind; 10] = [
        StageKind::Downsample,
        StageKind::DeltaF,
        StageKind::Scale,
        StageKind::Threshold,
        StageKind::Flatten,
        StageKind::Mean,
        StageKind::LinearClassifier,
        StageKind::VelocityController,
        StageKind::TrackAutopilot,
        StageKind::PositionAutopilot,
    ];

    pub fn tag(&self) -> &'static str {
        match self {
            Self::Downsample => "Downsample",
            Self::DeltaF => "DeltaF",
            Self::Scale => "Scale",
            Self::Threshold => "Threshold",
            Self::Flatten => "Flatten",
            Self::Mean => "Mean",
            Self::LinearClassifier => "LinearClassifier",
            Self::VelocityController => "VelocityController",
            Self::TrackAutopilot => "TrackAutopilot",
            Self::PositionAutopilot => "PositionAutopilot",
        }
    }

    pub fn from_tag(tag: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.tag() == tag)
            .ok_or_else(|| RigError::UnknownStage(tag.to_string()))
    }

    /// Whether the stage carries fitted model weights.
    pub fn is_fitted(&self) -> bool {
        matches!(self, Self::LinearClassifier | Self::VelocityController)
    }
}

fn boxed<S: Stage + 'static>(stage: S) -> Box<dyn Stage> {
    Box::new(stage)
}

/// Build a stage from its declarative record.
pub fn build_stage(record: &StageRecord) -> Result<Box<dyn Stage>> {
    let params = &record.params;
    match StageKind::from_tag(&record.stage)? {
        StageKind::Downsample => Downsample::from_params(params).map(boxed),
        StageKind::DeltaF => DeltaF::from_params(params).map(boxed),
        StageKind::Scale => Scale::from_params(params).map(boxed),
        StageKind::Threshold => Threshold::from_params(params).map(boxed),
        StageKind::Flatten => Flatten::from_params(params).map(boxed),
        StageKind::Mean => Mean::from_params(params).map(boxed),
        StageKind::LinearClassifier => LinearClassifier::from_params(params).map(boxed),
        StageKind::VelocityController => VelocityController::from_params(params).map(boxed),
        StageKind::TrackAutopilot => TrackAutopilot::from_params(params).map(boxed),
        StageKind::PositionAutopilot => PositionAutopilot::from_params(params).map(boxed),
    }
}

/// Typed parameter decoding shared by every stage.
pub(crate) fn parse_params<T: serde::de::DeserializeOwned>(
    kind: StageKind,
    params: &serde_json::Value,
) -> Result<T> {
    // Parameterless stages may be written with `params` omitted.
    let params = if params.is_null() {
        serde_json::Value::Object(Default::default())
    } else {
        params.clone()
    };
    serde_json::from_value(params).map_err(|e| RigError::invalid_params(kind.tag(), e))
}

pub(crate) fn to_params<T: Serialize>(params: &T) -> serde_json::Value {
    serde_json::to_value(params).unwrap_or(serde_json::Value::Null)
}
