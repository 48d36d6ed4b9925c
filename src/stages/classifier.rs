use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::blob::{decode_base64, BlobReader, BlobWriter};
use super::registry::{parse_params, to_params};
use super::StageKind;
use crate::core::{Result, RigError, Signal, Stage};

const MAGIC: &[u8; 4] = b"LCLS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearClassifierParams {
    /// Base64 `LCLS` blob.
    pub model: String,
}

/// Weights of an already-fitted linear classifier.
///
/// Two classes use a single weight row (positive score picks the second
/// label); more classes use one row per label and pick the arg-max.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearModel {
    pub classes: Vec<i64>,
    pub coefficients: Vec<Vec<f64>>,
    pub intercepts: Vec<f64>,
}

impl LinearModel {
    pub fn new(classes: Vec<i64>, coefficients: Vec<Vec<f64>>, intercepts: Vec<f64>) -> Result<Self> {
        let model = Self {
            classes,
            coefficients,
            intercepts,
        };
        model.validate()?;
        Ok(model)
    }

    fn expected_rows(&self) -> usize {
        if self.classes.len() == 2 {
            1
        } else {
            self.classes.len()
        }
    }

    pub fn n_features(&self) -> usize {
        self.coefficients.first().map_or(0, Vec::len)
    }

    fn validate(&self) -> Result<()> {
        let tag = StageKind::LinearClassifier.tag();
        if self.classes.len() < 2 {
            return Err(RigError::invalid_params(tag, "need at least two classes"));
        }
        let rows = self.expected_rows();
        if self.coefficients.len() != rows || self.intercepts.len() != rows {
            return Err(RigError::invalid_params(
                tag,
                format!("expected {} weight rows for {} classes", rows, self.classes.len()),
            ));
        }
        let n_features = self.n_features();
        if n_features == 0 || self.coefficients.iter().any(|row| row.len() != n_features) {
            return Err(RigError::invalid_params(tag, "weight rows must share a non-zero width"));
        }
        Ok(())
    }

    pub fn predict(&self, features: &[f64]) -> i64 {
        let scores: Vec<f64> = self
            .coefficients
            .iter()
            .zip(&self.intercepts)
            .map(|(row, bias)| row.iter().zip(features).map(|(w, x)| w * x).sum::<f64>() + bias)
            .collect();

        if scores.len() == 1 {
            return if scores[0] > 0.0 {
                self.classes[1]
            } else {
                self.classes[0]
            };
        }

        // First maximum wins ties.
        let mut best = 0;
        for (i, score) in scores.iter().enumerate() {
            if *score > scores[best] {
                best = i;
            }
        }
        self.classes[best]
    }

    pub fn to_blob(&self) -> String {
        let mut writer = BlobWriter::new(MAGIC)
            .u32(self.classes.len() as u32)
            .u32(self.n_features() as u32)
            .i64s(&self.classes);
        for row in &self.coefficients {
            writer = writer.f64s(row);
        }
        writer.f64s(&self.intercepts).into_base64()
    }

    pub fn from_blob(text: &str) -> Result<Self> {
        let tag = StageKind::LinearClassifier.tag();
        let bytes = decode_base64(tag, text)?;
        let mut reader = BlobReader::open(tag, MAGIC, &bytes)?;
        let n_classes = reader.u32()? as usize;
        let n_features = reader.u32()? as usize;
        let classes = reader.i64s(n_classes)?;
        let rows = if n_classes == 2 { 1 } else { n_classes };
        let coefficients = (0..rows)
            .map(|_| reader.f64s(n_features))
            .collect::<Result<Vec<_>>>()?;
        let intercepts = reader.f64s(rows)?;
        reader.finish()?;
        Self::new(classes, coefficients, intercepts)
    }
}

/// Applies a fitted [`LinearModel`] to a feature vector, emitting the class label.
pub struct LinearClassifier {
    model: LinearModel,
}

impl LinearClassifier {
    pub fn new(model: LinearModel) -> Self {
        Self { model }
    }

    pub fn model(&self) -> &LinearModel {
        &self.model
    }
}

impl Stage for LinearClassifier {
    fn kind(&self) -> StageKind {
        StageKind::LinearClassifier
    }

    fn process(&mut self, input: Signal) -> Result<Signal> {
        let features: &[f64] = match &input {
            Signal::Vector(values) => values,
            Signal::Frame(frame) => &frame.data,
            other => {
                return Err(RigError::shape(
                    StageKind::LinearClassifier.tag(),
                    format!("expected features, got a {}", other.shape_name()),
                ))
            }
        };
        if features.len() != self.model.n_features() {
            return Err(RigError::shape(
                StageKind::LinearClassifier.tag(),
                format!(
                    "expected {} features, got {}",
                    self.model.n_features(),
                    features.len()
                ),
            ));
        }
        Ok(Signal::Label(self.model.predict(features)))
    }

    fn params(&self) -> Value {
        to_params(&LinearClassifierParams {
            model: self.model.to_blob(),
        })
    }

    fn from_params(params: &Value) -> Result<Self> {
        let params: LinearClassifierParams = parse_params(StageKind::LinearClassifier, params)?;
        Ok(Self::new(LinearModel::from_blob(&params.model)?))
    }
}
