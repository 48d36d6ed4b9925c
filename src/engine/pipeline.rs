use std::fs;
use std::io::Write;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result as AnyResult};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::core::{Result, Signal, Stage, StageRecord};
use crate::stages::{build_stage, REGISTRY_VERSION};

fn default_version() -> u32 {
    REGISTRY_VERSION
}

/// On-disk form of a decoder pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    pub stages: Vec<StageRecord>,
    /// Stage positions whose outputs are captured on every decode.
    #[serde(default)]
    pub instrument: Vec<usize>,
}

/// One line of instrumentation output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentRecord {
    pub timestamp: f64,
    pub values: Vec<Signal>,
}

fn unix_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Ordered chain of stages applied to every frame.
///
/// History slot 0 holds one timestamp per decode; slot `k` holds the outputs
/// of the k-th instrumented stage (ascending stage position). A decode that
/// fails part way records nothing, so every slot always has the same length.
#[derive(Default)]
pub struct DecoderPipeline {
    stages: Vec<Box<dyn Stage>>,
    instrumented: Vec<usize>,
    timestamps: Vec<f64>,
    captured: Vec<Vec<Signal>>,
}

impl std::fmt::Debug for DecoderPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecoderPipeline")
            .field("stages", &self.stages.iter().map(|s| s.kind()).collect::<Vec<_>>())
            .field("instrumented", &self.instrumented)
            .field("timestamps", &self.timestamps)
            .field("captured", &self.captured)
            .finish()
    }
}

impl DecoderPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, stage: Box<dyn Stage>) {
        self.stages.push(stage);
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stage_tags(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.kind().tag()).collect()
    }

    /// Feed `input` through every stage in order.
    pub fn decode(&mut self, input: Signal) -> Result<Signal> {
        let mut captures = Vec::with_capacity(self.instrumented.len());
        let mut value = input;
        for (idx, stage) in self.stages.iter_mut().enumerate() {
            value = stage.process(value)?;
            if self.instrumented.binary_search(&idx).is_ok() {
                captures.push(value.clone());
            }
        }

        if !self.instrumented.is_empty() {
            self.timestamps.push(unix_seconds());
            for (slot, captured) in self.captured.iter_mut().zip(captures) {
                slot.push(captured);
            }
        }
        Ok(value)
    }

    /// Mark stage positions for capture. Replaces any earlier selection and
    /// discards history gathered under it.
    pub fn instrument(&mut self, indices: &[usize]) {
        let mut selected: Vec<usize> = Vec::with_capacity(indices.len());
        for &idx in indices {
            if idx >= self.stages.len() {
                warn!(
                    "ignoring instrument index {} for a {}-stage pipeline",
                    idx,
                    self.stages.len()
                );
                continue;
            }
            selected.push(idx);
        }
        selected.sort_unstable();
        selected.dedup();

        self.captured = vec![Vec::new(); selected.len()];
        self.timestamps.clear();
        self.instrumented = selected;
    }

    pub fn instrumented(&self) -> &[usize] {
        &self.instrumented
    }

    pub fn is_instrumented(&self) -> bool {
        !self.instrumented.is_empty()
    }

    /// Entries held in history slot `slot` (0 = timestamps).
    pub fn slot_len(&self, slot: usize) -> usize {
        match slot {
            0 => self.timestamps.len(),
            k => self.captured.get(k - 1).map_or(0, Vec::len),
        }
    }

    pub fn clear_history(&mut self) {
        self.timestamps.clear();
        self.captured.iter_mut().for_each(Vec::clear);
    }

    /// Write one JSON line per decode call and clear the history. Returns the
    /// number of records written.
    pub fn write_instrumented_history<W: Write>(&mut self, mut writer: W) -> AnyResult<usize> {
        if self.instrumented.is_empty() {
            return Ok(0);
        }
        let count = self.timestamps.len();
        for call in 0..count {
            let record = InstrumentRecord {
                timestamp: self.timestamps[call],
                values: self
                    .captured
                    .iter()
                    .map(|slot| slot[call].clone())
                    .collect(),
            };
            serde_json::to_writer(&mut writer, &record)
                .context("Failed to serialize instrumentation record")?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        self.clear_history();
        Ok(count)
    }

    /// Build from declarative records. Records that fail to build are logged
    /// and skipped; check `len()` against the record count before use.
    pub fn from_config(config: &PipelineConfig) -> Self {
        if config.version != REGISTRY_VERSION {
            warn!(
                "pipeline written for stage registry v{}, this build speaks v{}",
                config.version, REGISTRY_VERSION
            );
        }

        let mut pipeline = Self::new();
        for (position, record) in config.stages.iter().enumerate() {
            match build_stage(record) {
                Ok(stage) => pipeline.push(stage),
                Err(e) => warn!("skipping stage {} ({}): {}", position, record.stage, e),
            }
        }
        if pipeline.len() != config.stages.len() {
            warn!(
                "pipeline built with {} of {} configured stages",
                pipeline.len(),
                config.stages.len()
            );
        }
        if !config.instrument.is_empty() {
            pipeline.instrument(&config.instrument);
        }
        pipeline
    }

    pub fn to_config(&self) -> PipelineConfig {
        PipelineConfig {
            version: REGISTRY_VERSION,
            stages: self.stages.iter().map(|s| s.to_config()).collect(),
            instrument: self.instrumented.clone(),
        }
    }

    pub fn load(path: impl AsRef<Path>) -> AnyResult<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .with_context(|| format!("Failed to read pipeline file {}", path.display()))?;
        let config: PipelineConfig = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse pipeline file {}", path.display()))?;
        let pipeline = Self::from_config(&config);
        info!(
            "loaded pipeline {} [{}]",
            path.display(),
            pipeline.stage_tags().join(" -> ")
        );
        Ok(pipeline)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> AnyResult<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(&self.to_config())
            .context("Failed to serialize pipeline")?;
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, json)
            .with_context(|| format!("Failed to write {}", temp_path.display()))?;
        fs::rename(&temp_path, path)
            .with_context(|| format!("Failed to move pipeline file into {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Frame;
    use crate::stages::{Mean, Scale, Threshold};

    fn pipeline() -> DecoderPipeline {
        let mut p = DecoderPipeline::new();
        p.push(Box::new(Scale::new(2.0)));
        p.push(Box::new(Threshold::new(3.0)));
        p.push(Box::new(Mean));
        p
    }

    #[test]
    fn test_stages_run_in_order() {
        let mut p = pipeline();
        let frame = Frame::new(1, 3, vec![1.0, 2.0, 4.0]).unwrap();
        // [2, 4, 8] -> [0, 4, 8] -> 4
        assert_eq!(p.decode(frame.into()).unwrap(), Signal::Scalar(4.0));
    }

    #[test]
    fn test_empty_pipeline_is_identity() {
        let mut p = DecoderPipeline::new();
        assert_eq!(p.decode(Signal::Scalar(1.5)).unwrap(), Signal::Scalar(1.5));
    }

    #[test]
    fn test_instrumentation_does_not_change_output() {
        let mut plain = pipeline();
        let mut watched = pipeline();
        watched.instrument(&[0, 2]);
        let frame = Frame::new(1, 2, vec![5.0, 1.0]).unwrap();
        assert_eq!(
            plain.decode(frame.clone().into()).unwrap(),
            watched.decode(frame.into()).unwrap()
        );
        assert_eq!(watched.slot_len(0), 1);
        assert_eq!(watched.slot_len(1), 1);
        assert_eq!(watched.slot_len(2), 1);
    }

    #[test]
    fn test_failed_decode_records_nothing() {
        let mut p = pipeline();
        p.instrument(&[0]);
        assert!(p.decode(Signal::Vector(Vec::new())).is_err());
        assert_eq!(p.slot_len(0), 0);
        assert_eq!(p.slot_len(1), 0);
    }

    #[test]
    fn test_out_of_range_indices_dropped() {
        let mut p = pipeline();
        p.instrument(&[2, 7, 0, 2]);
        assert_eq!(p.instrumented(), &[0, 2]);
    }

    #[test]
    fn test_history_written_as_json_lines() {
        let mut p = pipeline();
        p.instrument(&[2]);
        for v in [1.0, 3.0] {
            p.decode(Frame::filled(1, 1, v).into()).unwrap();
        }

        let mut out = Vec::new();
        assert_eq!(p.write_instrumented_history(&mut out).unwrap(), 2);
        let text = String::from_utf8(out).unwrap();
        let records: Vec<InstrumentRecord> = text
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(records[0].values, vec![Signal::Scalar(0.0)]);
        assert_eq!(records[1].values, vec![Signal::Scalar(6.0)]);
        assert_eq!(p.slot_len(0), 0);
    }

    #[test]
    fn test_history_noop_without_instrumentation() {
        let mut p = pipeline();
        p.decode(Frame::filled(1, 1, 1.0).into()).unwrap();
        let mut out = Vec::new();
        assert_eq!(p.write_instrumented_history(&mut out).unwrap(), 0);
        assert!(out.is_empty());
    }
}
