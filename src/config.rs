use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::engine::{RunLoopConfig, WaitStrategy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    #[default]
    Tcp,
    Udp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionConfig {
    pub name: String,
    pub rows: usize,
    pub cols: usize,
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            name: "bmi-rig-frames".to_string(),
            rows: 512,
            cols: 512,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActuatorConfig {
    pub transport: Transport,
    pub send_timeout_ms: u64,
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            transport: Transport::Tcp,
            send_timeout_ms: 1000,
        }
    }
}

impl ActuatorConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    pub bind_addr: String,
    pub region: String,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8888".to_string(),
            region: "bmi-rig-receiver".to_string(),
        }
    }
}

/// Rig configuration file. Every field has a default, so a partial file
/// (or `{}`) is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RigConfig {
    pub tick_rate_hz: f64,
    pub report_interval_s: f64,
    pub wait_strategy: WaitStrategy,
    pub frame_region: RegionConfig,
    pub actuator: ActuatorConfig,
    pub receiver: ReceiverConfig,
    pub pipeline_dir: PathBuf,
    /// Session instrumentation output. Absent means history is discarded.
    pub output_dir: Option<PathBuf>,
    /// Time the frame producer gets to settle before a session starts.
    pub imaging_warmup_s: f64,
    pub synthetic_frame_rate_hz: f64,
}

impl Default for RigConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: 30.0,
            report_interval_s: 10.0,
            wait_strategy: WaitStrategy::Auto,
            frame_region: RegionConfig::default(),
            actuator: ActuatorConfig::default(),
            receiver: ReceiverConfig::default(),
            pipeline_dir: PathBuf::from("pipelines"),
            output_dir: Some(PathBuf::from("sessions")),
            imaging_warmup_s: 2.0,
            synthetic_frame_rate_hz: 30.0,
        }
    }
}

/// Seconds that fit a `Duration`; zero only when `allow_zero`.
fn seconds(name: &str, value: f64, allow_zero: bool) -> Result<Duration> {
    let duration = Duration::try_from_secs_f64(value)
        .map_err(|e| anyhow!("{} must be a number of seconds, got {}: {}", name, value, e))?;
    if duration.is_zero() && !allow_zero {
        return Err(anyhow!("{} must be a positive number, got {}", name, value));
    }
    Ok(duration)
}

fn positive(name: &str, value: f64) -> Result<()> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(anyhow!("{} must be a positive number, got {}", name, value))
    }
}

impl RigConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {:?}", path))?;
        let config: RigConfig =
            serde_json::from_str(&json).context("Failed to deserialize rig config")?;
        config.validate()?;
        Ok(config)
    }

    /// Write atomically: temp file first, then rename over the target.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self).context("Failed to serialize rig config")?;
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, json)
            .with_context(|| format!("Failed to write config to {:?}", temp_path))?;
        fs::rename(&temp_path, path)
            .with_context(|| format!("Failed to move config into {:?}", path))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        positive("tick_rate_hz", self.tick_rate_hz)?;
        positive("synthetic_frame_rate_hz", self.synthetic_frame_rate_hz)?;
        seconds("report_interval_s", self.report_interval_s, false)?;
        seconds("imaging_warmup_s", self.imaging_warmup_s, true)?;
        self.run_loop()?;
        if self.frame_region.rows == 0 || self.frame_region.cols == 0 {
            return Err(anyhow!("frame_region dimensions must be non-zero"));
        }
        if self.frame_region.name == self.receiver.region {
            return Err(anyhow!("frame_region and receiver must use different regions"));
        }
        Ok(())
    }

    pub fn run_loop(&self) -> Result<RunLoopConfig> {
        let mut config = RunLoopConfig::from_rate(self.tick_rate_hz)?;
        config.report_interval = seconds("report_interval_s", self.report_interval_s, false)?;
        config.wait = self.wait_strategy;
        config.output_dir = self.output_dir.clone();
        Ok(config)
    }

    /// Zero when `imaging_warmup_s` does not validate.
    pub fn imaging_warmup(&self) -> Duration {
        Duration::try_from_secs_f64(self.imaging_warmup_s).unwrap_or_default()
    }
}
