//! Stages that ignore neural input. Used for control experiments and for
//! validating the rig end to end.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::registry::{parse_params, to_params};
use super::StageKind;
use crate::core::{Result, RigError, Signal, Stage};
use crate::hal::SharedFrameReader;

/// Track length at which the lap ends and the reward wait begins.
const TRACK_END: f64 = 900.0;
/// Slow zone before the reward.
const SLOW_ZONE: (f64, f64) = (650.0, 750.0);

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackAutopilotParams {
    pub slow_velocity: f64,
    pub fast_velocity: f64,
    pub wait_time_s: f64,
}

/// Dead-reckons along a linear track from its own previous commands: fast
/// everywhere, slow in the reward zone, stopped for `wait_time_s` at the end
/// of each lap. Assumes the animal starts at the beginning of the track.
pub struct TrackAutopilot {
    params: TrackAutopilotParams,
    wait: Duration,
    position: f64,
    last_velocity: f64,
    last_poll: Option<Instant>,
    /// When the current reward wait began.
    waiting_since: Option<Instant>,
}

impl TrackAutopilot {
    pub fn new(params: TrackAutopilotParams) -> Result<Self> {
        let wait = Duration::try_from_secs_f64(params.wait_time_s).map_err(|_| {
            RigError::invalid_params(
                StageKind::TrackAutopilot.tag(),
                format!(
                    "wait_time_s must be a non-negative number of seconds, got {}",
                    params.wait_time_s
                ),
            )
        })?;
        Ok(Self {
            params,
            wait,
            position: 0.0,
            last_velocity: 0.0,
            last_poll: None,
            waiting_since: None,
        })
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn process_at(&mut self, now: Instant) -> f64 {
        if let Some(last) = self.last_poll {
            self.position += self.last_velocity * now.saturating_duration_since(last).as_secs_f64();
        }
        self.last_poll = Some(now);

        if self.position > TRACK_END {
            self.position = 0.0;
            self.waiting_since = Some(now);
        }

        self.last_velocity = match self.waiting_since {
            Some(since) if now.saturating_duration_since(since) < self.wait => 0.0,
            _ => {
                self.waiting_since = None;
                if self.position > SLOW_ZONE.0 && self.position < SLOW_ZONE.1 {
                    self.params.slow_velocity
                } else {
                    self.params.fast_velocity
                }
            }
        };
        self.last_velocity
    }
}

impl Stage for TrackAutopilot {
    fn kind(&self) -> StageKind {
        StageKind::TrackAutopilot
    }

    fn process(&mut self, _input: Signal) -> Result<Signal> {
        Ok(Signal::Scalar(self.process_at(Instant::now())))
    }

    fn params(&self) -> Value {
        to_params(&self.params)
    }

    fn from_params(params: &Value) -> Result<Self> {
        Self::new(parse_params(StageKind::TrackAutopilot, params)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionAutopilotParams {
    pub bin_size: f64,
    pub num_bins: usize,
    /// Shared region the actuator receiver publishes positions into.
    pub region: String,
    #[serde(default = "default_slots")]
    pub slots: usize,
}

fn default_slots() -> usize {
    crate::hal::receiver::RECEIVER_SLOTS
}

/// A "perfect" decoder: reads the position the virtual environment last
/// reported through the receiver region and emits its bin index. Positions
/// past the last bin (the dark part of the track) map to bin 0.
pub struct PositionAutopilot {
    params: PositionAutopilotParams,
    reader: Option<SharedFrameReader>,
}

impl PositionAutopilot {
    pub fn new(params: PositionAutopilotParams) -> Self {
        Self {
            params,
            reader: None,
        }
    }

    pub fn bin_for(&self, position: f64) -> i64 {
        let bin = (position / self.params.bin_size).floor();
        if !(bin >= 0.0) || bin as usize >= self.params.num_bins {
            0
        } else {
            bin as i64
        }
    }

    fn reader(&mut self) -> Result<&mut SharedFrameReader> {
        let reader = match self.reader.take() {
            Some(reader) => reader,
            None => SharedFrameReader::open(&self.params.region, 1, self.params.slots).map_err(
                |e| RigError::Stage {
                    stage: StageKind::PositionAutopilot.tag().to_string(),
                    reason: format!("receiver region unavailable: {}", e),
                },
            )?,
        };
        Ok(self.reader.insert(reader))
    }
}

impl Stage for PositionAutopilot {
    fn kind(&self) -> StageKind {
        StageKind::PositionAutopilot
    }

    fn process(&mut self, _input: Signal) -> Result<Signal> {
        let latest = self.reader()?.read_slot(0)?;
        Ok(Signal::Label(self.bin_for(latest)))
    }

    fn params(&self) -> Value {
        to_params(&self.params)
    }

    fn from_params(params: &Value) -> Result<Self> {
        let params: PositionAutopilotParams = parse_params(StageKind::PositionAutopilot, params)?;
        if !(params.bin_size > 0.0) || params.num_bins == 0 || params.slots == 0 {
            return Err(RigError::invalid_params(
                StageKind::PositionAutopilot.tag(),
                "bin_size, num_bins and slots must be positive",
            ));
        }
        Ok(Self::new(params))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track() -> TrackAutopilot {
        TrackAutopilot::new(TrackAutopilotParams {
            slow_velocity: 10.0,
            fast_velocity: 100.0,
            wait_time_s: 1.0,
        })
        .unwrap()
    }

    #[test]
    fn test_track_slows_in_reward_zone() {
        let mut stage = track();
        let t0 = Instant::now();
        assert_eq!(stage.process_at(t0), 100.0);
        // 7s at 100 units/s puts us at 700.
        assert_eq!(stage.process_at(t0 + Duration::from_secs(7)), 10.0);
    }

    #[test]
    fn test_track_waits_at_lap_end() {
        let mut stage = track();
        let t0 = Instant::now();
        stage.process_at(t0);
        assert_eq!(stage.process_at(t0 + Duration::from_millis(9500)), 0.0);
        assert_eq!(stage.position(), 0.0);
        assert_eq!(stage.process_at(t0 + Duration::from_millis(10000)), 0.0);
        assert_eq!(stage.process_at(t0 + Duration::from_millis(10600)), 100.0);
    }

    #[test]
    fn test_unrepresentable_wait_rejected() {
        for wait in [1e20, -1.0, f64::NAN, f64::INFINITY] {
            let params = serde_json::json!({
                "slow_velocity": 10.0,
                "fast_velocity": 1e6,
                "wait_time_s": wait,
            });
            assert!(
                matches!(
                    TrackAutopilot::from_params(&params),
                    Err(RigError::InvalidParams { .. })
                ),
                "wait_time_s {} accepted",
                wait
            );
        }
    }

    #[test]
    fn test_longest_wait_holds_without_overflow() {
        let mut stage = TrackAutopilot::new(TrackAutopilotParams {
            slow_velocity: 10.0,
            fast_velocity: 1e6,
            wait_time_s: 1e18,
        })
        .unwrap();
        let t0 = Instant::now();
        stage.process_at(t0);
        assert_eq!(stage.process_at(t0 + Duration::from_millis(10)), 0.0);
        assert_eq!(stage.process_at(t0 + Duration::from_secs(3600)), 0.0);
    }

    #[test]
    fn test_position_binning() {
        let stage = PositionAutopilot::new(PositionAutopilotParams {
            bin_size: 10.0,
            num_bins: 5,
            region: "unused".to_string(),
            slots: 1,
        });
        assert_eq!(stage.bin_for(0.0), 0);
        assert_eq!(stage.bin_for(25.0), 2);
        assert_eq!(stage.bin_for(49.9), 4);
        assert_eq!(stage.bin_for(50.0), 0);
        assert_eq!(stage.bin_for(-3.0), 0);
    }

    #[test]
    fn test_missing_region_is_stage_error() {
        let mut stage = PositionAutopilot::new(PositionAutopilotParams {
            bin_size: 10.0,
            num_bins: 5,
            region: "bmi-rig-test-no-such-region".to_string(),
            slots: 1,
        });
        let err = stage.process(Signal::Scalar(0.0)).unwrap_err();
        assert!(err.is_recoverable());
    }
}
