//! Fixed-rate driver for the coordinator.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::Context;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};

use super::{Coordinator, LoopState};
use crate::core::{Result, RigError};
use crate::observability::{session_report, window_report, TickMetrics};

/// How the loop waits for the next tick boundary. Only the wait differs;
/// cadence and drift handling are identical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WaitStrategy {
    /// Sleep until the boundary.
    #[default]
    Blocking,
    /// Spin on the clock. For hosts whose sleep granularity is coarse
    /// compared with the tick interval.
    BusyWait,
    /// Measure the host once and pick one of the above.
    Auto,
}

const SAMPLE_SLEEP: Duration = Duration::from_millis(1);
const SAMPLE_ROUNDS: usize = 5;
/// Longest single sleep while blocking, so cancellation is noticed promptly.
const MAX_SLEEP_SLICE: Duration = Duration::from_millis(10);

/// Worst oversleep seen when asking the OS for a short sleep.
pub fn measure_sleep_overshoot() -> Duration {
    (0..SAMPLE_ROUNDS)
        .map(|_| {
            let start = Instant::now();
            std::thread::sleep(SAMPLE_SLEEP);
            start.elapsed().saturating_sub(SAMPLE_SLEEP)
        })
        .max()
        .unwrap_or_default()
}

impl WaitStrategy {
    /// Resolve `Auto` against the host's sleep granularity.
    pub fn resolve(self, tick_interval: Duration) -> Self {
        match self {
            Self::Auto => {
                let overshoot = measure_sleep_overshoot();
                let resolved = if overshoot > tick_interval / 10 {
                    Self::BusyWait
                } else {
                    Self::Blocking
                };
                info!(
                    "sleep overshoot {:.3} ms, using {:?} wait",
                    overshoot.as_secs_f64() * 1000.0,
                    resolved
                );
                resolved
            }
            other => other,
        }
    }
}

/// Stops a running session at its next tick boundary.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunLoopConfig {
    pub tick_interval: Duration,
    pub report_interval: Duration,
    pub wait: WaitStrategy,
    /// Where instrumentation history is flushed. `None` discards it.
    pub output_dir: Option<PathBuf>,
}

impl RunLoopConfig {
    pub fn from_rate(tick_rate_hz: f64) -> Result<Self> {
        if !(tick_rate_hz > 0.0) || !tick_rate_hz.is_finite() {
            return Err(RigError::InvalidConfig(format!(
                "tick rate must be positive, got {}",
                tick_rate_hz
            )));
        }
        let tick_interval = Duration::try_from_secs_f64(1.0 / tick_rate_hz)
            .ok()
            .filter(|interval| !interval.is_zero())
            .ok_or_else(|| {
                RigError::InvalidConfig(format!("tick rate {} Hz is out of range", tick_rate_hz))
            })?;
        Ok(Self {
            tick_interval,
            ..Self::default()
        })
    }
}

impl Default for RunLoopConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs_f64(1.0 / 30.0),
            report_interval: Duration::from_secs(10),
            wait: WaitStrategy::Blocking,
            output_dir: None,
        }
    }
}

/// One loop iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickRecord {
    pub start: Instant,
    pub end: Instant,
    pub command: Option<f64>,
}

impl TickRecord {
    pub fn latency(&self) -> Duration {
        self.end.saturating_duration_since(self.start)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub ticks: u64,
    pub overruns: u64,
    pub commands_sent: u64,
    pub errors: u64,
    pub min_latency: Duration,
    pub mean_latency: Duration,
    pub max_latency: Duration,
    pub elapsed: Duration,
    pub cancelled: bool,
    /// Instrumentation file written at session end, if any.
    pub history_file: Option<PathBuf>,
}

pub struct RunLoop {
    config: RunLoopConfig,
    state: LoopState,
    cancel: CancelToken,
}

impl RunLoop {
    pub fn new(config: RunLoopConfig) -> Self {
        Self {
            config,
            state: LoopState::Idle,
            cancel: CancelToken::new(),
        }
    }

    pub fn config(&self) -> &RunLoopConfig {
        &self.config
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    fn transition(&mut self, target: LoopState) -> Result<()> {
        if !self.state.can_transition_to(&target) {
            return Err(RigError::InvalidConfig(format!(
                "run loop cannot go from {} to {}",
                self.state.name(),
                target.name()
            )));
        }
        self.state = target;
        Ok(())
    }

    pub fn run(&mut self, coordinator: &mut Coordinator, duration: Duration) -> Result<SessionSummary> {
        self.run_with(coordinator, duration, |_| {})
    }

    /// `run`, calling `on_tick` after every tick.
    pub fn run_with<F>(
        &mut self,
        coordinator: &mut Coordinator,
        duration: Duration,
        mut on_tick: F,
    ) -> Result<SessionSummary>
    where
        F: FnMut(&TickRecord),
    {
        let out_of_range = || {
            RigError::InvalidConfig(format!(
                "session duration of {} s is out of range",
                duration.as_secs()
            ))
        };
        // Rejected before any state change.
        Instant::now().checked_add(duration).ok_or_else(out_of_range)?;
        self.transition(LoopState::Running)?;
        self.cancel.reset();

        let interval = self.config.tick_interval;
        let strategy = self.config.wait.resolve(interval);
        let window = TickMetrics::new();
        let session = TickMetrics::new();

        let started = Instant::now();
        let end = started.checked_add(duration).ok_or_else(out_of_range)?;
        let mut next_tick = started;
        let mut next_report = started
            .checked_add(self.config.report_interval)
            .unwrap_or(end);
        let mut window_start = started;
        let mut cancelled = false;

        info!(
            "session started: {:.2} s at {:.1} Hz",
            duration.as_secs_f64(),
            1.0 / interval.as_secs_f64()
        );

        while next_tick < end {
            if !wait_until(next_tick, strategy, &self.cancel) {
                cancelled = true;
                break;
            }

            let start = Instant::now();
            let outcome = coordinator.tick();
            let finished = Instant::now();

            let command = match outcome {
                Ok(command) => command,
                Err(e) => {
                    if e.is_recoverable() {
                        warn!("tick failed: {}", e);
                    } else {
                        error!("tick failed: {}", e);
                    }
                    window.record_error();
                    session.record_error();
                    None
                }
            };
            if command.is_some() {
                window.record_command();
                session.record_command();
            }

            let record = TickRecord {
                start,
                end: finished,
                command,
            };
            let latency = record.latency();
            if window.record_tick(latency, interval) {
                warn!(
                    "tick overrun: {:.3} ms against a {:.3} ms budget",
                    latency.as_secs_f64() * 1000.0,
                    interval.as_secs_f64() * 1000.0
                );
            }
            session.record_tick(latency, interval);
            on_tick(&record);

            // Late ticks push the schedule forward, never back-to-back.
            next_tick = (next_tick + interval).max(finished);

            if finished >= next_report {
                info!(
                    "{}",
                    window_report(&window.snapshot(), finished - window_start)
                );
                window.reset();
                window_start = finished;
                next_report = finished
                    .checked_add(self.config.report_interval)
                    .unwrap_or(end);
            }
        }

        let elapsed = started.elapsed();
        self.transition(LoopState::Finished)?;

        let totals = session.snapshot();
        info!("{}", session_report(&totals, elapsed));

        let history_file = self.flush_history(coordinator);

        Ok(SessionSummary {
            ticks: totals.ticks,
            overruns: totals.overruns,
            commands_sent: totals.commands,
            errors: totals.errors,
            min_latency: totals.min_latency,
            mean_latency: totals.mean_latency,
            max_latency: totals.max_latency,
            elapsed,
            cancelled,
            history_file,
        })
    }

    fn flush_history(&self, coordinator: &mut Coordinator) -> Option<PathBuf> {
        let pipeline = coordinator.pipeline_mut()?;
        if !pipeline.is_instrumented() {
            return None;
        }
        let Some(dir) = self.config.output_dir.as_deref() else {
            pipeline.clear_history();
            return None;
        };
        match write_history_file(dir, pipeline) {
            Ok((path, records)) => {
                info!("wrote {} instrumentation records to {}", records, path.display());
                Some(path)
            }
            Err(e) => {
                error!("failed to save instrumentation history: {:#}", e);
                pipeline.clear_history();
                None
            }
        }
    }
}

fn write_history_file(
    dir: &Path,
    pipeline: &mut super::DecoderPipeline,
) -> anyhow::Result<(PathBuf, usize)> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory {}", dir.display()))?;
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let path = dir.join(format!("session-{}.jsonl", stamp));
    let file = File::create(&path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    let records = pipeline.write_instrumented_history(BufWriter::new(file))?;
    Ok((path, records))
}

/// Wait until `deadline`. Returns `false` if cancelled first.
fn wait_until(deadline: Instant, strategy: WaitStrategy, cancel: &CancelToken) -> bool {
    loop {
        if cancel.is_cancelled() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        match strategy {
            WaitStrategy::BusyWait => std::hint::spin_loop(),
            _ => std::thread::sleep((deadline - now).min(MAX_SLEEP_SLICE)),
        }
    }
}
