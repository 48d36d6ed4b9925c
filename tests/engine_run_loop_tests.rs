use std::fs;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bmi_rig::core::{Frame, Result};
use bmi_rig::engine::{
    Coordinator, DecoderPipeline, LoopState, RunLoop, RunLoopConfig, TickRecord, WaitStrategy,
};
use bmi_rig::hal::{CommandSink, FrameSource};
use bmi_rig::stages::{Flatten, Mean};
use tempfile::TempDir;

struct RampSource {
    next: f64,
}

impl FrameSource for RampSource {
    fn get_current_frame(&mut self) -> Result<Frame> {
        self.next += 1.0;
        Ok(Frame::filled(2, 2, self.next))
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Stalls for `stall` on every read `stall_on` selects.
struct StallingSource {
    reads: usize,
    stall: Duration,
    stall_on: fn(usize) -> bool,
}

impl FrameSource for StallingSource {
    fn get_current_frame(&mut self) -> Result<Frame> {
        if (self.stall_on)(self.reads) {
            std::thread::sleep(self.stall);
        }
        self.reads += 1;
        Ok(Frame::filled(2, 2, 1.0))
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[derive(Clone, Default)]
struct SharedSink(Arc<Mutex<Vec<f64>>>);

impl CommandSink for SharedSink {
    fn send_command(&mut self, command: f64) -> Result<()> {
        self.0.lock().unwrap().push(command);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

fn mean_pipeline() -> DecoderPipeline {
    let mut pipeline = DecoderPipeline::new();
    pipeline.push(Box::new(Flatten::new()));
    pipeline.push(Box::new(Mean::new()));
    pipeline
}

fn config(rate_hz: f64) -> RunLoopConfig {
    RunLoopConfig {
        wait: WaitStrategy::Blocking,
        ..RunLoopConfig::from_rate(rate_hz).unwrap()
    }
}

#[test]
fn test_one_second_at_thirty_hz() {
    let mut coordinator = Coordinator::new();
    let mut run_loop = RunLoop::new(config(30.0));

    let started = Instant::now();
    let summary = run_loop
        .run(&mut coordinator, Duration::from_secs(1))
        .unwrap();

    assert!((29..=31).contains(&summary.ticks), "ticks: {}", summary.ticks);
    assert!(started.elapsed() < Duration::from_millis(1500));
    assert_eq!(run_loop.state(), LoopState::Finished);
}

#[test]
fn test_tick_starts_strictly_increase() {
    let mut coordinator = Coordinator::new();
    coordinator.set_frame_source(Box::new(RampSource { next: 0.0 }));
    coordinator.set_pipeline(mean_pipeline());
    let sink = SharedSink::default();
    coordinator.set_command_sink(Box::new(sink.clone()));

    let mut starts = Vec::new();
    let mut run_loop = RunLoop::new(config(100.0));
    let summary = run_loop
        .run_with(&mut coordinator, Duration::from_millis(200), |tick| {
            starts.push(tick.start)
        })
        .unwrap();

    assert!(starts.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(summary.commands_sent as usize, starts.len());

    // Commands go out in tick order.
    let sent = sink.0.lock().unwrap().clone();
    assert_eq!(sent.len(), starts.len());
    assert!(sent.windows(2).all(|w| w[1] == w[0] + 1.0));
}

#[test]
fn test_cancel_from_another_thread() {
    let mut coordinator = Coordinator::new();
    let mut run_loop = RunLoop::new(config(50.0));
    let token = run_loop.cancel_token();

    let canceller = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(100));
        token.cancel();
    });

    let started = Instant::now();
    let summary = run_loop
        .run(&mut coordinator, Duration::from_secs(10))
        .unwrap();
    canceller.join().unwrap();

    assert!(summary.cancelled);
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[test]
fn test_history_file_written_to_output_dir() {
    let dir = TempDir::new().unwrap();
    let mut coordinator = Coordinator::new();
    coordinator.set_frame_source(Box::new(RampSource { next: 0.0 }));
    let mut pipeline = mean_pipeline();
    pipeline.instrument(&[1]);
    coordinator.set_pipeline(pipeline);

    let mut run_loop = RunLoop::new(RunLoopConfig {
        output_dir: Some(dir.path().to_path_buf()),
        ..config(100.0)
    });
    let summary = run_loop
        .run(&mut coordinator, Duration::from_millis(100))
        .unwrap();

    let path = summary.history_file.expect("history file");
    assert!(path.starts_with(dir.path()));
    let lines = fs::read_to_string(&path).unwrap().lines().count();
    assert_eq!(lines as u64, summary.ticks);
    assert_eq!(coordinator.pipeline().unwrap().slot_len(0), 0);
}

#[test]
fn test_history_discarded_without_output_dir() {
    let mut coordinator = Coordinator::new();
    coordinator.set_frame_source(Box::new(RampSource { next: 0.0 }));
    let mut pipeline = mean_pipeline();
    pipeline.instrument(&[0]);
    coordinator.set_pipeline(pipeline);

    let mut run_loop = RunLoop::new(config(100.0));
    let summary = run_loop
        .run(&mut coordinator, Duration::from_millis(50))
        .unwrap();

    assert!(summary.history_file.is_none());
    assert_eq!(coordinator.pipeline().unwrap().slot_len(1), 0);
}

#[test]
fn test_slow_ticks_push_schedule_back() {
    let stall = Duration::from_millis(30);
    let mut coordinator = Coordinator::new();
    coordinator.set_frame_source(Box::new(StallingSource {
        reads: 0,
        stall,
        stall_on: |_| true,
    }));

    let mut starts = Vec::new();
    let mut run_loop = RunLoop::new(config(100.0));
    let summary = run_loop
        .run_with(&mut coordinator, Duration::from_millis(300), |tick| {
            starts.push(tick.start)
        })
        .unwrap();

    // Each tick waits for the previous one, not for its old slot.
    assert!(starts.windows(2).all(|w| w[1] - w[0] >= stall));
    assert!((5..=11).contains(&summary.ticks), "ticks: {}", summary.ticks);
    assert_eq!(summary.overruns, summary.ticks);
}

#[test]
fn test_no_catch_up_burst_after_stall() {
    let interval = Duration::from_millis(10);
    let mut coordinator = Coordinator::new();
    coordinator.set_frame_source(Box::new(StallingSource {
        reads: 0,
        stall: Duration::from_millis(60),
        stall_on: |read| read == 2,
    }));

    let mut ticks: Vec<TickRecord> = Vec::new();
    let mut run_loop = RunLoop::new(config(100.0));
    let summary = run_loop
        .run_with(&mut coordinator, Duration::from_millis(250), |tick| {
            ticks.push(*tick)
        })
        .unwrap();

    let stalled = ticks
        .iter()
        .find(|tick| tick.latency() >= Duration::from_millis(60))
        .expect("stalled tick");
    // Missed slots are dropped: at most one tick starts within an interval
    // of the stall ending.
    let burst = ticks
        .iter()
        .filter(|tick| tick.start >= stalled.end && tick.start < stalled.end + interval)
        .count();
    assert!(burst <= 1, "{} ticks right after the stall", burst);
    assert!(summary.overruns >= 1);
    assert!(ticks.windows(2).all(|w| w[0].start < w[1].start));
}
