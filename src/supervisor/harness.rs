use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::{error, info};

use super::host::duration_from;
use super::{AckKind, Component, Host, Reply, ReplyHandle, Request, SharedState};
use crate::config::{RigConfig, Transport};
use crate::core::{Result, RigError};
use crate::engine::{Coordinator, DecoderPipeline, RunLoop};
use crate::hal::{CommandSink, SharedFrameReader, TcpCommandSink, UdpCommandSink};

/// What a session needs, moved onto a blocking thread while it runs.
struct Engine {
    coordinator: Coordinator,
    run_loop: RunLoop,
}

/// Hosts the coordinator and run loop. A running session occupies the host
/// (and so its mailbox) until it finishes.
pub struct HarnessHost {
    config: RigConfig,
    engine: Option<Engine>,
    state: SharedState,
}

impl HarnessHost {
    pub fn new(config: RigConfig, state: SharedState) -> Result<Self> {
        let run_loop = RunLoop::new(
            config
                .run_loop()
                .map_err(|e| RigError::InvalidConfig(format!("{:#}", e)))?,
        );
        Ok(Self {
            config,
            engine: Some(Engine {
                coordinator: Coordinator::new(),
                run_loop,
            }),
            state,
        })
    }

    /// Run `work` against the engine on the blocking pool.
    async fn blocking<R, F>(&mut self, work: F) -> Result<R>
    where
        F: FnOnce(&mut Engine) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let mut engine = self
            .engine
            .take()
            .ok_or_else(|| RigError::InvalidConfig("harness engine unavailable".to_string()))?;
        match tokio::task::spawn_blocking(move || {
            let result = work(&mut engine);
            (engine, result)
        })
        .await
        {
            Ok((engine, result)) => {
                self.engine = Some(engine);
                result
            }
            Err(e) => {
                // The engine went down with the worker; start over unconnected.
                error!("harness worker failed: {}", e);
                let run_loop = self.config.run_loop().map(RunLoop::new);
                self.engine = run_loop.ok().map(|run_loop| Engine {
                    coordinator: Coordinator::new(),
                    run_loop,
                });
                self.state.update(|s| {
                    s.actuator_connected = false;
                    s.imaging_connected = false;
                    s.pipeline = None;
                });
                Err(RigError::Stage {
                    stage: "harness".to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn connect_command_sink(&mut self, addr: String) -> Result<()> {
        let transport = self.config.actuator.transport;
        let timeout = self.config.actuator.send_timeout();
        self.blocking(move |engine| {
            if engine.coordinator.has_command_sink() {
                return Err(RigError::InvalidConfig(
                    "actuator is already connected".to_string(),
                ));
            }
            let sink: Box<dyn CommandSink> = match transport {
                Transport::Tcp => Box::new(TcpCommandSink::connect(addr.as_str(), timeout)?),
                Transport::Udp => Box::new(UdpCommandSink::connect(addr.as_str())?),
            };
            engine.coordinator.set_command_sink(sink);
            Ok(())
        })
        .await?;
        self.state.update(|s| s.actuator_connected = true);
        Ok(())
    }

    async fn connect_frame_source(&mut self, channel: u32) -> Result<()> {
        let region = self.config.frame_region.clone();
        // A source left behind by a failed acquisition is stale, not live.
        let live = self.state.snapshot().imaging_connected;
        self.blocking(move |engine| {
            if engine.coordinator.has_frame_source() {
                if live {
                    return Err(RigError::InvalidConfig(
                        "frame source is already connected".to_string(),
                    ));
                }
                info!("replacing stale frame source with a fresh view of {}", region.name);
            }
            let reader = SharedFrameReader::open(&region.name, region.rows, region.cols)?;
            engine.coordinator.set_frame_source(Box::new(reader));
            info!(
                "harness reading channel {} from region {}",
                channel, region.name
            );
            Ok(())
        })
        .await?;
        self.state.update(|s| s.imaging_connected = true);
        Ok(())
    }

    async fn test_command_sink(&mut self, packets: u32) -> Result<()> {
        self.blocking(move |engine| {
            for _ in 0..packets {
                if !engine.coordinator.send_direct(0.0)? {
                    return Err(RigError::InvalidConfig(
                        "no actuator connected".to_string(),
                    ));
                }
            }
            info!("sent {} test packets to the actuator", packets);
            Ok(())
        })
        .await
    }

    async fn test_frame_source(&mut self, duration: Duration) -> Result<()> {
        self.blocking(move |engine| {
            let interval = engine.run_loop.config().tick_interval;
            let start = Instant::now();
            let mut frames = 0u64;
            let mut last_mean = 0.0;
            while start.elapsed() < duration {
                let frame = engine.coordinator.preview_frame()?.ok_or_else(|| {
                    RigError::InvalidConfig("no frame source connected".to_string())
                })?;
                last_mean = frame.data.iter().sum::<f64>() / frame.data.len().max(1) as f64;
                frames += 1;
                std::thread::sleep(interval);
            }
            info!(
                "previewed {} frames in {:.1} s, last frame mean {:.4}",
                frames,
                start.elapsed().as_secs_f64(),
                last_mean
            );
            Ok(())
        })
        .await
    }

    async fn load_pipeline(&mut self, file_name: String) -> Result<()> {
        if Path::new(&file_name).components().count() != 1 || file_name.contains("..") {
            return Err(RigError::InvalidConfig(format!(
                "'{}' is not a plain file name",
                file_name
            )));
        }
        let path = self.config.pipeline_dir.join(&file_name);
        self.blocking(move |engine| {
            let pipeline = DecoderPipeline::load(&path)
                .map_err(|e| RigError::InvalidConfig(format!("{:#}", e)))?;
            engine.coordinator.set_pipeline(pipeline);
            Ok(())
        })
        .await?;
        self.state.update(|s| s.pipeline = Some(file_name));
        Ok(())
    }

    async fn run_session(&mut self, duration: Duration) -> Result<()> {
        let summary = self
            .blocking(move |engine| engine.run_loop.run(&mut engine.coordinator, duration))
            .await?;
        info!(
            "session finished: {} ticks, {} commands, {} overruns, {} errors",
            summary.ticks, summary.commands_sent, summary.overruns, summary.errors
        );
        Ok(())
    }
}

fn to_reply(kind: AckKind, result: Result<()>) -> Reply {
    match result {
        Ok(()) => Reply::ack(kind),
        Err(e) => {
            error!("harness could not complete {:?}: {}", kind, e);
            Reply::rejected(kind, e)
        }
    }
}

#[async_trait]
impl Host for HarnessHost {
    fn component(&self) -> Component {
        Component::Harness
    }

    async fn handle(&mut self, request: Request, reply: ReplyHandle) {
        let kind = request.expected_ack();
        let result = match request {
            Request::ConnectCommandSink { addr } => self.connect_command_sink(addr).await,
            Request::ConnectFrameSource { channel } => self.connect_frame_source(channel).await,
            Request::TestCommandSink { packets } => self.test_command_sink(packets).await,
            Request::TestFrameSource { duration_s } => match duration_from(duration_s) {
                Ok(duration) => self.test_frame_source(duration).await,
                Err(e) => Err(e),
            },
            Request::LoadPipeline { file_name } => self.load_pipeline(file_name).await,
            Request::RunSession { duration_s } => match duration_from(duration_s) {
                Ok(duration) => self.run_session(duration).await,
                Err(e) => Err(e),
            },
        };
        reply.send(to_reply(kind, result));
    }

    async fn shutdown(&mut self) {
        if let Some(mut engine) = self.engine.take() {
            if let Err(e) = engine.coordinator.close() {
                error!("error while closing harness collaborators: {}", e);
            }
        }
        self.state.update(|s| {
            s.actuator_connected = false;
            s.imaging_connected = false;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_carries_reason() {
        let reply = to_reply(
            AckKind::LoadPipeline,
            Err(RigError::InvalidConfig("missing".to_string())),
        );
        match reply {
            Reply::Rejected { request, reason } => {
                assert_eq!(request, AckKind::LoadPipeline);
                assert!(reason.contains("missing"));
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_worker_panic_resets_connections() {
        let state = SharedState::new();
        let mut host = HarnessHost::new(RigConfig::default(), state.clone()).unwrap();
        state.update(|s| {
            s.actuator_connected = true;
            s.imaging_connected = true;
            s.pipeline = Some("decoder.json".to_string());
        });

        let err = host
            .blocking(|_engine| -> Result<()> { panic!("stage blew up") })
            .await
            .unwrap_err();
        assert!(matches!(err, RigError::Stage { .. }));

        let snapshot = state.snapshot();
        assert!(!snapshot.actuator_connected);
        assert!(!snapshot.imaging_connected);
        assert!(snapshot.pipeline.is_none());

        // The rebuilt engine is usable and starts unconnected.
        let attached = host
            .blocking(|engine| {
                Ok(engine.coordinator.has_frame_source() || engine.coordinator.has_command_sink())
            })
            .await
            .unwrap();
        assert!(!attached);
    }
}
