use std::time::Instant;

use async_trait::async_trait;
use log::{debug, error, info};

use super::host::{duration_from, unsupported};
use super::{AckKind, Component, Host, Reply, ReplyHandle, Request, SharedState};
use crate::config::{RegionConfig, RigConfig};
use crate::hal::mock::SyntheticImager;
use crate::hal::SharedFrameWriter;

/// Owns the frame region and drives its producer for timed acquisitions.
pub struct ImagingHost {
    region: RegionConfig,
    frame_rate_hz: f64,
    channel: u32,
    writer: Option<SharedFrameWriter>,
    state: SharedState,
}

impl ImagingHost {
    pub fn new(config: &RigConfig, state: SharedState) -> Self {
        Self {
            region: config.frame_region.clone(),
            frame_rate_hz: config.synthetic_frame_rate_hz,
            channel: 0,
            writer: None,
            state,
        }
    }

    /// Creates the frame region, or keeps the existing one so a connect the
    /// harness failed to complete can be retried. The harness marks imaging
    /// connected once it has attached.
    fn connect(&mut self, channel: u32) -> Reply {
        let kind = AckKind::ConnectFrameSource;
        if self.writer.is_some() {
            debug!(
                "imaging region {} already exists, switching to channel {}",
                self.region.name, channel
            );
            self.channel = channel;
            return Reply::ack(kind);
        }
        match SharedFrameWriter::create(&self.region.name, self.region.rows, self.region.cols) {
            Ok(writer) => {
                info!(
                    "imaging channel {} ready: {}x{} region {}",
                    channel, self.region.rows, self.region.cols, self.region.name
                );
                self.writer = Some(writer);
                self.channel = channel;
                Reply::ack(kind)
            }
            Err(e) => {
                error!("could not create frame region: {}", e);
                Reply::rejected(kind, e)
            }
        }
    }

    /// Acknowledge as soon as frames are flowing, then keep producing (and
    /// stay busy) for `duration_s`.
    async fn acquire(&mut self, kind: AckKind, duration_s: f64, reply: ReplyHandle) {
        let duration = match duration_from(duration_s) {
            Ok(duration) => duration,
            Err(e) => return reply.send(Reply::rejected(kind, e)),
        };
        let Some(writer) = self.writer.take() else {
            error!("acquisition requested before imaging was connected");
            return reply.send(Reply::rejected(kind, "imaging is not connected"));
        };

        let imager = match SyntheticImager::start(writer, self.frame_rate_hz, self.channel) {
            Ok(imager) => imager,
            Err(e) => {
                error!("could not start acquisition: {}", e);
                self.state.update(|s| s.imaging_connected = false);
                return reply.send(Reply::rejected(kind, e));
            }
        };
        reply.send(Reply::ack(kind));

        let started = Instant::now();
        tokio::time::sleep(duration).await;
        match tokio::task::spawn_blocking(move || imager.stop()).await {
            Ok(Ok((writer, frames))) => {
                let secs = started.elapsed().as_secs_f64();
                info!(
                    "acquisition complete after {:.2} s: {} frames, mean rate {:.2} Hz",
                    secs,
                    frames,
                    frames as f64 / secs.max(f64::EPSILON)
                );
                self.writer = Some(writer);
            }
            Ok(Err(e)) => {
                error!("acquisition failed: {}", e);
                self.state.update(|s| s.imaging_connected = false);
            }
            Err(e) => {
                error!("acquisition worker failed: {}", e);
                self.state.update(|s| s.imaging_connected = false);
            }
        }
    }
}

#[async_trait]
impl Host for ImagingHost {
    fn component(&self) -> Component {
        Component::Imaging
    }

    async fn handle(&mut self, request: Request, reply: ReplyHandle) {
        match request {
            Request::ConnectFrameSource { channel } => reply.send(self.connect(channel)),
            Request::TestFrameSource { duration_s } => {
                self.acquire(AckKind::TestFrameSource, duration_s, reply).await
            }
            Request::RunSession { duration_s } => {
                self.acquire(AckKind::RunSession, duration_s, reply).await
            }
            other => reply.send(unsupported(Component::Imaging, &other)),
        }
    }

    async fn shutdown(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.close() {
                error!("error while releasing frame region: {}", e);
            }
        }
        self.state.update(|s| s.imaging_connected = false);
    }
}

