use std::time::Duration;

use log::{error, info, warn};

use super::{AckKind, Component, HostHandle, Reply, Request, SessionState, SharedState};
use crate::core::{Result, RigError};

/// Operator-side client. Checks busy flags, sequences multi-host operations
/// and verifies every acknowledgement.
#[derive(Debug, Clone)]
pub struct ControlClient {
    harness: HostHandle,
    imaging: HostHandle,
    receiver: HostHandle,
    state: SharedState,
    warmup: Duration,
}

impl ControlClient {
    pub fn new(
        harness: HostHandle,
        imaging: HostHandle,
        receiver: HostHandle,
        state: SharedState,
        warmup: Duration,
    ) -> Self {
        Self {
            harness,
            imaging,
            receiver,
            state,
            warmup,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state.snapshot()
    }

    fn handle(&self, component: Component) -> &HostHandle {
        match component {
            Component::Harness => &self.harness,
            Component::Imaging => &self.imaging,
            Component::Receiver => &self.receiver,
        }
    }

    /// Refuse locally when any of `components` is busy. Nothing is sent.
    fn admit(&self, components: &[Component]) -> Result<()> {
        match self.state.first_busy(components) {
            Some(busy) => {
                warn!("{} is busy, ignoring request", busy.name());
                Err(RigError::Busy(busy))
            }
            None => Ok(()),
        }
    }

    fn refuse(component: Component, kind: AckKind, reason: &str) -> RigError {
        warn!("{}, ignoring request", reason);
        RigError::Rejected {
            component,
            kind,
            reason: reason.to_string(),
        }
    }

    /// One request/acknowledgement exchange with a single host.
    async fn exchange(&self, component: Component, request: Request) -> Result<()> {
        let expected = request.expected_ack();
        match self.handle(component).request(request).await? {
            Reply::Ack { ack } if ack == expected => Ok(()),
            Reply::Ack { ack } => {
                error!(
                    "expected {:?} from {}, received {:?}",
                    expected,
                    component.name(),
                    ack
                );
                Err(RigError::Protocol {
                    expected,
                    received: format!("{:?}", ack),
                })
            }
            Reply::Rejected { request, reason } if request == expected => {
                warn!("{} rejected {:?}: {}", component.name(), request, reason);
                Err(RigError::Rejected {
                    component,
                    kind: request,
                    reason,
                })
            }
            Reply::Rejected { request, .. } => {
                error!(
                    "expected {:?} from {}, received a rejection of {:?}",
                    expected,
                    component.name(),
                    request
                );
                Err(RigError::Protocol {
                    expected,
                    received: format!("rejection of {:?}", request),
                })
            }
        }
    }

    /// Receiver first, so reports from the environment have somewhere to
    /// land before the harness starts commanding it.
    pub async fn connect_command_sink(&self, addr: &str) -> Result<()> {
        info!("request: connect actuator at {}", addr);
        if self.state.snapshot().actuator_connected {
            return Err(Self::refuse(
                Component::Harness,
                AckKind::ConnectCommandSink,
                "actuator is already connected",
            ));
        }
        self.admit(&[Component::Harness, Component::Receiver])?;
        let request = Request::ConnectCommandSink {
            addr: addr.to_string(),
        };
        self.exchange(Component::Receiver, request.clone()).await?;
        self.exchange(Component::Harness, request).await
    }

    /// Imaging first: the harness can only attach once the region exists.
    pub async fn connect_frame_source(&self, channel: u32) -> Result<()> {
        info!("request: connect imaging channel {}", channel);
        if self.state.snapshot().imaging_connected {
            return Err(Self::refuse(
                Component::Imaging,
                AckKind::ConnectFrameSource,
                "imaging is already connected",
            ));
        }
        self.admit(&[Component::Imaging, Component::Harness])?;
        let request = Request::ConnectFrameSource { channel };
        self.exchange(Component::Imaging, request.clone()).await?;
        self.exchange(Component::Harness, request).await
    }

    pub async fn load_pipeline(&self, file_name: &str) -> Result<()> {
        info!("request: load pipeline {}", file_name);
        self.admit(&[Component::Harness])?;
        self.exchange(
            Component::Harness,
            Request::LoadPipeline {
                file_name: file_name.to_string(),
            },
        )
        .await
    }

    pub async fn test_command_sink(&self, packets: u32) -> Result<()> {
        info!("request: test actuator with {} packets", packets);
        self.admit(&[Component::Harness])?;
        self.exchange(Component::Harness, Request::TestCommandSink { packets })
            .await
    }

    pub async fn test_frame_source(&self, duration: Duration) -> Result<()> {
        info!("request: preview imaging for {:.1} s", duration.as_secs_f64());
        self.admit(&[Component::Harness, Component::Imaging])?;
        let duration_s = duration.as_secs_f64();
        self.exchange(Component::Imaging, Request::TestFrameSource { duration_s })
            .await?;
        self.exchange(Component::Harness, Request::TestFrameSource { duration_s })
            .await
    }

    /// Start acquisition, give it the warm-up period, then run the session.
    /// Acquisition is asked to cover the warm-up as well. Returns when the
    /// session has finished.
    pub async fn run_session(&self, duration: Duration) -> Result<()> {
        info!("request: run session for {:.1} s", duration.as_secs_f64());
        self.admit(&[Component::Harness, Component::Imaging])?;
        self.exchange(
            Component::Imaging,
            Request::RunSession {
                duration_s: duration.saturating_add(self.warmup).as_secs_f64(),
            },
        )
        .await?;
        tokio::time::sleep(self.warmup).await;
        self.exchange(
            Component::Harness,
            Request::RunSession {
                duration_s: duration.as_secs_f64(),
            },
        )
        .await
    }
}
