use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{Component, Envelope, Reply, ReplyHandle, Request, SharedState};
use crate::core::{Result, RigError};

/// Hosts process one request at a time; the channel only has to cover the
/// narrow check-then-send race.
const MAILBOX_CAPACITY: usize = 4;

/// A component that executes protocol requests it owns.
#[async_trait]
pub trait Host: Send + 'static {
    fn component(&self) -> Component;

    /// Act on `request` and answer through `reply`. The mailbox stays blocked
    /// until this returns, even if the reply went out earlier.
    async fn handle(&mut self, request: Request, reply: ReplyHandle);

    /// Release whatever the host holds. Called once the mailbox closes.
    async fn shutdown(&mut self) {}
}

pub type Mailbox = mpsc::Receiver<Envelope>;

/// Sending side of a host's mailbox.
#[derive(Debug, Clone)]
pub struct HostHandle {
    component: Component,
    tx: mpsc::Sender<Envelope>,
}

pub fn mailbox(component: Component) -> (HostHandle, Mailbox) {
    let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
    (HostHandle { component, tx }, rx)
}

impl HostHandle {
    pub fn component(&self) -> Component {
        self.component
    }

    /// Deliver `request` and wait for the host's reply.
    pub async fn request(&self, request: Request) -> Result<Reply> {
        let expected = request.expected_ack();
        let (envelope, reply) = Envelope::new(request);
        let gone = || RigError::Protocol {
            expected,
            received: format!("no reply, {} host has stopped", self.component.name()),
        };
        self.tx.send(envelope).await.map_err(|_| gone())?;
        reply.await.map_err(|_| gone())
    }
}

/// Run `host` until every handle to its mailbox is dropped, toggling its
/// busy flag around each request.
pub async fn serve<H: Host>(mut host: H, mut mailbox: Mailbox, state: SharedState) {
    let component = host.component();
    state.set_busy(component, false);
    info!("{} host ready", component.name());

    while let Some(envelope) = mailbox.recv().await {
        state.set_busy(component, true);
        debug!("{} handling {:?}", component.name(), envelope.request);
        host.handle(envelope.request, envelope.reply).await;
        state.set_busy(component, false);
    }

    host.shutdown().await;
    info!("{} host stopped", component.name());
}

/// Spawn `host` on the runtime and return its mailbox handle.
pub fn spawn_host<H: Host>(host: H, state: SharedState) -> (HostHandle, JoinHandle<()>) {
    let (handle, mailbox) = mailbox(host.component());
    let task = tokio::spawn(serve(host, mailbox, state));
    (handle, task)
}

/// Reply for a request a host does not handle.
pub(crate) fn unsupported(component: Component, request: &Request) -> Reply {
    warn!(
        "{} received unexpected request: {:?}",
        component.name(),
        request
    );
    Reply::rejected(
        request.expected_ack(),
        format!("{} does not handle this request", component.name()),
    )
}

/// Longest acquisition, preview or session a host will accept.
pub const MAX_REQUEST_DURATION: Duration = Duration::from_secs(7 * 24 * 3600);

/// Request durations must be positive and no longer than
/// [`MAX_REQUEST_DURATION`].
pub(crate) fn duration_from(seconds: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(seconds)
        .ok()
        .filter(|d| !d.is_zero() && *d <= MAX_REQUEST_DURATION)
        .ok_or_else(|| RigError::InvalidConfig(format!("invalid duration {} s", seconds)))
}
