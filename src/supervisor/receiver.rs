use std::thread::{self, JoinHandle};

use async_trait::async_trait;
use crossbeam_channel::{bounded, Sender};
use log::{debug, error, info, warn};

use super::host::unsupported;
use super::{AckKind, Component, Host, Reply, ReplyHandle, Request};
use crate::config::ReceiverConfig;
use crate::core::{Result, RigError};
use crate::hal::UdpReceiver;

struct Listener {
    stop_tx: Sender<()>,
    thread: JoinHandle<Result<u64>>,
}

/// Runs the auxiliary UDP receiver once the actuator is being connected.
pub struct ReceiverHost {
    config: ReceiverConfig,
    listener: Option<Listener>,
}

impl ReceiverHost {
    pub fn new(config: ReceiverConfig) -> Self {
        Self {
            config,
            listener: None,
        }
    }

    /// Starts the listener, or keeps the running one. A failed actuator
    /// connect leaves the receiver up, so the retry has to succeed here.
    fn start(&mut self) -> Result<()> {
        if let Some(listener) = self.listener.take() {
            if !listener.thread.is_finished() {
                debug!("receiver already listening on {}", self.config.bind_addr);
                self.listener = Some(listener);
                return Ok(());
            }
            match listener.thread.join() {
                Ok(Err(e)) => warn!("previous receiver exited: {}", e),
                Err(_) => warn!("previous receiver thread panicked"),
                Ok(Ok(_)) => {}
            }
        }
        let mut receiver = UdpReceiver::bind(self.config.bind_addr.as_str(), &self.config.region)?;
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let thread = thread::Builder::new()
            .name("udp-receiver".to_string())
            .spawn(move || receiver.run_until(&stop_rx))
            .map_err(|e| RigError::resource(&self.config.region, e))?;
        self.listener = Some(Listener { stop_tx, thread });
        Ok(())
    }
}

#[async_trait]
impl Host for ReceiverHost {
    fn component(&self) -> Component {
        Component::Receiver
    }

    async fn handle(&mut self, request: Request, reply: ReplyHandle) {
        match request {
            Request::ConnectCommandSink { addr } => {
                let kind = AckKind::ConnectCommandSink;
                match self.start() {
                    Ok(()) => {
                        info!("receiver configured for actuator at {}", addr);
                        reply.send(Reply::ack(kind));
                    }
                    Err(e) => {
                        error!("receiver could not start: {}", e);
                        reply.send(Reply::rejected(kind, e));
                    }
                }
            }
            other => reply.send(unsupported(Component::Receiver, &other)),
        }
    }

    async fn shutdown(&mut self) {
        let Some(listener) = self.listener.take() else {
            return;
        };
        let _ = listener.stop_tx.try_send(());
        match tokio::task::spawn_blocking(move || listener.thread.join()).await {
            Ok(Ok(Ok(datagrams))) => info!("receiver closed after {} datagrams", datagrams),
            Ok(Ok(Err(e))) => error!("receiver failed: {}", e),
            _ => error!("receiver thread panicked"),
        }
    }
}
