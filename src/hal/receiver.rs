//! Auxiliary receiver: listens for values the virtual environment reports
//! back over UDP and publishes the latest ones into a small shared region
//! that stages (the position autopilot) can read.

use std::io::ErrorKind;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use crossbeam_channel::{Receiver, TryRecvError};
use log::{info, warn};

use super::actuator::{decode_command, COMMAND_BYTES};
use super::SharedFrameWriter;
use crate::core::Result;

/// Values kept per datagram; extra doubles in a datagram are dropped.
pub const RECEIVER_SLOTS: usize = 4;

const POLL_TIMEOUT: Duration = Duration::from_millis(50);

pub struct UdpReceiver {
    socket: UdpSocket,
    writer: SharedFrameWriter,
    received: u64,
}

impl UdpReceiver {
    /// Bind `addr` and create the publishing region `region` (1 x RECEIVER_SLOTS).
    pub fn bind(addr: impl ToSocketAddrs, region: &str) -> Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_read_timeout(Some(POLL_TIMEOUT))?;
        let writer = SharedFrameWriter::create(region, 1, RECEIVER_SLOTS)?;
        info!(
            "receiver listening on {} publishing to region {}",
            socket.local_addr()?,
            region
        );
        Ok(Self {
            socket,
            writer,
            received: 0,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    /// Wait up to the poll timeout for one datagram. Returns whether a value
    /// was published.
    pub fn poll_once(&mut self) -> Result<bool> {
        let mut buf = [0u8; COMMAND_BYTES * RECEIVER_SLOTS];
        let (len, from) = match self.socket.recv_from(&mut buf) {
            Ok(packet) => packet,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                return Ok(false)
            }
            Err(e) => return Err(e.into()),
        };

        if len == 0 || len % COMMAND_BYTES != 0 {
            warn!("ignoring {}-byte datagram from {}", len, from);
            return Ok(false);
        }

        for (slot, chunk) in buf[..len].chunks_exact(COMMAND_BYTES).enumerate() {
            let mut bytes = [0u8; COMMAND_BYTES];
            bytes.copy_from_slice(chunk);
            self.writer.write_slot(slot, decode_command(bytes))?;
        }
        self.received += 1;
        Ok(true)
    }

    /// Publish datagrams until `stop` fires or its sender goes away.
    pub fn run_until(&mut self, stop: &Receiver<()>) -> Result<u64> {
        loop {
            match stop.try_recv() {
                Err(TryRecvError::Empty) => {}
                _ => break,
            }
            self.poll_once()?;
        }
        info!("receiver stopped after {} datagrams", self.received);
        Ok(self.received)
    }
}
