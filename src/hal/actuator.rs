//! Command sinks speaking the actuator wire format: one IEEE-754 double per
//! message, big-endian, no header.

use std::io::{ErrorKind, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use log::{debug, info, warn};

use super::CommandSink;
use crate::core::{Result, RigError};

pub const COMMAND_BYTES: usize = 8;

pub fn encode_command(command: f64) -> [u8; COMMAND_BYTES] {
    command.to_be_bytes()
}

pub fn decode_command(bytes: [u8; COMMAND_BYTES]) -> f64 {
    f64::from_be_bytes(bytes)
}

fn resolve(addr: impl ToSocketAddrs) -> Result<SocketAddr> {
    addr.to_socket_addrs()?.next().ok_or_else(|| {
        RigError::Transport(std::io::Error::new(
            ErrorKind::InvalidInput,
            "address resolved to nothing",
        ))
    })
}

fn closed() -> RigError {
    RigError::Transport(std::io::Error::new(
        ErrorKind::NotConnected,
        "command sink is closed",
    ))
}

/// Connection-oriented sink: ordered and reliable.
pub struct TcpCommandSink {
    peer: SocketAddr,
    stream: Option<TcpStream>,
}

impl TcpCommandSink {
    /// `timeout` bounds both the connect and every subsequent write.
    pub fn connect(addr: impl ToSocketAddrs, timeout: Duration) -> Result<Self> {
        let peer = resolve(addr)?;
        let stream = TcpStream::connect_timeout(&peer, timeout)?;
        stream.set_nodelay(true)?;
        stream.set_write_timeout(Some(timeout))?;
        info!("connected to actuator at {} (tcp)", peer);
        Ok(Self {
            peer,
            stream: Some(stream),
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

impl CommandSink for TcpCommandSink {
    /// A failed write may have sent part of a command, after which the peer
    /// can no longer find command boundaries. The connection is dropped and
    /// every later send fails until the sink is reconnected.
    fn send_command(&mut self, command: f64) -> Result<()> {
        let stream = self.stream.as_mut().ok_or_else(closed)?;
        if let Err(e) = stream.write_all(&encode_command(command)) {
            if let Some(stream) = self.stream.take() {
                let _ = stream.shutdown(Shutdown::Both);
            }
            warn!("dropping actuator connection to {} after failed write: {}", self.peer, e);
            return Err(e.into());
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            debug!("closing actuator connection to {}", self.peer);
            match stream.shutdown(Shutdown::Both) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotConnected => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

/// Connectionless sink. A command that cannot go out immediately is
/// reported and left for the next tick to supersede.
pub struct UdpCommandSink {
    peer: SocketAddr,
    socket: Option<UdpSocket>,
}

impl UdpCommandSink {
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let peer = resolve(addr)?;
        let bind: SocketAddr = if peer.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(bind)?;
        socket.connect(peer)?;
        socket.set_nonblocking(true)?;
        info!("sending actuator commands to {} (udp)", peer);
        Ok(Self {
            peer,
            socket: Some(socket),
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

impl CommandSink for UdpCommandSink {
    fn send_command(&mut self, command: f64) -> Result<()> {
        let socket = self.socket.as_ref().ok_or_else(closed)?;
        let sent = socket.send(&encode_command(command))?;
        if sent != COMMAND_BYTES {
            return Err(RigError::Transport(std::io::Error::new(
                ErrorKind::WriteZero,
                format!("short datagram: {} of {} bytes", sent, COMMAND_BYTES),
            )));
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.socket.take().is_some() {
            debug!("closing actuator socket to {}", self.peer);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;

    #[test]
    fn test_wire_format_is_big_endian() {
        assert_eq!(encode_command(1.0), [0x3f, 0xf0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(decode_command([0x40, 0, 0, 0, 0, 0, 0, 0]), 2.0);
    }

    #[test]
    fn test_tcp_send_after_close_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut sink = TcpCommandSink::connect(addr, Duration::from_secs(1)).unwrap();
        let (mut peer, _) = listener.accept().unwrap();

        sink.send_command(3.5).unwrap();
        let mut buf = [0u8; 8];
        peer.read_exact(&mut buf).unwrap();
        assert_eq!(decode_command(buf), 3.5);

        sink.close().unwrap();
        sink.close().unwrap();
        assert!(matches!(sink.send_command(1.0), Err(RigError::Transport(_))));
    }

    #[test]
    fn test_tcp_write_failure_drops_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut sink = TcpCommandSink::connect(addr, Duration::from_secs(1)).unwrap();
        let (mut peer, _) = listener.accept().unwrap();
        peer.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

        sink.send_command(1.0).unwrap();
        // Break the stream under the sink so the next write fails.
        sink.stream.as_ref().unwrap().shutdown(Shutdown::Write).unwrap();
        assert!(matches!(sink.send_command(2.0), Err(RigError::Transport(_))));
        assert!(sink.stream.is_none());

        match sink.send_command(3.0) {
            Err(RigError::Transport(e)) => assert_eq!(e.kind(), ErrorKind::NotConnected),
            other => panic!("expected a closed sink, got {:?}", other),
        }

        // Only whole commands ever reached the peer.
        let mut received = Vec::new();
        peer.read_to_end(&mut received).unwrap();
        assert_eq!(received, encode_command(1.0).to_vec());
    }

    #[test]
    fn test_tcp_connect_refused_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        assert!(matches!(
            TcpCommandSink::connect(addr, Duration::from_millis(200)),
            Err(RigError::Transport(_))
        ));
    }

    #[test]
    fn test_udp_close_is_idempotent() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        let mut sink = UdpCommandSink::connect(receiver.local_addr().unwrap()).unwrap();
        sink.send_command(-7.25).unwrap();

        let mut buf = [0u8; 8];
        let (n, _) = receiver.recv_from(&mut buf).unwrap();
        assert_eq!(n, 8);
        assert_eq!(decode_command(buf), -7.25);

        sink.close().unwrap();
        sink.close().unwrap();
        assert!(sink.send_command(0.0).is_err());
    }
}
