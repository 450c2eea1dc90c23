/// UDP session with one relay.
///
/// The socket is bound to a fixed local port and connected to the relay, so every send goes to
/// the relay and the kernel drops datagrams from anyone else.
use std::{
    io,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket},
    time::Duration,
};

use tracing::{debug, info};

use crate::{
    config::{ClientConfig, HandshakeMode},
    protocol::{request::ConnectionRequest, WireMsg},
    AnemResult, Error,
};

/// Write side of a session, shared with the keep-alive scheduler.
pub trait DatagramSink: Send {
    fn send(&self, bytes: &[u8]) -> AnemResult<usize>;

    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }
}

/// Read side of a session, owned by the dispatcher.
pub trait DatagramSource {
    /// Block until a datagram arrives or `timeout` elapses. Elapsing yields [`Error::Timeout`].
    fn recv_timeout(&self, buf: &mut [u8], timeout: Duration) -> AnemResult<Received>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Received {
    pub len: usize,
    pub from: SocketAddr,
}

/// Resolve `host:port` to the first address it yields.
pub fn resolve(host: &str, port: u16) -> AnemResult<SocketAddr> {
    (host, port)
        .to_socket_addrs()
        .map_err(|e| Error::Resolve(format!("{host}:{port}: {e}")))?
        .next()
        .ok_or_else(|| Error::Resolve(format!("{host}:{port}: no addresses")))
}

pub struct Session {
    socket: UdpSocket,
    local: SocketAddr,
    peer: SocketAddr,
}

impl Session {
    /// Bind `local_port` on the wildcard address matching the peer's family and connect.
    pub fn connect(local_port: u16, peer: SocketAddr) -> AnemResult<Self> {
        let bind: SocketAddr = if peer.is_ipv6() {
            (Ipv6Addr::UNSPECIFIED, local_port).into()
        } else {
            (Ipv4Addr::UNSPECIFIED, local_port).into()
        };
        let socket = UdpSocket::bind(bind)?;
        socket.connect(peer)?;
        let local = socket.local_addr()?;
        debug!("bound {} -> {}", local, peer);
        Ok(Self {
            socket,
            local,
            peer,
        })
    }

    /// Resolve the relay and run the configured handshake.
    ///
    /// The handshake is fire and forget: the relay answers by streaming, not by acknowledging.
    pub fn establish(config: &ClientConfig) -> AnemResult<Self> {
        let request = config.connection_request();
        let first = Self::connect(
            config.local_port,
            resolve(&config.host, config.remote_port)?,
        )?;
        first.handshake(&request)?;
        match config.handshake {
            HandshakeMode::SinglePhase { .. } => Ok(first),
            HandshakeMode::TwoPhase { data_port } => {
                let local_port = first.local.port();
                drop(first);
                let data = Self::connect(local_port, resolve(&config.host, data_port)?)?;
                info!("{} - data association on port {}", data.local, data_port);
                Ok(data)
            }
        }
    }

    pub fn handshake(&self, request: &ConnectionRequest) -> AnemResult<()> {
        self.send(&request.to_bytes())?;
        info!("{} - {}", self.local, request.label());
        Ok(())
    }

    pub fn send(&self, bytes: &[u8]) -> AnemResult<usize> {
        Ok(self.socket.send(bytes)?)
    }

    /// A second handle on the same socket for the keep-alive scheduler.
    pub fn writer(&self) -> AnemResult<SessionWriter> {
        Ok(SessionWriter {
            socket: self.socket.try_clone()?,
            local: self.local,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

impl DatagramSource for Session {
    fn recv_timeout(&self, buf: &mut [u8], timeout: Duration) -> AnemResult<Received> {
        // A zero timeout is rejected by the socket layer.
        self.socket
            .set_read_timeout(Some(timeout.max(Duration::from_millis(1))))?;
        match self.socket.recv_from(buf) {
            Ok((len, from)) => Ok(Received { len, from }),
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut =>
            {
                Err(Error::Timeout)
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl<T: DatagramSource + ?Sized> DatagramSource for &T {
    fn recv_timeout(&self, buf: &mut [u8], timeout: Duration) -> AnemResult<Received> {
        (**self).recv_timeout(buf, timeout)
    }
}

pub struct SessionWriter {
    socket: UdpSocket,
    local: SocketAddr,
}

impl DatagramSink for SessionWriter {
    fn send(&self, bytes: &[u8]) -> AnemResult<usize> {
        Ok(self.socket.send(bytes)?)
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        Some(self.local)
    }
}
