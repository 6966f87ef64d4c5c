//! UDP multicast session owned by one relay.
//!
//! The socket is configured with socket2 (reuse, bind, join, buffer size)
//! and then handed to tokio. Dropping the session leaves the group and
//! closes the socket, which is the only cleanup any exit path needs.

use std::future::Future;
use std::io::{self, ErrorKind};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use log::{debug, info, warn};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

use super::address::MulticastEndpoint;
use crate::config::RelayConfig;
use crate::error::{RelayError, Result};

/// Largest datagram the relay reads (MPEG-TS over RTP fits in 1328 bytes)
pub const MAX_DATAGRAM_SIZE: usize = 1600;

/// Kernel receive buffer requested for each session
const RECV_BUFFER_SIZE: usize = 1024 * 1024;

/// Metadata for one received datagram. The payload stays in the caller's buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Datagram {
    /// Payload length in the receive buffer
    pub len: usize,
    /// Sender address
    pub source: SocketAddr,
    /// Destination address from the IP header, when the platform reports it
    pub destination: Option<IpAddr>,
    /// Arrival interface index, when reported
    pub interface: Option<u32>,
    /// TTL / hop limit, when reported
    pub ttl: Option<u8>,
}

impl Datagram {
    /// Datagram without control metadata
    pub fn bare(len: usize, source: SocketAddr) -> Self {
        Self {
            len,
            source,
            destination: None,
            interface: None,
            ttl: None,
        }
    }
}

/// Result of a bounded read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    Datagram(Datagram),
    /// Nothing arrived before the deadline
    Timeout,
}

/// Anything the relay loop can read datagrams from.
pub trait DatagramSource: Send {
    /// Read one datagram into `buf`, giving up after `timeout`.
    /// A timeout is reported as `ReadOutcome::Timeout`, never as an error.
    fn recv(
        &mut self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> impl Future<Output = io::Result<ReadOutcome>> + Send;

    /// Whether datagrams carry destination metadata.
    fn has_metadata(&self) -> bool;
}

/// Opens a datagram source for a validated endpoint.
pub trait SessionOpener: Send + Sync {
    type Source: DatagramSource + 'static;

    fn open(&self, endpoint: &MulticastEndpoint) -> Result<Self::Source>;
}

/// Socket options applied when opening a session
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// IPv4 interface to join on (None = system default)
    pub interface: Option<Ipv4Addr>,
    /// Set SO_REUSEADDR so several relays can share a group:port
    pub reuse_address: bool,
}

impl From<&RelayConfig> for SessionOptions {
    fn from(config: &RelayConfig) -> Self {
        Self {
            interface: config.interface,
            reuse_address: config.reuse_address,
        }
    }
}

/// Production opener: joins a real multicast group per request
#[derive(Debug, Clone, Default)]
pub struct MulticastOpener {
    options: SessionOptions,
}

impl MulticastOpener {
    pub fn new(options: SessionOptions) -> Self {
        Self { options }
    }
}

impl SessionOpener for MulticastOpener {
    type Source = MulticastSession;

    fn open(&self, endpoint: &MulticastEndpoint) -> Result<MulticastSession> {
        MulticastSession::open(*endpoint, &self.options)
    }
}

/// Joined multicast socket
pub struct MulticastSession {
    socket: UdpSocket,
    endpoint: MulticastEndpoint,
    interface: Ipv4Addr,
    metadata: bool,
}

impl MulticastSession {
    /// Bind, join and configure a socket for `endpoint`.
    /// Must be called from within a tokio runtime.
    pub fn open(endpoint: MulticastEndpoint, options: &SessionOptions) -> Result<Self> {
        let group_addr = endpoint.socket_addr();
        let join_err = |e: io::Error| RelayError::join(group_addr, e);

        let socket = Socket::new(Domain::for_address(group_addr), Type::DGRAM, Some(Protocol::UDP))
            .map_err(join_err)?;

        if options.reuse_address {
            socket.set_reuse_address(true).map_err(join_err)?;
        }
        if endpoint.group.is_ipv6() {
            socket.set_only_v6(true).map_err(join_err)?;
        }

        socket.bind(&bind_address(&endpoint).into()).map_err(join_err)?;

        let interface = options.interface.unwrap_or(Ipv4Addr::UNSPECIFIED);
        match endpoint.group {
            IpAddr::V4(group) => socket.join_multicast_v4(&group, &interface),
            IpAddr::V6(group) => socket.join_multicast_v6(&group, 0),
        }
        .map_err(join_err)?;

        info!("joined multicast group {} on interface {}", endpoint, interface);

        // Best effort: a larger buffer absorbs short client write stalls
        if let Err(e) = socket.set_recv_buffer_size(RECV_BUFFER_SIZE) {
            debug!("set_recv_buffer_size failed: {}", e);
        }

        let metadata = match enable_metadata(&socket, endpoint.group) {
            Ok(()) => true,
            Err(e) => {
                warn!("control message flags unavailable, destination filter disabled: {}", e);
                false
            }
        };

        socket.set_nonblocking(true).map_err(join_err)?;
        let std_socket: std::net::UdpSocket = socket.into();
        let socket = UdpSocket::from_std(std_socket).map_err(join_err)?;

        Ok(Self {
            socket,
            endpoint,
            interface,
            metadata,
        })
    }

    async fn recv_datagram(&self, buf: &mut [u8]) -> io::Result<Datagram> {
        #[cfg(any(target_os = "linux", target_os = "android"))]
        {
            if self.metadata {
                use std::os::fd::AsRawFd;
                use tokio::io::Interest;

                let fd = self.socket.as_raw_fd();
                return self
                    .socket
                    .async_io(Interest::READABLE, || {
                        super::pktinfo::recv_with_metadata(fd, &mut *buf)
                    })
                    .await;
            }
        }

        let (len, source) = self.socket.recv_from(buf).await?;
        Ok(Datagram::bare(len, source))
    }
}

impl DatagramSource for MulticastSession {
    async fn recv(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<ReadOutcome> {
        match tokio::time::timeout(timeout, self.recv_datagram(buf)).await {
            Ok(Ok(datagram)) => Ok(ReadOutcome::Datagram(datagram)),
            Ok(Err(e)) if e.kind() == ErrorKind::TimedOut => Ok(ReadOutcome::Timeout),
            Ok(Err(e)) => Err(e),
            Err(_) => Ok(ReadOutcome::Timeout),
        }
    }

    fn has_metadata(&self) -> bool {
        self.metadata
    }
}

impl Drop for MulticastSession {
    fn drop(&mut self) {
        let result = match self.endpoint.group {
            IpAddr::V4(group) => self.socket.leave_multicast_v4(group, self.interface),
            IpAddr::V6(group) => self.socket.leave_multicast_v6(&group, 0),
        };
        match result {
            Ok(()) => debug!("left multicast group {}", self.endpoint),
            Err(e) => debug!("leave multicast group {} failed: {}", self.endpoint, e),
        }
    }
}

/// Address the socket binds to.
/// Unix lets us bind the group itself, which keeps other groups on the same
/// port out of this socket. Windows requires the unspecified address.
fn bind_address(endpoint: &MulticastEndpoint) -> SocketAddr {
    if cfg!(unix) {
        endpoint.socket_addr()
    } else {
        let any: IpAddr = match endpoint.group {
            IpAddr::V4(_) => Ipv4Addr::UNSPECIFIED.into(),
            IpAddr::V6(_) => std::net::Ipv6Addr::UNSPECIFIED.into(),
        };
        SocketAddr::new(any, endpoint.port)
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn enable_metadata(socket: &Socket, group: IpAddr) -> io::Result<()> {
    super::pktinfo::enable(socket, group)
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn enable_metadata(_socket: &Socket, _group: IpAddr) -> io::Result<()> {
    Err(io::Error::new(
        ErrorKind::Unsupported,
        "per-datagram destination metadata is not supported on this platform",
    ))
}
