//! Network client that ships frames to the display server.
//!
//! Each [`DisplayClient::send`] is one complete, self-contained packet: a UDP
//! datagram or a single TCP write. Nothing is buffered between frames and a
//! failed send is reported to the caller rather than retried.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UdpSocket};

use super::frame::DisplayFrame;
use super::wire::{encode_frame, WireOptions};
use crate::protocol_constants::{MAX_UDP_PAYLOAD, TCP_CONNECT_TIMEOUT_MS};

/// Errors talking to the display server.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Host name lookup failed.
    #[error("failed to resolve {endpoint}: {source}")]
    Resolve {
        endpoint: String,
        #[source]
        source: io::Error,
    },

    /// Host name resolved to nothing.
    #[error("no addresses found for {0}")]
    NoAddress(String),

    /// Nothing is listening at the endpoint (yet).
    #[error("{endpoint} refused the connection")]
    Refused { endpoint: String },

    /// Connecting timed out.
    #[error("timed out connecting to {endpoint}")]
    Timeout { endpoint: String },

    /// Socket setup failed.
    #[error("failed to open socket for {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: io::Error,
    },

    /// The frame write itself failed.
    #[error("failed to send frame to {endpoint}: {source}")]
    Send {
        endpoint: String,
        #[source]
        source: io::Error,
    },

    /// The datagram was only partially written.
    #[error("short write to {endpoint}: {written} of {expected} bytes")]
    ShortWrite {
        endpoint: String,
        written: usize,
        expected: usize,
    },

    /// The encoded frame does not fit in one UDP datagram.
    #[error("frame of {size} bytes exceeds the {max}-byte datagram limit")]
    FrameTooLarge { size: usize, max: usize },
}

impl TransportError {
    /// Returns true when the receiver is simply not listening yet.
    #[must_use]
    pub fn is_refused(&self) -> bool {
        matches!(self, Self::Refused { .. })
    }

    fn from_io(endpoint: &DisplayEndpoint, source: io::Error, sending: bool) -> Self {
        let endpoint = endpoint.to_string();
        match source.kind() {
            io::ErrorKind::ConnectionRefused => Self::Refused { endpoint },
            _ if sending => Self::Send { endpoint, source },
            _ => Self::Connect { endpoint, source },
        }
    }
}

/// Convenient Result alias for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Socket type used to reach the display server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// One datagram per frame (what `ft-server` listens on).
    #[default]
    Udp,
    /// One stream write per frame.
    Tcp,
}

/// Where the display server listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayEndpoint {
    pub host: String,
    pub port: u16,
    pub transport: Transport,
}

impl DisplayEndpoint {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16, transport: Transport) -> Self {
        Self {
            host: host.into(),
            port,
            transport,
        }
    }

    /// Resolves the endpoint, preferring IPv4 like `ft-server` does.
    pub async fn resolve(&self) -> TransportResult<SocketAddr> {
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((self.host.as_str(), self.port))
            .await
            .map_err(|source| TransportError::Resolve {
                endpoint: self.to_string(),
                source,
            })?
            .collect();

        addrs
            .iter()
            .find(|a| a.is_ipv4())
            .or_else(|| addrs.first())
            .copied()
            .ok_or_else(|| TransportError::NoAddress(self.to_string()))
    }
}

impl fmt::Display for DisplayEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = match self.transport {
            Transport::Udp => "udp",
            Transport::Tcp => "tcp",
        };
        write!(f, "{}://{}:{}", scheme, self.host, self.port)
    }
}

/// Binds an ephemeral UDP socket of the same family and connects it.
pub(crate) async fn connected_udp_socket(
    endpoint: &DisplayEndpoint,
    addr: SocketAddr,
) -> TransportResult<UdpSocket> {
    let local = if addr.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
    let socket = UdpSocket::bind(local)
        .await
        .map_err(|e| TransportError::from_io(endpoint, e, false))?;
    socket
        .connect(addr)
        .await
        .map_err(|e| TransportError::from_io(endpoint, e, false))?;
    Ok(socket)
}

/// Opens a TCP stream, bounded by [`TCP_CONNECT_TIMEOUT_MS`].
pub(crate) async fn connect_tcp(
    endpoint: &DisplayEndpoint,
    addr: SocketAddr,
) -> TransportResult<TcpStream> {
    let timeout = Duration::from_millis(TCP_CONNECT_TIMEOUT_MS);
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => {
            // Frames are written whole; don't let Nagle split them across ticks.
            let _ = stream.set_nodelay(true);
            Ok(stream)
        }
        Ok(Err(e)) => Err(TransportError::from_io(endpoint, e, false)),
        Err(_) => Err(TransportError::Timeout {
            endpoint: endpoint.to_string(),
        }),
    }
}

/// Destination for encoded frames.
///
/// The frame dispatcher depends on this trait rather than on sockets so that
/// tests can substitute slow or failing sinks.
#[async_trait]
pub trait FrameSink: Send {
    /// Sends one frame placed per `options`, returning the bytes written.
    /// Must not retry internally.
    async fn send_frame(
        &mut self,
        frame: &DisplayFrame,
        options: &WireOptions,
    ) -> TransportResult<usize>;

    /// Human-readable destination for log lines.
    fn describe(&self) -> String;
}

/// Opens [`FrameSink`]s once the display server is ready.
#[async_trait]
pub trait FrameSinkConnector: Send + Sync {
    async fn connect(&self) -> TransportResult<Box<dyn FrameSink>>;
}

/// Connects [`DisplayClient`]s to a fixed endpoint.
#[derive(Debug, Clone)]
pub struct DisplayConnector {
    pub endpoint: DisplayEndpoint,
}

#[async_trait]
impl FrameSinkConnector for DisplayConnector {
    async fn connect(&self) -> TransportResult<Box<dyn FrameSink>> {
        let client = DisplayClient::connect(self.endpoint.clone()).await?;
        Ok(Box::new(client))
    }
}

enum Connection {
    Udp(UdpSocket),
    /// `None` after a failed write; reopened on the next send.
    Tcp(Option<TcpStream>),
}

/// Connection to a flaschen-taschen display server.
pub struct DisplayClient {
    endpoint: DisplayEndpoint,
    addr: SocketAddr,
    connection: Connection,
}

impl DisplayClient {
    /// Connects to the display server.
    ///
    /// For UDP this only binds and connects the local socket; a receiver that
    /// is not listening shows up as [`TransportError::Refused`] on a later send.
    pub async fn connect(endpoint: DisplayEndpoint) -> TransportResult<Self> {
        let addr = endpoint.resolve().await?;
        let connection = match endpoint.transport {
            Transport::Udp => Connection::Udp(connected_udp_socket(&endpoint, addr).await?),
            Transport::Tcp => Connection::Tcp(Some(connect_tcp(&endpoint, addr).await?)),
        };

        log::info!("[Display] Connected to {} ({})", endpoint, addr);
        Ok(Self {
            endpoint,
            addr,
            connection,
        })
    }

    #[must_use]
    pub fn endpoint(&self) -> &DisplayEndpoint {
        &self.endpoint
    }

    /// Encodes and sends one frame, returning the number of bytes written.
    ///
    /// `options` picks the frame's offset and layer, so one client can feed
    /// both the cover art layer and an overlay above it.
    pub async fn send(
        &mut self,
        frame: &DisplayFrame,
        options: &WireOptions,
    ) -> TransportResult<usize> {
        let packet = encode_frame(frame, options);

        match &mut self.connection {
            Connection::Udp(socket) => {
                if packet.len() > MAX_UDP_PAYLOAD {
                    return Err(TransportError::FrameTooLarge {
                        size: packet.len(),
                        max: MAX_UDP_PAYLOAD,
                    });
                }
                let written = socket
                    .send(&packet)
                    .await
                    .map_err(|e| TransportError::from_io(&self.endpoint, e, true))?;
                if written != packet.len() {
                    return Err(TransportError::ShortWrite {
                        endpoint: self.endpoint.to_string(),
                        written,
                        expected: packet.len(),
                    });
                }
                Ok(written)
            }
            Connection::Tcp(slot) => {
                let mut stream = match slot.take() {
                    Some(stream) => stream,
                    None => connect_tcp(&self.endpoint, self.addr).await?,
                };
                let result = async {
                    stream.write_all(&packet).await?;
                    stream.flush().await
                }
                .await;

                match result {
                    Ok(()) => {
                        *slot = Some(stream);
                        Ok(packet.len())
                    }
                    Err(e) => Err(TransportError::from_io(&self.endpoint, e, true)),
                }
            }
        }
    }
}

#[async_trait]
impl FrameSink for DisplayClient {
    async fn send_frame(
        &mut self,
        frame: &DisplayFrame,
        options: &WireOptions,
    ) -> TransportResult<usize> {
        self.send(frame, options).await
    }

    fn describe(&self) -> String {
        self.endpoint.to_string()
    }
}
