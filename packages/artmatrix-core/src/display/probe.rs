//! Readiness probing for the display server's receiving socket.

use std::io;
use std::time::Duration;

use async_trait::async_trait;

use super::client::{
    connect_tcp, connected_udp_socket, DisplayEndpoint, Transport, TransportError,
    TransportResult,
};
use crate::protocol_constants::UDP_PROBE_WINDOW_MS;

/// Checks whether the display server currently accepts frames.
///
/// The supervisor polls this until it succeeds or the readiness timeout
/// expires. Implementations must return promptly; the caller owns pacing.
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    async fn probe(&self) -> TransportResult<()>;
}

/// Probes the configured display endpoint directly.
///
/// - TCP: a successful connect means ready.
/// - UDP: an empty datagram is sent on a connected socket; an ICMP
///   port-unreachable surfaces as `ConnectionRefused` on the following
///   receive. Silence for the probe window means something is bound.
pub struct EndpointProbe {
    endpoint: DisplayEndpoint,
    udp_window: Duration,
}

impl EndpointProbe {
    #[must_use]
    pub fn new(endpoint: DisplayEndpoint) -> Self {
        Self::with_udp_window(endpoint, Duration::from_millis(UDP_PROBE_WINDOW_MS))
    }

    #[must_use]
    pub fn with_udp_window(endpoint: DisplayEndpoint, udp_window: Duration) -> Self {
        Self {
            endpoint,
            udp_window,
        }
    }

    async fn probe_udp(&self) -> TransportResult<()> {
        let addr = self.endpoint.resolve().await?;
        let socket = connected_udp_socket(&self.endpoint, addr).await?;

        let refused = |e: io::Error| match e.kind() {
            io::ErrorKind::ConnectionRefused => TransportError::Refused {
                endpoint: self.endpoint.to_string(),
            },
            _ => TransportError::Send {
                endpoint: self.endpoint.to_string(),
                source: e,
            },
        };

        socket.send(&[]).await.map_err(refused)?;

        let mut buf = [0u8; 1];
        match tokio::time::timeout(self.udp_window, socket.recv(&mut buf)).await {
            Ok(Ok(_)) | Err(_) => Ok(()),
            Ok(Err(e)) => Err(refused(e)),
        }
    }
}

#[async_trait]
impl ReadinessProbe for EndpointProbe {
    async fn probe(&self) -> TransportResult<()> {
        match self.endpoint.transport {
            Transport::Udp => self.probe_udp().await,
            Transport::Tcp => {
                let addr = self.endpoint.resolve().await?;
                connect_tcp(&self.endpoint, addr).await.map(|_| ())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::{TcpListener, UdpSocket};

    #[tokio::test]
    async fn tcp_probe_succeeds_when_listening() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let probe = EndpointProbe::new(DisplayEndpoint::new("127.0.0.1", port, Transport::Tcp));
        probe.probe().await.unwrap();
    }

    #[tokio::test]
    async fn udp_probe_succeeds_when_bound() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = server.local_addr().unwrap().port();

        let probe = EndpointProbe::new(DisplayEndpoint::new("127.0.0.1", port, Transport::Udp));
        probe.probe().await.unwrap();
    }

    #[tokio::test]
    async fn udp_probe_reports_refusal_when_nothing_bound() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = server.local_addr().unwrap().port();
        drop(server);

        let probe = EndpointProbe::with_udp_window(
            DisplayEndpoint::new("127.0.0.1", port, Transport::Udp),
            Duration::from_millis(500),
        );
        let err = probe.probe().await.unwrap_err();
        assert!(err.is_refused(), "unexpected error: {err}");
    }
}
