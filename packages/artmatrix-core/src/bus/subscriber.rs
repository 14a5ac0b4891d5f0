//! MQTT subscriber for shairport-sync metadata.
//!
//! Runs the rumqttc event loop until cancelled, re-subscribing on every
//! CONNACK and reconnecting with [`Backoff`] after network errors. Only a
//! broker that refuses us for a reason retrying cannot fix ends the loop
//! early.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Outgoing,
    Packet, QoS, Transport as MqttTransport,
};
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::events::{BusEvent, EventEmitter};
use crate::protocol_constants::{
    DEFAULT_MQTT_PORT, DEFAULT_TOPIC_ROOT, MAX_INCOMING_PACKET_BYTES,
    MQTT_REQUEST_CHANNEL_CAPACITY, RECONNECT_MAX_MS,
};
use crate::retry::{sleep_or_cancel, Backoff};
use crate::utils::{expand_home, now_millis};

use super::event::{PlaybackEvent, TopicMap};

/// Bus connection failures that end the subscriber.
#[derive(Debug, Error)]
pub enum BusError {
    /// The broker rejected the connection permanently (credentials, ACL,
    /// client id, or protocol version).
    #[error("broker {broker} refused the connection: {reason:?}")]
    ConnectionRefused {
        broker: String,
        reason: ConnectReturnCode,
    },

    /// TLS material could not be read.
    #[error("failed to read TLS file {}: {source}", .path.display())]
    Tls {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Result alias for bus operations.
pub type BusResult<T> = Result<T, BusError>;

/// Connection state of the subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberState {
    Disconnected,
    Connecting,
    Subscribed,
}

impl fmt::Display for SubscriberState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Subscribed => "subscribed",
        };
        f.write_str(s)
    }
}

/// TLS settings for the broker connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsConfig {
    /// PEM bundle of trusted CAs.
    pub ca_certs: PathBuf,
    /// Client certificate and key (PEM) for mutual TLS.
    pub client_cert: Option<PathBuf>,
    pub client_key: Option<PathBuf>,
}

/// Broker connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusConfig {
    pub host: String,
    pub port: u16,
    pub topic_root: String,
    /// Generated per run when unset.
    pub client_id: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
    /// Largest packet accepted from the broker.
    pub max_packet_size: usize,
    pub tls: Option<TlsConfig>,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_MQTT_PORT,
            topic_root: DEFAULT_TOPIC_ROOT.to_string(),
            client_id: None,
            username: None,
            password: None,
            keep_alive: Duration::from_secs(60),
            max_packet_size: MAX_INCOMING_PACKET_BYTES,
            tls: None,
        }
    }
}

impl BusConfig {
    /// `host:port` for log lines and errors.
    #[must_use]
    pub fn broker(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Builds rumqttc options, reading TLS material from disk if configured.
    pub fn mqtt_options(&self) -> BusResult<MqttOptions> {
        let client_id = self.client_id.clone().unwrap_or_else(|| {
            let id = uuid::Uuid::new_v4().simple().to_string();
            format!("artmatrix-{}", &id[..8])
        });

        let mut options = MqttOptions::new(client_id, self.host.clone(), self.port);
        options.set_keep_alive(self.keep_alive.max(Duration::from_secs(5)));
        // Outgoing packets are only SUBSCRIBE/PING, the default limit is fine.
        options.set_max_packet_size(self.max_packet_size, 10 * 1024);

        if let Some(username) = &self.username {
            options.set_credentials(username.clone(), self.password.clone().unwrap_or_default());
        }

        if let Some(tls) = &self.tls {
            let ca = read_tls_file(&tls.ca_certs)?;
            let client_auth = match (&tls.client_cert, &tls.client_key) {
                (Some(cert), Some(key)) => Some((read_tls_file(cert)?, read_tls_file(key)?)),
                _ => None,
            };
            options.set_transport(MqttTransport::tls(ca, client_auth, None));
        }

        Ok(options)
    }
}

fn read_tls_file(path: &Path) -> BusResult<Vec<u8>> {
    let path = expand_home(path);
    std::fs::read(&path).map_err(|source| BusError::Tls { path, source })
}

/// Refusals that no amount of retrying will fix.
fn is_permanent(code: ConnectReturnCode) -> bool {
    matches!(
        code,
        ConnectReturnCode::BadUserNamePassword
            | ConnectReturnCode::NotAuthorized
            | ConnectReturnCode::BadClientId
            | ConnectReturnCode::RefusedProtocolVersion
    )
}

/// Subscribes to shairport-sync metadata and forwards every message.
pub struct MqttSubscriber {
    config: BusConfig,
    topics: TopicMap,
    emitter: Arc<dyn EventEmitter>,
    state: watch::Sender<SubscriberState>,
}

impl MqttSubscriber {
    #[must_use]
    pub fn new(config: BusConfig, emitter: Arc<dyn EventEmitter>) -> Self {
        let topics = TopicMap::new(config.topic_root.clone());
        let (state, _) = watch::channel(SubscriberState::Disconnected);
        Self {
            config,
            topics,
            emitter,
            state,
        }
    }

    #[must_use]
    pub fn topics(&self) -> &TopicMap {
        &self.topics
    }

    /// Follows connection state changes.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<SubscriberState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: SubscriberState) {
        let changed = self.state.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });
        if changed {
            self.emitter.emit_bus(BusEvent::StateChanged {
                state,
                timestamp: now_millis(),
            });
        }
    }

    /// Runs until `cancel` fires, calling `on_event` for every message
    /// received.
    ///
    /// # Errors
    ///
    /// Only permanent failures: a broker refusal that retrying cannot fix,
    /// or unreadable TLS files.
    pub async fn run<F>(&self, cancel: &CancellationToken, mut on_event: F) -> BusResult<()>
    where
        F: FnMut(PlaybackEvent) + Send,
    {
        let options = self.config.mqtt_options()?;
        let broker = self.config.broker();
        let (client, mut eventloop) = AsyncClient::new(options, MQTT_REQUEST_CHANNEL_CAPACITY);
        let mut backoff = Backoff::default();

        log::info!("[Subscriber] Connecting to {} (topic root {})", broker, self.topics.root());
        self.set_state(SubscriberState::Connecting);

        loop {
            let polled = tokio::select! {
                _ = cancel.cancelled() => break,
                polled = eventloop.poll() => polled,
            };

            match polled {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    backoff.reset();
                    for topic in self.topics.subscriptions() {
                        if let Err(e) = client.try_subscribe(topic.as_str(), QoS::AtMostOnce) {
                            log::warn!("[Subscriber] Failed to queue subscription {}: {}", topic, e);
                        }
                    }
                    log::info!(
                        "[Subscriber] Connected to {} (session present: {})",
                        broker,
                        ack.session_present
                    );
                    self.set_state(SubscriberState::Subscribed);
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    log::trace!(
                        "[Subscriber] {} ({} bytes)",
                        publish.topic,
                        publish.payload.len()
                    );
                    on_event(PlaybackEvent::new(publish.topic, publish.payload));
                }
                Ok(_) => {}
                Err(ConnectionError::ConnectionRefused(code)) if is_permanent(code) => {
                    log::error!("[Subscriber] {} refused the connection: {:?}", broker, code);
                    self.set_state(SubscriberState::Disconnected);
                    return Err(BusError::ConnectionRefused { broker, reason: code });
                }
                Err(e) => {
                    self.set_state(SubscriberState::Disconnected);
                    let delay = backoff.next().unwrap_or(Duration::from_millis(RECONNECT_MAX_MS));
                    log::warn!(
                        "[Subscriber] Connection to {} failed: {}; retrying in {}ms",
                        broker,
                        e,
                        delay.as_millis()
                    );
                    self.emitter.emit_bus(BusEvent::Reconnecting {
                        delay_ms: delay.as_millis() as u64,
                        timestamp: now_millis(),
                    });
                    if !sleep_or_cancel(delay, cancel).await {
                        break;
                    }
                    self.set_state(SubscriberState::Connecting);
                }
            }
        }

        let connected = *self.state.borrow() == SubscriberState::Subscribed;
        if connected {
            disconnect(&client, &mut eventloop).await;
        }
        self.set_state(SubscriberState::Disconnected);
        log::info!("[Subscriber] Stopped");
        Ok(())
    }
}

/// Sends DISCONNECT and drives the event loop until it is flushed.
async fn disconnect(client: &AsyncClient, eventloop: &mut EventLoop) {
    if client.try_disconnect().is_err() {
        return;
    }
    let flushed = tokio::time::timeout(Duration::from_millis(500), async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    })
    .await;
    if flushed.is_err() {
        log::debug!("[Subscriber] Timed out sending DISCONNECT");
    }
}
