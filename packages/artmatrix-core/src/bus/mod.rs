//! Message bus side: shairport-sync metadata over MQTT.

mod event;
mod subscriber;

pub use event::{EventKind, PlaybackEvent, TopicMap};
pub use subscriber::{BusConfig, BusError, BusResult, MqttSubscriber, SubscriberState, TlsConfig};
