//! # evq-mqtt
//!
//! MQTT 5.0 client for the `evq` event loop. QoS 0 only: CONNECT/CONNACK,
//! PUBLISH, SUBSCRIBE/SUBACK, UNSUBSCRIBE/UNSUBACK, PINGREQ/PINGRESP and
//! DISCONNECT. The client owns one byte-stream channel and keeps the
//! session alive with engine timers: a periodic keep-alive and a fixed
//! backoff reconnect.
//!
//! - [`codec`]  – packet encoders and field-level decoding.
//! - [`reader`] – incremental framing of the inbound byte stream.
//! - [`client`] – session lifecycle and the user-facing callbacks.

pub mod client;
pub mod codec;
pub mod error;
pub mod reader;

pub use client::{MqttClient, MqttEvents, MqttOptions};
pub use codec::{Will, MAX_REMAINING_LENGTH};
pub use error::ProtocolError;
pub use reader::{Frame, PacketReader};
