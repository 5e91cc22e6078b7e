//! # Step-Driven MQTT Client for Embedded Wi-Fi Devices
//!
//! `looped-mqtt` is a `no_std`, allocation-free MQTT 3.1.1 client for devices
//! whose single thread must never block. The whole connection lifecycle is a
//! state machine advanced by [`MqttClient::step`]: each call does one bounded
//! piece of work and returns, and the host calls it again from its main loop.
//!
//! ## Core Features
//!
//! - **`no_std` & `no_alloc`:** one fixed packet buffer is shared by every
//!   encode and decode; collections are `heapless`.
//! - **Self-healing connection:** Wi-Fi association, socket connect, broker
//!   handshake, subscriptions, birth and discovery messages are all replayed
//!   automatically after any failure.
//! - **Resumable reads:** inbound packets are decoded a byte at a time across
//!   ticks, with inactivity timeouts.
//! - **QoS 0 & 1:** "at most once" and "at least once" publishing and
//!   subscriptions.
//! - **Bring your own driver:** the radio and socket are reached through the
//!   [`Station`] and [`Transport`] traits, time through [`Clock`].
//!
//! ## Usage
//!
//! ```ignore
//! let options = MqttOptions::new("home-ap", "hunter2", broker_ip)
//!     .with_client_id("porch-sensor")
//!     .with_credentials("device", "secret");
//!
//! let mut on_light = |_topic: &str, payload: &[u8]| relay.set(payload == b"ON");
//! let mut client: MqttClient<'_, _, _, _> = MqttClient::new(wifi, socket, SystemClock, options);
//! client.set_will("porch/status", b"offline", QoS::AtLeastOnce, true)?;
//! client.set_birth("porch/status", b"online")?;
//! client.on_subscribe("porch/light/set", &mut on_light)?;
//!
//! loop {
//!     client.step();
//!     if client.mqtt_is_connected() && reading_ready() {
//!         let _ = client.publish("porch/temp", reading(), QoS::AtMostOnce, false);
//!     }
//! }
//! ```
//!
//! Publishes from other tasks go through a [`PublisherHandle`] whose channel
//! receiver is attached with [`MqttClient::attach_outbox`].
//!
//! ## Logging
//!
//! Enable exactly one of the `log`, `defmt` or `esp32-log` features to get
//! connection milestones and protocol diagnostics.

#![cfg_attr(not(test), no_std)]

// This must go first so the logging macros are visible to every module.
#[macro_use]
mod fmt;

pub mod client;
pub mod config;
pub mod error;
pub mod outbox;
pub mod packet;
pub mod reader;
pub mod status;
pub mod subscription;
pub mod time;
pub mod transport;
pub mod util;

// Re-export key types for easier access at the crate root.
pub use client::MqttClient;
pub use config::{MqttOptions, ProtocolLevel, RetryLimits, Timeouts};
pub use error::{ConnectReturnCode, MqttError, ProtocolError};
pub use outbox::{
    BufferedOutbox, PublishRequest, PublishRequestChannel, PublishSource, PublisherHandle,
};
pub use packet::{Message, QoS};
pub use status::ConnectionStatus;
pub use subscription::Callback;
pub use time::{Clock, SystemClock};
pub use transport::{LinkStatus, SocketHandle, Station, Transport};
