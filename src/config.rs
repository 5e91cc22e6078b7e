//! Client configuration.
//!
//! [`MqttOptions`] carries everything the state machine needs to bring the
//! link up on its own: Wi-Fi credentials, the broker endpoint, the MQTT
//! identity and the timing policy.

use core::net::IpAddr;

use embassy_time::Duration;

/// The default unencrypted MQTT port.
pub const DEFAULT_PORT: u16 = 1883;

/// Keep-alive advertised in the CONNECT packet, in seconds.
pub const DEFAULT_KEEP_ALIVE_SECS: u16 = 300;

/// Client identifiers are cut to this many characters under MQTT 3.1.
pub const V3_1_CLIENT_ID_MAX: usize = 23;

/// MQTT protocol level written into the CONNECT packet.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ProtocolLevel {
    /// MQTT 3.1. Client identifiers are truncated to 23 characters.
    V3_1 = 3,
    /// MQTT 3.1.1.
    #[default]
    V3_1_1 = 4,
}

/// Timing policy for every wait in the state machine.
///
/// All deadlines fire once the elapsed time is strictly greater than the
/// configured value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Inactivity limit while reading one packet.
    pub read_packet: Duration,
    /// Outer deadline while searching for a specific acknowledgment.
    pub packet_search: Duration,
    /// Deadline for pushing one frame into the transport.
    pub send_packet: Duration,
    /// Silence after which the broker is pinged.
    pub verify_interval: Duration,
    /// Deadline for the TCP connection to come up.
    pub tcp_connect: Duration,
    /// Grace period between TCP connect and CONNECT.
    pub connection_settle: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            read_packet: Duration::from_millis(1000),
            packet_search: Duration::from_millis(1500),
            send_packet: Duration::from_millis(750),
            verify_interval: Duration::from_millis(20_000),
            tcp_connect: Duration::from_millis(4000),
            connection_settle: Duration::from_millis(3000),
        }
    }
}

/// Attempt ceilings for the retrying phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryLimits {
    /// Ticks spent polling Wi-Fi association before restarting it.
    pub wifi_poll_ticks: u32,
    /// CONNECT packets sent before the session is torn down.
    pub connect_attempts: u32,
    /// SUBSCRIBE packets sent for one topic before reconnecting.
    pub subscribe_attempts: u32,
}

impl Default for RetryLimits {
    fn default() -> Self {
        Self {
            wifi_poll_ticks: 720,
            connect_attempts: 5,
            subscribe_attempts: 3,
        }
    }
}

/// Connection options for [`MqttClient`](crate::MqttClient).
///
/// ```
/// use core::net::{IpAddr, Ipv4Addr};
/// use looped_mqtt::MqttOptions;
///
/// let options = MqttOptions::new("home-ap", "hunter2", IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10)))
///     .with_client_id("porch-sensor")
///     .with_credentials("device", "secret");
/// assert_eq!(options.port, 1883);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct MqttOptions<'a> {
    pub ssid: &'a str,
    pub passphrase: &'a str,
    pub broker: IpAddr,
    pub port: u16,
    /// An empty identifier asks the broker to assign one.
    pub client_id: &'a str,
    pub username: &'a str,
    pub password: &'a str,
    pub protocol_level: ProtocolLevel,
    pub keep_alive_secs: u16,
    pub timeouts: Timeouts,
    pub limits: RetryLimits,
}

impl<'a> MqttOptions<'a> {
    pub fn new(ssid: &'a str, passphrase: &'a str, broker: IpAddr) -> Self {
        Self {
            ssid,
            passphrase,
            broker,
            port: DEFAULT_PORT,
            client_id: "",
            username: "",
            password: "",
            protocol_level: ProtocolLevel::default(),
            keep_alive_secs: DEFAULT_KEEP_ALIVE_SECS,
            timeouts: Timeouts::default(),
            limits: RetryLimits::default(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_client_id(mut self, client_id: &'a str) -> Self {
        self.client_id = client_id;
        self
    }

    pub fn with_credentials(mut self, username: &'a str, password: &'a str) -> Self {
        self.username = username;
        self.password = password;
        self
    }

    pub fn with_protocol_level(mut self, level: ProtocolLevel) -> Self {
        self.protocol_level = level;
        self
    }

    pub fn with_keep_alive(mut self, secs: u16) -> Self {
        self.keep_alive_secs = secs;
        self
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_limits(mut self, limits: RetryLimits) -> Self {
        self.limits = limits;
        self
    }
}
