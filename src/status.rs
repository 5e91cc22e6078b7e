//! Connection status of the state machine.
//!
//! The discriminants are ordered in bands so that "is Wi-Fi up", "is the
//! broker session up" and "is an exchange in progress" are plain ordinal
//! comparisons against the band boundaries below.

/// First status at which the Wi-Fi link is associated.
const WIFI_CONNECTED_BAND: u8 = 10;
/// First status at which a broker session is established.
const MQTT_CONNECTED_BAND: u8 = 40;
/// First status at which the client is mid-exchange and must not be interrupted.
const MQTT_ACTIVE_BAND: u8 = 50;

/// Current status of the Wi-Fi and broker connections.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ConnectionStatus {
    // Startup
    #[default]
    Init = 0,
    // Wi-Fi
    WifiReady = 1,
    WifiOffline = 2,
    WifiErrors = 3,
    WifiClosingSocket = 4,
    WifiConnected = 10,
    // MQTT
    MqttConnecting = 20,
    MqttConnectionWait = 21,
    MqttConnectionSuccess = 22,
    MqttMissingConack = 23,
    MqttConnectionConfirmed = 24,
    MqttClosingSocket = 25,
    MqttDisconnected = 28,
    MqttOffline = 29,
    MqttErrors = 30,
    // Steady state
    Okay = 40,
    ReadingSubPacket = 41,
    // Active
    MqttSubscribed = 60,
    MqttSubscribing = 61,
    MqttSubscriptionFail = 62,
    MqttAnnounced = 63,
    ReadingConackPacket = 70,
    ReadingSubackPacket = 71,
    ReadingPubackPacket = 72,
    ReadingPingPacket = 73,
    SendingDiscovery = 80,
    SubscriptionPacketRead = 81,
    MqttPublished = 101,
}

impl ConnectionStatus {
    /// The ordinal of this status.
    pub const fn ordinal(self) -> u8 {
        self as u8
    }

    /// Whether the Wi-Fi link was associated when this status was entered.
    pub const fn wifi_is_connected(self) -> bool {
        self.ordinal() >= WIFI_CONNECTED_BAND
    }

    /// Whether a broker session is established.
    pub const fn mqtt_is_connected(self) -> bool {
        self.ordinal() >= MQTT_CONNECTED_BAND
    }

    /// Whether the client is in the middle of an exchange with the broker.
    pub const fn mqtt_is_active(self) -> bool {
        self.ordinal() >= MQTT_ACTIVE_BAND
    }
}

#[cfg(test)]
mod tests {
    use super::ConnectionStatus::*;

    #[test]
    fn bands_follow_ordinals() {
        assert!(!Init.wifi_is_connected());
        assert!(!WifiClosingSocket.wifi_is_connected());
        assert!(WifiConnected.wifi_is_connected());
        assert!(MqttErrors.wifi_is_connected());
        assert!(!MqttErrors.mqtt_is_connected());

        assert!(Okay.mqtt_is_connected());
        assert!(!Okay.mqtt_is_active());
        assert!(ReadingSubPacket.mqtt_is_connected());
        assert!(!ReadingSubPacket.mqtt_is_active());

        for active in [MqttSubscribing, ReadingConackPacket, ReadingPingPacket, MqttPublished] {
            assert!(active.mqtt_is_connected());
            assert!(active.mqtt_is_active());
        }
    }

    #[test]
    fn ordering_matches_bands() {
        assert!(WifiConnected < MqttConnecting);
        assert!(MqttErrors < Okay);
        assert!(ReadingSubPacket < MqttSubscribed);
    }
}
