//! Two layers of failure exist in this crate. Packet encoding and decoding
//! report a [`ProtocolError`]; the handful of public calls that can be
//! refused (configuration after connect, publishing while busy) report an
//! [`MqttError`]. Failures inside the connection state machine are never
//! returned: they move the client into one of the error states of
//! [`ConnectionStatus`](crate::status::ConnectionStatus).

/// The error returned by the public messaging and configuration API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MqttError {
    /// The broker session is not established.
    NotConnected,
    /// The client is in the middle of another exchange; try again on a later tick.
    Busy,
    /// Birth, will, discoveries and subscriptions must be set before connecting.
    AlreadyConnected,
    /// A fixed-capacity collection (subscriptions, discoveries, topic) is full.
    CapacityExceeded,
    /// QoS 2 is not supported.
    UnsupportedQos,
    /// The transport did not accept the whole frame.
    SendFailed,
    /// The frame could not be encoded.
    Protocol(ProtocolError),
}

impl From<ProtocolError> for MqttError {
    fn from(err: ProtocolError) -> Self {
        MqttError::Protocol(err)
    }
}

/// Return codes carried by a `CONNACK` packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectReturnCode {
    /// 0: session established.
    Accepted,
    /// 1: protocol level not supported by the broker.
    UnacceptableProtocolVersion,
    /// 2: client identifier refused.
    IdentifierRejected,
    /// 3: MQTT service down on the broker host.
    ServerUnavailable,
    /// 4: bad credentials.
    BadUserNameOrPassword,
    /// 5: credentials valid but not allowed to connect.
    NotAuthorized,
    /// A code outside the MQTT 3.1.1 table.
    Other(u8),
}

impl From<u8> for ConnectReturnCode {
    fn from(code: u8) -> Self {
        match code {
            0 => Self::Accepted,
            1 => Self::UnacceptableProtocolVersion,
            2 => Self::IdentifierRejected,
            3 => Self::ServerUnavailable,
            4 => Self::BadUserNameOrPassword,
            5 => Self::NotAuthorized,
            other => Self::Other(other),
        }
    }
}

/// Failures raised while laying out or parsing a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProtocolError {
    /// The fixed header named a packet type other than the one expected.
    InvalidPacketType(u8),
    /// A packet was not correctly formed.
    MalformedPacket,
    /// The remaining-length field used more than four bytes.
    MalformedRemainingLength,
    /// The scratch buffer cannot hold the packet headers.
    BufferTooSmall,
    /// A string or payload exceeds what the protocol can express.
    PayloadTooLarge,
    /// A topic name was not valid UTF-8.
    InvalidUtf8String,
}
