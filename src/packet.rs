//! # MQTT 3.1.1 Frames
//!
//! Encoders for the frames the client sends (CONNECT, PUBLISH, SUBSCRIBE,
//! PUBACK, PINGREQ) and decoders for the frames it receives (CONNACK,
//! PUBLISH, PUBACK, SUBACK). Every encoder writes into the caller's scratch
//! buffer and returns the frame length; nothing here allocates.

use crate::config::{ProtocolLevel, V3_1_CLIENT_ID_MAX};
use crate::error::{ConnectReturnCode, ProtocolError};
use crate::util::{
    additional_len, read_length_prefixed, read_u16, read_variable_byte_integer,
    write_length_prefixed, write_utf8_string, write_variable_byte_integer,
};

// Flags for the CONNECT packet.
const CONN_USERNAME_FLAG: u8 = 0x80;
const CONN_PASSWORD_FLAG: u8 = 0x40;
const CONN_WILL_RETAIN: u8 = 0x20;
const CONN_WILL_QOS_1: u8 = 0x08;
const CONN_WILL_QOS_2: u8 = 0x18;
const CONN_WILL_FLAG: u8 = 0x04;
const CONN_CLEAN_SESSION: u8 = 0x02;

/// Bytes reserved after the fixed-header type byte for the remaining length.
const LENGTH_RESERVE: usize = 4;

/// Delivery guarantee of a message. Only levels 0 and 1 are ever sent.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum QoS {
    #[default]
    AtMostOnce = 0,
    AtLeastOnce = 1,
    /// Recognised on the wire only; the client never sends QoS 2.
    ExactlyOnce = 2,
}

impl QoS {
    /// Decodes the two QoS bits of a fixed header.
    pub const fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(Self::AtMostOnce),
            1 => Some(Self::AtLeastOnce),
            2 => Some(Self::ExactlyOnce),
            _ => None,
        }
    }
}

/// MQTT control packet types, as found in the high nibble of the first byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum PacketType {
    Connect = 1,
    ConnAck = 2,
    Publish = 3,
    PubAck = 4,
    PubRec = 5,
    PubRel = 6,
    PubComp = 7,
    Subscribe = 8,
    SubAck = 9,
    Unsubscribe = 10,
    UnsubAck = 11,
    PingReq = 12,
    PingResp = 13,
    Disconnect = 14,
}

impl PacketType {
    /// Decodes the packet type from a fixed-header byte.
    pub const fn from_header(byte: u8) -> Option<Self> {
        Some(match byte >> 4 {
            1 => Self::Connect,
            2 => Self::ConnAck,
            3 => Self::Publish,
            4 => Self::PubAck,
            5 => Self::PubRec,
            6 => Self::PubRel,
            7 => Self::PubComp,
            8 => Self::Subscribe,
            9 => Self::SubAck,
            10 => Self::Unsubscribe,
            11 => Self::UnsubAck,
            12 => Self::PingReq,
            13 => Self::PingResp,
            14 => Self::Disconnect,
            _ => return None,
        })
    }

    /// The fixed-header byte with no flags set.
    pub const fn header(self) -> u8 {
        (self as u8) << 4
    }
}

/// Packet identifier source for QoS 1 PUBLISH and SUBSCRIBE.
///
/// Starts at 1 and wraps past `u16::MAX` back to 1; zero is never produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketIdGenerator {
    next: u16,
}

impl PacketIdGenerator {
    pub const fn new() -> Self {
        Self { next: 1 }
    }

    /// Returns the next identifier and advances the counter.
    pub fn next_id(&mut self) -> u16 {
        let id = self.next;
        self.next = match self.next.wrapping_add(1) {
            0 => 1,
            n => n,
        };
        id
    }

    /// The identifier the next call to [`next_id`](Self::next_id) will return.
    pub const fn peek(&self) -> u16 {
        self.next
    }
}

impl Default for PacketIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// An application message: birth, will, discovery or a queued publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Message<'a> {
    pub topic: &'a str,
    pub payload: &'a [u8],
    pub qos: QoS,
    pub retain: bool,
}

impl<'a> Message<'a> {
    pub const fn new(topic: &'a str, payload: &'a [u8], qos: QoS, retain: bool) -> Self {
        Self {
            topic,
            payload,
            qos,
            retain,
        }
    }
}

/// A frame the client writes into its packet buffer.
pub trait EncodePacket {
    /// Lays the frame out at the start of `buf` and returns its length.
    fn encode(&self, buf: &mut [u8]) -> Result<usize, ProtocolError>;
}

/// A trait for packets that can be decoded from a complete frame.
pub trait DecodePacket<'a>: Sized {
    fn decode(frame: &'a [u8]) -> Result<Self, ProtocolError>;
}

fn put(cursor: &mut usize, buf: &mut [u8], bytes: &[u8]) -> Result<(), ProtocolError> {
    buf.get_mut(*cursor..*cursor + bytes.len())
        .ok_or(ProtocolError::BufferTooSmall)?
        .copy_from_slice(bytes);
    *cursor += bytes.len();
    Ok(())
}

fn check_type(frame: &[u8], expected: PacketType) -> Result<(), ProtocolError> {
    let first = *frame.first().ok_or(ProtocolError::MalformedPacket)?;
    if first >> 4 != expected as u8 {
        return Err(ProtocolError::InvalidPacketType(first >> 4));
    }
    Ok(())
}

/// Writes the remaining length for content laid out at
/// `content_start..end` and slides the content down against it.
fn finish_frame(buf: &mut [u8], content_start: usize, end: usize) -> Result<usize, ProtocolError> {
    let remaining_len = end - content_start;
    let mut cursor = 1;
    write_variable_byte_integer(&mut cursor, buf, remaining_len)?;
    buf.copy_within(content_start..end, cursor);
    Ok(cursor + remaining_len)
}

// --- CONNECT Packet ---
#[derive(Debug, Clone, Copy)]
pub struct Connect<'a> {
    pub level: ProtocolLevel,
    pub keep_alive: u16,
    pub client_id: &'a str,
    pub will: Option<Message<'a>>,
    pub username: &'a str,
    pub password: &'a str,
}

impl Connect<'_> {
    fn flags(&self) -> u8 {
        // Sessions are always clean; username and password are always sent,
        // possibly empty.
        let mut flags = CONN_CLEAN_SESSION | CONN_USERNAME_FLAG | CONN_PASSWORD_FLAG;
        if let Some(will) = &self.will {
            flags |= CONN_WILL_FLAG;
            flags |= match will.qos {
                QoS::AtMostOnce => 0,
                QoS::AtLeastOnce => CONN_WILL_QOS_1,
                QoS::ExactlyOnce => CONN_WILL_QOS_2,
            };
            if will.retain {
                flags |= CONN_WILL_RETAIN;
            }
        }
        flags
    }
}

impl EncodePacket for Connect<'_> {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, ProtocolError> {
        let mut cursor = 0;
        put(&mut cursor, buf, &[PacketType::Connect.header()])?;
        cursor += LENGTH_RESERVE;
        let content_start = cursor;

        write_utf8_string(&mut cursor, buf, "MQTT")?;
        put(&mut cursor, buf, &[self.level as u8, self.flags()])?;
        put(&mut cursor, buf, &self.keep_alive.to_be_bytes())?;

        let id_limit = match self.level {
            ProtocolLevel::V3_1 => V3_1_CLIENT_ID_MAX,
            ProtocolLevel::V3_1_1 => 0,
        };
        if self.client_id.is_empty() {
            debug!("empty client id, broker will assign one");
        }
        write_length_prefixed(&mut cursor, buf, self.client_id.as_bytes(), id_limit)?;

        if let Some(will) = &self.will {
            write_utf8_string(&mut cursor, buf, will.topic)?;
            write_length_prefixed(&mut cursor, buf, will.payload, 0)?;
        }

        write_utf8_string(&mut cursor, buf, self.username)?;
        write_utf8_string(&mut cursor, buf, self.password)?;

        finish_frame(buf, content_start, cursor)
    }
}

// --- CONNACK Packet ---
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnAck {
    pub session_present: bool,
    pub return_code: ConnectReturnCode,
}

impl<'a> DecodePacket<'a> for ConnAck {
    /// Accepts exactly the four-byte frame `0x20 0x02 flags code`.
    fn decode(frame: &'a [u8]) -> Result<Self, ProtocolError> {
        check_type(frame, PacketType::ConnAck)?;
        if frame.len() != 4 || frame[0] != PacketType::ConnAck.header() || frame[1] != 2 {
            return Err(ProtocolError::MalformedPacket);
        }
        Ok(Self {
            session_present: frame[2] & 0x01 != 0,
            return_code: ConnectReturnCode::from(frame[3]),
        })
    }
}

// --- PUBLISH Packet ---
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Publish<'a> {
    pub topic: &'a str,
    pub payload: &'a [u8],
    pub qos: QoS,
    pub retain: bool,
    /// Present when `qos` is above `AtMostOnce`.
    pub packet_id: Option<u16>,
}

impl EncodePacket for Publish<'_> {
    /// Lays out a PUBLISH frame, truncating the payload (never the headers)
    /// when the whole frame would not fit in `buf`.
    fn encode(&self, buf: &mut [u8]) -> Result<usize, ProtocolError> {
        let capacity = buf.len();

        // Variable header: topic plus its length prefix, then the packet id.
        let mut header_len = 2 + self.topic.len();
        if self.packet_id.is_some() {
            header_len += 2;
        }

        let mut payload_len = self.payload.len();
        let extra = additional_len(header_len + payload_len);
        if header_len + payload_len + 2 + extra > capacity {
            let overhead = header_len + 2 + additional_len(capacity);
            if overhead > capacity {
                return Err(ProtocolError::BufferTooSmall);
            }
            payload_len = capacity - overhead;
            warn!(
                "publish payload truncated from {} to {} bytes",
                self.payload.len(),
                payload_len
            );
        }

        let mut cursor = 0;
        let first = PacketType::Publish.header() | (self.qos as u8) << 1 | self.retain as u8;
        put(&mut cursor, buf, &[first])?;
        write_variable_byte_integer(&mut cursor, buf, header_len + payload_len)?;
        write_utf8_string(&mut cursor, buf, self.topic)?;
        if let Some(id) = self.packet_id {
            put(&mut cursor, buf, &id.to_be_bytes())?;
        }
        put(&mut cursor, buf, &self.payload[..payload_len])?;
        Ok(cursor)
    }
}

impl<'a> DecodePacket<'a> for Publish<'a> {
    /// Decodes a PUBLISH frame. The payload is whatever follows the variable
    /// header in `frame`, so a frame cut short by the reader still decodes.
    fn decode(frame: &'a [u8]) -> Result<Self, ProtocolError> {
        check_type(frame, PacketType::Publish)?;
        let flags = frame[0] & 0x0F;
        let qos = QoS::from_bits((flags >> 1) & 0x03).ok_or(ProtocolError::MalformedPacket)?;

        let mut cursor = 1;
        let _remaining_len = read_variable_byte_integer(&mut cursor, frame)?;
        let topic = read_length_prefixed(&mut cursor, frame)?;
        let topic = core::str::from_utf8(topic).map_err(|_| ProtocolError::InvalidUtf8String)?;

        let packet_id = if qos != QoS::AtMostOnce {
            Some(read_u16(&mut cursor, frame)?)
        } else {
            None
        };

        Ok(Self {
            topic,
            payload: &frame[cursor..],
            qos,
            retain: flags & 0x01 != 0,
            packet_id,
        })
    }
}

// --- PUBACK Packet ---
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PubAck {
    pub packet_id: u16,
}

impl EncodePacket for PubAck {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, ProtocolError> {
        let [hi, lo] = self.packet_id.to_be_bytes();
        let mut cursor = 0;
        put(&mut cursor, buf, &[PacketType::PubAck.header(), 2, hi, lo])?;
        Ok(cursor)
    }
}

impl<'a> DecodePacket<'a> for PubAck {
    fn decode(frame: &'a [u8]) -> Result<Self, ProtocolError> {
        check_type(frame, PacketType::PubAck)?;
        if frame.len() != 4 || frame[1] != 2 {
            return Err(ProtocolError::MalformedPacket);
        }
        Ok(Self {
            packet_id: u16::from_be_bytes([frame[2], frame[3]]),
        })
    }
}

// --- SUBSCRIBE Packet ---
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscribe<'a> {
    pub packet_id: u16,
    pub topic: &'a str,
    pub qos: QoS,
}

impl EncodePacket for Subscribe<'_> {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, ProtocolError> {
        let mut cursor = 0;
        // SUBSCRIBE carries the mandatory reserved flag bits 0b0010.
        put(&mut cursor, buf, &[PacketType::Subscribe.header() | 0x02])?;
        cursor += LENGTH_RESERVE;
        let content_start = cursor;

        put(&mut cursor, buf, &self.packet_id.to_be_bytes())?;
        write_utf8_string(&mut cursor, buf, self.topic)?;
        put(&mut cursor, buf, &[self.qos as u8])?;

        finish_frame(buf, content_start, cursor)
    }
}

// --- SUBACK Packet ---
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubAck {
    pub packet_id: u16,
    /// Granted QoS, or 0x80 for a refused subscription.
    pub return_code: u8,
}

impl SubAck {
    pub const FAILURE: u8 = 0x80;

    pub const fn is_refused(&self) -> bool {
        self.return_code == Self::FAILURE
    }
}

impl<'a> DecodePacket<'a> for SubAck {
    fn decode(frame: &'a [u8]) -> Result<Self, ProtocolError> {
        check_type(frame, PacketType::SubAck)?;
        let mut cursor = 1;
        let _remaining_len = read_variable_byte_integer(&mut cursor, frame)?;
        let packet_id = read_u16(&mut cursor, frame)?;
        let return_code = *frame.get(cursor).ok_or(ProtocolError::MalformedPacket)?;
        Ok(Self {
            packet_id,
            return_code,
        })
    }
}

// --- PINGREQ Packet ---
#[derive(Debug, Clone, Copy)]
pub struct PingReq;

impl EncodePacket for PingReq {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, ProtocolError> {
        let mut cursor = 0;
        put(&mut cursor, buf, &[PacketType::PingReq.header(), 0x00])?;
        Ok(cursor)
    }
}
