//! Wire primitives shared by the packet encoders and the inbound decoder:
//! the variable-length "remaining length" integer and two-byte
//! length-prefixed strings.

use crate::error::ProtocolError;

/// The largest value a four-byte remaining-length field can carry.
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

/// Returns how many bytes beyond the first the remaining-length field needs
/// to encode `len`.
///
/// Follows the size table of the MQTT 3.1.1 standard: 0–127 fit in one byte,
/// 128–16 383 in two, 16 384–2 097 151 in three, everything else in four.
pub const fn additional_len(len: usize) -> usize {
    if len < 128 {
        0
    } else if len < 16_384 {
        1
    } else if len < 2_097_152 {
        2
    } else {
        3
    }
}

/// Decodes a remaining-length field at the cursor and moves past it.
///
/// A fourth byte that still has its continuation bit set is rejected.
pub fn read_variable_byte_integer(cursor: &mut usize, buf: &[u8]) -> Result<usize, ProtocolError> {
    let field = buf.get(*cursor..).unwrap_or(&[]);
    let mut value = 0usize;
    for (index, &digit) in field.iter().take(4).enumerate() {
        value |= usize::from(digit & 0x7F) << (7 * index);
        if digit & 0x80 == 0 {
            *cursor += index + 1;
            return Ok(value);
        }
    }
    if field.len() >= 4 {
        Err(ProtocolError::MalformedRemainingLength)
    } else {
        Err(ProtocolError::MalformedPacket)
    }
}

/// Encodes `value` as a remaining-length field at the cursor and moves past it.
pub fn write_variable_byte_integer(
    cursor: &mut usize,
    buf: &mut [u8],
    value: usize,
) -> Result<(), ProtocolError> {
    if value > MAX_REMAINING_LENGTH {
        return Err(ProtocolError::PayloadTooLarge);
    }
    let width = additional_len(value) + 1;
    let field = buf
        .get_mut(*cursor..*cursor + width)
        .ok_or(ProtocolError::BufferTooSmall)?;
    for (index, slot) in field.iter_mut().enumerate() {
        let digit = ((value >> (7 * index)) & 0x7F) as u8;
        *slot = if index + 1 < width { digit | 0x80 } else { digit };
    }
    *cursor += width;
    Ok(())
}

/// Writes `bytes` with a two-byte big-endian length prefix at the cursor.
///
/// When `max_len` is non-zero, at most that many bytes of `bytes` are written.
pub fn write_length_prefixed(
    cursor: &mut usize,
    buf: &mut [u8],
    bytes: &[u8],
    max_len: usize,
) -> Result<(), ProtocolError> {
    let len = if max_len > 0 && bytes.len() > max_len {
        max_len
    } else {
        bytes.len()
    };
    if len > u16::MAX as usize {
        return Err(ProtocolError::PayloadTooLarge);
    }

    let slice = buf
        .get_mut(*cursor..*cursor + 2 + len)
        .ok_or(ProtocolError::BufferTooSmall)?;
    slice[0..2].copy_from_slice(&(len as u16).to_be_bytes());
    slice[2..].copy_from_slice(&bytes[..len]);
    *cursor += 2 + len;
    Ok(())
}

/// Writes a UTF-8 string with a two-byte length prefix at the cursor.
pub fn write_utf8_string(cursor: &mut usize, buf: &mut [u8], s: &str) -> Result<(), ProtocolError> {
    write_length_prefixed(cursor, buf, s.as_bytes(), 0)
}

/// Reads a big-endian `u16` at the cursor, advancing it.
pub fn read_u16(cursor: &mut usize, buf: &[u8]) -> Result<u16, ProtocolError> {
    let bytes = buf
        .get(*cursor..*cursor + 2)
        .ok_or(ProtocolError::MalformedPacket)?;
    *cursor += 2;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

/// Reads a length-prefixed byte string at the cursor, advancing it.
pub fn read_length_prefixed<'a>(cursor: &mut usize, buf: &'a [u8]) -> Result<&'a [u8], ProtocolError> {
    let len = read_u16(cursor, buf)? as usize;
    let bytes = buf
        .get(*cursor..*cursor + len)
        .ok_or(ProtocolError::MalformedPacket)?;
    *cursor += len;
    Ok(bytes)
}

/// Topic comparison used for subscription lookup: equal length and equal
/// bytes ignoring ASCII case.
pub fn topic_matches(received: &[u8], registered: &str) -> bool {
    received.eq_ignore_ascii_case(registered.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_length_round_trips_at_every_boundary() {
        let cases = [
            (0usize, 0usize),
            (1, 0),
            (127, 0),
            (128, 1),
            (16_383, 1),
            (16_384, 2),
            (2_097_151, 2),
        ];
        for (value, extra) in cases {
            let mut buf = [0u8; 4];
            let mut cursor = 0;
            write_variable_byte_integer(&mut cursor, &mut buf, value).unwrap();
            assert_eq!(cursor, extra + 1, "encoded width of {value}");
            assert_eq!(additional_len(value), extra);

            let mut read_cursor = 0;
            assert_eq!(read_variable_byte_integer(&mut read_cursor, &buf).unwrap(), value);
            assert_eq!(read_cursor, cursor);
        }
    }

    #[test]
    fn remaining_length_matches_published_table() {
        let mut buf = [0u8; 4];
        let mut cursor = 0;
        write_variable_byte_integer(&mut cursor, &mut buf, 16_383).unwrap();
        assert_eq!(&buf[..cursor], &[0xFF, 0x7F]);

        let mut cursor = 0;
        write_variable_byte_integer(&mut cursor, &mut buf, MAX_REMAINING_LENGTH).unwrap();
        assert_eq!(&buf[..cursor], &[0xFF, 0xFF, 0xFF, 0x7F]);
        assert_eq!(additional_len(MAX_REMAINING_LENGTH), 3);
    }

    #[test]
    fn five_length_bytes_are_rejected() {
        let buf = [0xFF, 0xFF, 0xFF, 0xFF, 0x01];
        let mut cursor = 0;
        assert_eq!(
            read_variable_byte_integer(&mut cursor, &buf),
            Err(ProtocolError::MalformedRemainingLength)
        );
    }

    #[test]
    fn truncated_length_field_is_malformed() {
        let buf = [0x80];
        let mut cursor = 0;
        assert_eq!(
            read_variable_byte_integer(&mut cursor, &buf),
            Err(ProtocolError::MalformedPacket)
        );
    }

    #[test]
    fn length_prefixed_write_honours_max_len() {
        let mut buf = [0u8; 8];
        let mut cursor = 0;
        write_length_prefixed(&mut cursor, &mut buf, b"abcdef", 3).unwrap();
        assert_eq!(&buf[..cursor], &[0x00, 0x03, b'a', b'b', b'c']);
    }

    #[test]
    fn length_prefixed_write_refuses_to_overrun() {
        let mut buf = [0u8; 4];
        let mut cursor = 0;
        assert_eq!(
            write_utf8_string(&mut cursor, &mut buf, "abc"),
            Err(ProtocolError::BufferTooSmall)
        );
        assert_eq!(cursor, 0);
    }

    #[test]
    fn topics_match_ignoring_case_only() {
        assert!(topic_matches(b"Home/Light", "home/light"));
        assert!(!topic_matches(b"home/light/", "home/light"));
        assert!(!topic_matches(b"home/lamp", "home/light"));
    }
}
