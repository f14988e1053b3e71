//! # Variable-Length Integer Encoding
//!
//! Length prefixes and small counters in the serialization buffer are written
//! as unsigned LEB128: seven payload bits per byte, least significant group
//! first, high bit set on every byte except the last.
//!
//! ## Encoding Examples
//!
//! | Value  | Bytes          |
//! |--------|----------------|
//! | 0      | `00`           |
//! | 127    | `7F`           |
//! | 128    | `80 01`        |
//! | 300    | `AC 02`        |
//! | u64::MAX | 10 bytes     |
//!
//! Most lengths in practice (attribute names, short strings) fit in one byte.

use eyre::{bail, ensure, Result};

/// Maximum encoded length of a u64.
pub const MAX_VARINT_LEN: usize = 10;

pub fn varint_len(mut value: u64) -> usize {
    let mut len = 1;
    while value >= 0x80 {
        value >>= 7;
        len += 1;
    }
    len
}

pub fn put_varint(buf: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        buf.push((value as u8) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

/// Decodes a varint from the start of `buf`, returning the value and the
/// number of bytes consumed.
pub fn read_varint(buf: &[u8]) -> Result<(u64, usize)> {
    let mut value = 0u64;

    for (i, &byte) in buf.iter().enumerate() {
        ensure!(i < MAX_VARINT_LEN, "varint longer than {} bytes", MAX_VARINT_LEN);

        let payload = (byte & 0x7F) as u64;
        if i == MAX_VARINT_LEN - 1 && payload > 1 {
            bail!("varint overflows u64");
        }
        value |= payload << (7 * i);

        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }

    bail!("truncated varint ({} bytes available)", buf.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(value: u64) -> Vec<u8> {
        let mut buf = Vec::new();
        put_varint(&mut buf, value);
        buf
    }

    #[test]
    fn small_values_use_one_byte() {
        assert_eq!(encoded(0), vec![0x00]);
        assert_eq!(encoded(127), vec![0x7F]);
        assert_eq!(varint_len(127), 1);
    }

    #[test]
    fn known_multi_byte_encodings() {
        assert_eq!(encoded(128), vec![0x80, 0x01]);
        assert_eq!(encoded(300), vec![0xAC, 0x02]);
    }

    #[test]
    fn varint_len_matches_encoded_length() {
        for value in [0, 1, 127, 128, 16_383, 16_384, u32::MAX as u64, u64::MAX] {
            assert_eq!(varint_len(value), encoded(value).len(), "value {}", value);
        }
    }

    #[test]
    fn boundaries_decode_to_original() {
        for value in [0, 127, 128, u32::MAX as u64, u64::MAX - 1, u64::MAX] {
            let buf = encoded(value);
            assert_eq!(read_varint(&buf).unwrap(), (value, buf.len()));
        }
    }

    #[test]
    fn read_varint_ignores_trailing_bytes() {
        let mut buf = encoded(300);
        buf.extend_from_slice(&[0xFF, 0xFF]);
        assert_eq!(read_varint(&buf).unwrap(), (300, 2));
    }

    #[test]
    fn truncated_varint_is_rejected() {
        assert!(read_varint(&[0x80]).is_err());
        assert!(read_varint(&[]).is_err());
    }

    #[test]
    fn overlong_varint_is_rejected() {
        assert!(read_varint(&[0xFF; 11]).is_err());
    }
}
