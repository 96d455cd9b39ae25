//! VarInt encoding
//!
//! Integers are written as groups of 7 bits, least significant group first.
//! The high bit of every byte except the last one is set.

use bytes::{Buf, BufMut};

use super::CodecError;

/// Maximum encoded length of a 32-bit VarInt
pub const MAX_VARINT_LEN: usize = 5;

const SEGMENT_BITS: u8 = 0x7F;
const CONTINUE_BIT: u8 = 0x80;

/// Number of bytes `value` occupies once encoded
pub fn encoded_len(value: u32) -> usize {
    match value {
        0..=0x7F => 1,
        0x80..=0x3FFF => 2,
        0x4000..=0x1F_FFFF => 3,
        0x20_0000..=0x0FFF_FFFF => 4,
        _ => 5,
    }
}

/// Write `value` into `buf` using the minimal number of bytes
pub fn put_varint<B: BufMut>(buf: &mut B, mut value: u32) {
    loop {
        if value & !(SEGMENT_BITS as u32) == 0 {
            buf.put_u8(value as u8);
            return;
        }
        buf.put_u8((value as u8 & SEGMENT_BITS) | CONTINUE_BIT);
        value >>= 7;
    }
}

/// Decode a VarInt from the front of `src`, advancing it.
///
/// Returns the value together with the number of bytes consumed.
pub fn decode<B: Buf>(src: &mut B) -> Result<(u32, usize), CodecError> {
    let mut value = 0u32;
    let mut index = 0;

    loop {
        if !src.has_remaining() {
            return Err(CodecError::UnexpectedEndOfStream);
        }
        let byte = src.get_u8();

        // The last group may only hold the 4 remaining bits and must terminate.
        if index == MAX_VARINT_LEN - 1 && byte & 0xF0 != 0 {
            return Err(CodecError::MalformedVarInt);
        }

        value |= ((byte & SEGMENT_BITS) as u32) << (7 * index);
        index += 1;

        if byte & CONTINUE_BIT == 0 {
            return Ok((value, index));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(value: u32) -> Vec<u8> {
        let mut out = Vec::with_capacity(encoded_len(value));
        put_varint(&mut out, value);
        out
    }

    #[test]
    fn test_known_encodings() {
        assert_eq!(encode(0), vec![0x00]);
        assert_eq!(encode(1), vec![0x01]);
        assert_eq!(encode(127), vec![0x7F]);
        assert_eq!(encode(128), vec![0x80, 0x01]);
        assert_eq!(encode(255), vec![0xFF, 0x01]);
        assert_eq!(encode(25565), vec![0xDD, 0xC7, 0x01]);
        assert_eq!(encode(2_097_151), vec![0xFF, 0xFF, 0x7F]);
        assert_eq!(encode(u32::MAX), vec![0xFF, 0xFF, 0xFF, 0xFF, 0x0F]);
    }

    #[test]
    fn test_roundtrip_boundaries() {
        let values = [
            0, 1, 127, 128, 765, 16_383, 16_384, 2_097_151, 2_097_152,
            268_435_455, 268_435_456, u32::MAX,
        ];

        for value in values {
            let bytes = encode(value);
            assert!(bytes.len() <= MAX_VARINT_LEN);
            assert_eq!(bytes.len(), encoded_len(value));

            let mut src = &bytes[..];
            assert_eq!(decode(&mut src).unwrap(), (value, bytes.len()));
            assert!(src.is_empty());
        }
    }

    #[test]
    fn test_decode_leaves_trailing_bytes() {
        let mut src: &[u8] = &[0x80, 0x01, 0x2A];
        assert_eq!(decode(&mut src).unwrap(), (128, 2));
        assert_eq!(src, &[0x2A]);
    }

    #[test]
    fn test_six_continuation_bytes_are_malformed() {
        let mut src: &[u8] = &[0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF];
        assert!(matches!(decode(&mut src), Err(CodecError::MalformedVarInt)));
    }

    #[test]
    fn test_fifth_byte_overflow_is_malformed() {
        let mut src: &[u8] = &[0xFF, 0xFF, 0xFF, 0xFF, 0x1F];
        assert!(matches!(decode(&mut src), Err(CodecError::MalformedVarInt)));
    }

    #[test]
    fn test_truncated_varint() {
        let mut src: &[u8] = &[0x80, 0x80];
        assert!(matches!(
            decode(&mut src),
            Err(CodecError::UnexpectedEndOfStream)
        ));

        let mut empty: &[u8] = &[];
        assert!(matches!(
            decode(&mut empty),
            Err(CodecError::UnexpectedEndOfStream)
        ));
    }
}
