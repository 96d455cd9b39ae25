//! Protocol codec for framing packets
//!
//! A frame is `<length:VarInt><packet id:VarInt><fields>`, where `length`
//! counts every byte after itself. Field helpers for strings and fixed-size
//! integers live here too.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;
use thiserror::Error;

use super::varint;

/// Codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Malformed VarInt: longer than {} bytes", varint::MAX_VARINT_LEN)]
    MalformedVarInt,

    #[error("Unexpected end of stream")]
    UnexpectedEndOfStream,

    #[error("Frame too large: {0} bytes (max: {1})")]
    FrameTooLarge(usize, usize),

    #[error("String too long: {0} bytes (max: {1})")]
    StringTooLong(usize, usize),

    #[error("Invalid UTF-8 in string field: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Encodes packets into length-prefixed frames
#[derive(Debug, Clone)]
pub struct Encoder {
    max_frame_size: usize,
}

impl Encoder {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    /// Append a whole frame for `packet_id` and `fields` to `buf`.
    ///
    /// Nothing is written when the frame would exceed the size limit.
    pub fn encode(
        &self,
        packet_id: u32,
        fields: &[u8],
        buf: &mut BytesMut,
    ) -> Result<(), CodecError> {
        let payload_len = varint::encoded_len(packet_id) + fields.len();

        if payload_len > self.max_frame_size {
            return Err(CodecError::FrameTooLarge(payload_len, self.max_frame_size));
        }

        buf.reserve(varint::encoded_len(payload_len as u32) + payload_len);
        varint::put_varint(buf, payload_len as u32);
        varint::put_varint(buf, packet_id);
        buf.put_slice(fields);

        Ok(())
    }
}

/// Decodes length-prefixed frames from a read buffer
pub struct Decoder {
    max_frame_size: usize,
    state: DecodeState,
}

#[derive(Default)]
enum DecodeState {
    #[default]
    Length,
    Payload {
        length: usize,
    },
}

impl Decoder {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            max_frame_size,
            state: DecodeState::Length,
        }
    }

    /// Attempt to split one frame payload off the front of `buf`.
    /// Returns Ok(None) if more data is needed
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>, CodecError> {
        loop {
            match self.state {
                DecodeState::Length => {
                    let mut peek = &buf[..];
                    let (length, header_len) = match varint::decode(&mut peek) {
                        Ok(decoded) => decoded,
                        Err(CodecError::UnexpectedEndOfStream) => return Ok(None),
                        Err(e) => return Err(e),
                    };

                    let length = length as usize;
                    if length > self.max_frame_size {
                        return Err(CodecError::FrameTooLarge(length, self.max_frame_size));
                    }

                    buf.advance(header_len);
                    self.state = DecodeState::Payload { length };
                }
                DecodeState::Payload { length } => {
                    if buf.len() < length {
                        buf.reserve(length - buf.len());
                        return Ok(None);
                    }

                    self.state = DecodeState::Length;
                    return Ok(Some(buf.split_to(length).freeze()));
                }
            }
        }
    }

    /// Whether a frame has been started but not completed
    pub fn is_mid_frame(&self, buf: &BytesMut) -> bool {
        matches!(self.state, DecodeState::Payload { .. }) || !buf.is_empty()
    }
}

/// Reads typed fields out of a frame payload
#[derive(Debug)]
pub struct PacketReader {
    buf: Bytes,
    max_string_length: usize,
}

impl PacketReader {
    pub fn new(buf: Bytes, max_string_length: usize) -> Self {
        Self {
            buf,
            max_string_length,
        }
    }

    pub fn read_varint(&mut self) -> Result<u32, CodecError> {
        varint::decode(&mut self.buf).map(|(value, _)| value)
    }

    /// Read a VarInt-length-prefixed UTF-8 string
    pub fn read_string(&mut self) -> Result<String, CodecError> {
        let length = self.read_varint()? as usize;
        if length > self.max_string_length {
            return Err(CodecError::StringTooLong(length, self.max_string_length));
        }

        let bytes = self.read_bytes(length)?;
        Ok(String::from_utf8(bytes.to_vec())?)
    }

    pub fn read_u16(&mut self) -> Result<u16, CodecError> {
        self.ensure(2)?;
        Ok(self.buf.get_u16())
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        self.ensure(N)?;
        let mut out = [0u8; N];
        self.buf.copy_to_slice(&mut out);
        Ok(out)
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<Bytes, CodecError> {
        self.ensure(len)?;
        Ok(self.buf.split_to(len))
    }

    /// Bytes not consumed yet
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn ensure(&self, len: usize) -> Result<(), CodecError> {
        if self.buf.remaining() < len {
            return Err(CodecError::UnexpectedEndOfStream);
        }
        Ok(())
    }
}

/// Field writers for outgoing packets
pub trait BufMutExt: BufMut {
    fn put_varint(&mut self, value: u32)
    where
        Self: Sized,
    {
        varint::put_varint(self, value);
    }

    /// Write a VarInt-length-prefixed UTF-8 string
    fn put_string(&mut self, value: &str)
    where
        Self: Sized,
    {
        varint::put_varint(self, value.len() as u32);
        self.put_slice(value.as_bytes());
    }
}

impl<B: BufMut> BufMutExt for B {}
