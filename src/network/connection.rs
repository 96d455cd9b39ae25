//! Connection handling
//!
//! Wraps one byte stream with frame encoding/decoding, per-frame read
//! timeouts and typed packet send/receive.

use bytes::{Bytes, BytesMut};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::NetworkConfig;
use crate::protocol::{CodecError, Decoder, Encoder, Packet, PacketReader, ProtocolState};

/// Connection errors
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Codec(#[from] CodecError),

    #[error("Unexpected packet 0x{packet_id:02X} in {state} state")]
    UnexpectedPacket {
        state: ProtocolState,
        packet_id: u32,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Connection timeout")]
    Timeout,
}

pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// Connection statistics
#[derive(Debug, Default, Clone)]
pub struct ConnectionStats {
    /// Frames sent
    pub frames_sent: u64,
    /// Frames received
    pub frames_received: u64,
    /// Bytes sent
    pub bytes_sent: u64,
    /// Bytes received
    pub bytes_received: u64,
}

/// A framed connection to a remote peer
pub struct Connection<S> {
    /// Remote peer address
    remote_addr: SocketAddr,
    /// The underlying stream
    stream: S,
    /// Frame encoder
    encoder: Encoder,
    /// Frame decoder
    decoder: Decoder,
    /// Read buffer
    read_buf: BytesMut,
    /// Write buffer
    write_buf: BytesMut,
    /// Limit applied to string fields of incoming packets
    max_string_length: usize,
    /// Limit on the wait for each incoming frame
    read_timeout: Duration,
    /// Statistics
    stats: ConnectionStats,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap an established stream
    pub fn new(stream: S, remote_addr: SocketAddr, config: &NetworkConfig) -> Self {
        Self {
            remote_addr,
            stream,
            encoder: Encoder::new(config.max_frame_size),
            decoder: Decoder::new(config.max_frame_size),
            read_buf: BytesMut::with_capacity(4096),
            write_buf: BytesMut::with_capacity(4096),
            max_string_length: config.max_string_length,
            read_timeout: config.read_timeout,
            stats: ConnectionStats::default(),
        }
    }

    /// Get the remote address
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Get connection statistics
    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    /// Receive the next frame payload.
    ///
    /// Returns Ok(None) when the peer closed the stream between frames.
    pub async fn read_frame(&mut self) -> ConnectionResult<Option<Bytes>> {
        match tokio::time::timeout(self.read_timeout, self.fill_frame()).await {
            Ok(result) => result,
            Err(_) => Err(ConnectionError::Timeout),
        }
    }

    async fn fill_frame(&mut self) -> ConnectionResult<Option<Bytes>> {
        loop {
            if let Some(payload) = self.decoder.decode(&mut self.read_buf)? {
                self.stats.frames_received += 1;
                return Ok(Some(payload));
            }

            let mut buf = [0u8; 4096];
            let n = self.stream.read(&mut buf).await?;

            if n == 0 {
                if self.decoder.is_mid_frame(&self.read_buf) {
                    return Err(CodecError::UnexpectedEndOfStream.into());
                }
                return Ok(None); // Clean close
            }

            self.read_buf.extend_from_slice(&buf[..n]);
            self.stats.bytes_received += n as u64;
        }
    }

    /// Receive and decode the next packet for `state`
    pub async fn recv<P: Packet>(&mut self, state: ProtocolState) -> ConnectionResult<Option<P>> {
        let Some(payload) = self.read_frame().await? else {
            return Ok(None);
        };

        let mut reader = PacketReader::new(payload, self.max_string_length);
        let packet_id = reader.read_varint()?;

        match P::decode(state, packet_id, &mut reader)? {
            Some(packet) => Ok(Some(packet)),
            None => Err(ConnectionError::UnexpectedPacket { state, packet_id }),
        }
    }

    /// Write one whole frame, or fail without writing anything
    pub async fn write_frame(&mut self, packet_id: u32, fields: &[u8]) -> ConnectionResult<()> {
        self.write_buf.clear();
        self.encoder.encode(packet_id, fields, &mut self.write_buf)?;

        self.stream.write_all(&self.write_buf).await?;
        self.stream.flush().await?;

        self.stats.frames_sent += 1;
        self.stats.bytes_sent += self.write_buf.len() as u64;

        Ok(())
    }

    /// Send a packet
    pub async fn send<P: Packet>(&mut self, packet: &P) -> ConnectionResult<()> {
        let mut fields = BytesMut::new();
        packet.write_fields(&mut fields);
        self.write_frame(packet.packet_id(), &fields).await
    }

    /// Close the write side of the stream
    pub async fn shutdown(&mut self) -> ConnectionResult<()> {
        self.stream.shutdown().await?;
        Ok(())
    }

    /// Discard incoming bytes until the peer closes or `limit` elapses.
    ///
    /// Closing a socket with unread input resets the connection, which can
    /// destroy a frame the peer has not read yet.
    pub async fn drain(&mut self, limit: Duration) {
        let mut buf = [0u8; 1024];
        let _ = tokio::time::timeout(limit, async {
            while let Ok(n) = self.stream.read(&mut buf).await {
                if n == 0 {
                    break;
                }
            }
        })
        .await;
    }
}
