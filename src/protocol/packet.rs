//! Packet definitions
//!
//! Packet ids are only unique within a protocol state, so decoding always
//! takes the state the connection is currently in.

use bytes::{BufMut, BytesMut};
use std::fmt;

use super::codec::{BufMutExt, CodecError, PacketReader};

/// Packet identifiers, grouped by state and direction
pub mod ids {
    pub const HANDSHAKE: u32 = 0x00;

    pub const STATUS_REQUEST: u32 = 0x00;
    pub const STATUS_RESPONSE: u32 = 0x00;
    pub const PING_REQUEST: u32 = 0x01;
    pub const PING_RESPONSE: u32 = 0x01;

    pub const LOGIN_START: u32 = 0x00;
    pub const LOGIN_DISCONNECT: u32 = 0x00;
    pub const LOGIN_SUCCESS: u32 = 0x02;
}

/// Protocol state of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolState {
    Handshake,
    Status,
    Login,
    Closed,
}

impl fmt::Display for ProtocolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProtocolState::Handshake => "handshake",
            ProtocolState::Status => "status",
            ProtocolState::Login => "login",
            ProtocolState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// The state requested by the `next_state` field of a handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum NextState {
    Status = 1,
    Login = 2,
}

impl NextState {
    pub fn from_id(id: u32) -> Option<Self> {
        match id {
            1 => Some(NextState::Status),
            2 => Some(NextState::Login),
            _ => None,
        }
    }

    pub fn protocol_state(self) -> ProtocolState {
        match self {
            NextState::Status => ProtocolState::Status,
            NextState::Login => ProtocolState::Login,
        }
    }
}

/// A packet that can be written to and read from a frame payload
pub trait Packet: Sized {
    /// Identifier written in front of the fields
    fn packet_id(&self) -> u32;

    /// Append this packet's fields (without the id)
    fn write_fields(&self, buf: &mut BytesMut);

    /// Decode the fields of packet `packet_id` received in `state`.
    /// Returns Ok(None) if the id is not valid in that state
    fn decode(
        state: ProtocolState,
        packet_id: u32,
        reader: &mut PacketReader,
    ) -> Result<Option<Self>, CodecError>;
}

/// Packets sent by the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Serverbound {
    /// First packet of every connection
    Handshake {
        protocol_version: u32,
        server_address: String,
        server_port: u16,
        /// Raw value, validated by the session
        next_state: u32,
    },

    /// Request for the server list document
    StatusRequest,

    /// Latency probe, echoed back verbatim
    PingRequest { payload: [u8; 8] },

    /// Start of the login sequence
    LoginStart { username: String },
}

impl Packet for Serverbound {
    fn packet_id(&self) -> u32 {
        match self {
            Serverbound::Handshake { .. } => ids::HANDSHAKE,
            Serverbound::StatusRequest => ids::STATUS_REQUEST,
            Serverbound::PingRequest { .. } => ids::PING_REQUEST,
            Serverbound::LoginStart { .. } => ids::LOGIN_START,
        }
    }

    fn write_fields(&self, buf: &mut BytesMut) {
        match self {
            Serverbound::Handshake {
                protocol_version,
                server_address,
                server_port,
                next_state,
            } => {
                buf.put_varint(*protocol_version);
                buf.put_string(server_address);
                buf.put_u16(*server_port);
                buf.put_varint(*next_state);
            }
            Serverbound::StatusRequest => {}
            Serverbound::PingRequest { payload } => buf.put_slice(payload),
            Serverbound::LoginStart { username } => buf.put_string(username),
        }
    }

    fn decode(
        state: ProtocolState,
        packet_id: u32,
        reader: &mut PacketReader,
    ) -> Result<Option<Self>, CodecError> {
        let packet = match (state, packet_id) {
            (ProtocolState::Handshake, ids::HANDSHAKE) => Serverbound::Handshake {
                protocol_version: reader.read_varint()?,
                server_address: reader.read_string()?,
                server_port: reader.read_u16()?,
                next_state: reader.read_varint()?,
            },
            (ProtocolState::Status, ids::STATUS_REQUEST) => Serverbound::StatusRequest,
            (ProtocolState::Status, ids::PING_REQUEST) => Serverbound::PingRequest {
                payload: reader.read_array()?,
            },
            (ProtocolState::Login, ids::LOGIN_START) => Serverbound::LoginStart {
                username: reader.read_string()?,
            },
            _ => return Ok(None),
        };

        if reader.remaining() > 0 {
            tracing::debug!(
                "Ignoring {} trailing bytes after packet 0x{:02X} in {} state",
                reader.remaining(),
                packet_id,
                state
            );
        }

        Ok(Some(packet))
    }
}

/// Packets sent by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Clientbound {
    /// Server list document (JSON)
    StatusResponse { json: String },

    /// Echo of a ping request
    PingResponse { payload: [u8; 8] },

    /// Login accepted
    LoginSuccess { uuid: String, username: String },

    /// Connection refused; `reason` is a JSON text component
    Disconnect { reason: String },
}

impl Packet for Clientbound {
    fn packet_id(&self) -> u32 {
        match self {
            Clientbound::StatusResponse { .. } => ids::STATUS_RESPONSE,
            Clientbound::PingResponse { .. } => ids::PING_RESPONSE,
            Clientbound::LoginSuccess { .. } => ids::LOGIN_SUCCESS,
            Clientbound::Disconnect { .. } => ids::LOGIN_DISCONNECT,
        }
    }

    fn write_fields(&self, buf: &mut BytesMut) {
        match self {
            Clientbound::StatusResponse { json } => buf.put_string(json),
            Clientbound::PingResponse { payload } => buf.put_slice(payload),
            Clientbound::LoginSuccess { uuid, username } => {
                buf.put_string(uuid);
                buf.put_string(username);
            }
            Clientbound::Disconnect { reason } => buf.put_string(reason),
        }
    }

    fn decode(
        state: ProtocolState,
        packet_id: u32,
        reader: &mut PacketReader,
    ) -> Result<Option<Self>, CodecError> {
        let packet = match (state, packet_id) {
            (ProtocolState::Status, ids::STATUS_RESPONSE) => Clientbound::StatusResponse {
                json: reader.read_string()?,
            },
            (ProtocolState::Status, ids::PING_RESPONSE) => Clientbound::PingResponse {
                payload: reader.read_array()?,
            },
            (ProtocolState::Login, ids::LOGIN_DISCONNECT) => Clientbound::Disconnect {
                reason: reader.read_string()?,
            },
            (ProtocolState::Login, ids::LOGIN_SUCCESS) => Clientbound::LoginSuccess {
                uuid: reader.read_string()?,
                username: reader.read_string()?,
            },
            _ => return Ok(None),
        };
        Ok(Some(packet))
    }
}
