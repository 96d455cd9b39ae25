//! Protocol module - Defines the wire protocol spoken with game clients
//!
//! Every packet travels in a frame:
//! - VarInt length of the rest of the frame
//! - VarInt packet id
//! - Packet fields (VarInts, length-prefixed strings, big-endian integers)

mod codec;
mod packet;
mod status;
pub mod varint;

pub use codec::*;
pub use packet::*;
pub use status::*;

/// Protocol version number advertised to clients (1.20.4)
pub const PROTOCOL_VERSION: u32 = 765;

/// Human-readable game version matching `PROTOCOL_VERSION`
pub const VERSION_NAME: &str = "1.20.4";

/// Default port for the game server
pub const DEFAULT_PORT: u16 = 25565;

/// Largest accepted frame payload (2 MiB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 2 * 1024 * 1024;

/// Largest accepted string field in bytes
pub const DEFAULT_MAX_STRING_LENGTH: usize = 32767;
