//! Protocol client
//!
//! Queries a running server the way a game client does: handshake, status
//! request and ping for the server list, or a bare login start.

use std::net::SocketAddr;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::net::TcpStream;

use super::connection::{Connection, ConnectionError};
use super::NetworkConfig;
use crate::protocol::{
    Clientbound, NextState, ProtocolState, ServerStatus, Serverbound, TextComponent,
    PROTOCOL_VERSION,
};

/// Client errors
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Rejected by server: {0}")]
    Rejected(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Ping payload was not echoed back")]
    PingMismatch,

    #[error("Connection timeout")]
    Timeout,
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Result of a server list query
#[derive(Debug, Clone)]
pub struct StatusReport {
    /// The document returned by the server
    pub status: ServerStatus,
    /// Round trip of the ping exchange
    pub latency: Duration,
}

/// Identity granted by a login success
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginGrant {
    pub uuid: String,
    pub username: String,
}

async fn connect(
    addr: SocketAddr,
    config: &NetworkConfig,
    next_state: NextState,
) -> ClientResult<Connection<TcpStream>> {
    let stream = tokio::time::timeout(config.read_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| ClientError::Timeout)??;
    stream.set_nodelay(true)?;

    let mut conn = Connection::new(stream, addr, config);
    conn.send(&Serverbound::Handshake {
        protocol_version: PROTOCOL_VERSION,
        server_address: addr.ip().to_string(),
        server_port: addr.port(),
        next_state: next_state as u32,
    })
    .await?;

    Ok(conn)
}

/// Parse a status document, telling a rejection reason apart
fn parse_status(json: &str) -> ClientResult<ServerStatus> {
    match serde_json::from_str::<ServerStatus>(json) {
        Ok(status) => Ok(status),
        Err(e) => match serde_json::from_str::<TextComponent>(json) {
            Ok(reason) => Err(ClientError::Rejected(reason.text)),
            Err(_) => Err(ClientError::InvalidResponse(e.to_string())),
        },
    }
}

fn disconnect_reason(reason: &str) -> String {
    serde_json::from_str::<TextComponent>(reason)
        .map(|component| component.text)
        .unwrap_or_else(|_| reason.to_string())
}

/// Fetch the server list document and measure the ping round trip
pub async fn query_status(addr: SocketAddr, config: &NetworkConfig) -> ClientResult<StatusReport> {
    let mut conn = connect(addr, config, NextState::Status).await?;
    conn.send(&Serverbound::StatusRequest).await?;

    let status = match conn.recv::<Clientbound>(ProtocolState::Status).await? {
        Some(Clientbound::StatusResponse { json }) => parse_status(&json)?,
        Some(other) => {
            return Err(ClientError::InvalidResponse(format!(
                "expected status response, got {:?}",
                other
            )))
        }
        None => return Err(ClientError::InvalidResponse("connection closed".to_string())),
    };

    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default();
    let payload = millis.to_be_bytes();

    let start = Instant::now();
    conn.send(&Serverbound::PingRequest { payload }).await?;

    match conn.recv::<Clientbound>(ProtocolState::Status).await? {
        Some(Clientbound::PingResponse { payload: echoed }) if echoed == payload => {}
        Some(Clientbound::PingResponse { .. }) => return Err(ClientError::PingMismatch),
        Some(other) => {
            return Err(ClientError::InvalidResponse(format!(
                "expected ping response, got {:?}",
                other
            )))
        }
        None => return Err(ClientError::InvalidResponse("connection closed".to_string())),
    }
    let latency = start.elapsed();

    tracing::debug!("Status from {} in {:?}", addr, latency);
    let _ = conn.shutdown().await;

    Ok(StatusReport { status, latency })
}

/// Send a login start and wait for the login success
pub async fn login(
    addr: SocketAddr,
    username: &str,
    config: &NetworkConfig,
) -> ClientResult<LoginGrant> {
    let mut conn = connect(addr, config, NextState::Login).await?;
    conn.send(&Serverbound::LoginStart {
        username: username.to_string(),
    })
    .await?;

    let grant = match conn.recv::<Clientbound>(ProtocolState::Login).await? {
        Some(Clientbound::LoginSuccess { uuid, username }) => LoginGrant { uuid, username },
        Some(Clientbound::Disconnect { reason }) => {
            return Err(ClientError::Rejected(disconnect_reason(&reason)))
        }
        Some(other) => {
            return Err(ClientError::InvalidResponse(format!(
                "expected login success, got {:?}",
                other
            )))
        }
        None => return Err(ClientError::InvalidResponse("connection closed".to_string())),
    };

    let _ = conn.shutdown().await;
    Ok(grant)
}
