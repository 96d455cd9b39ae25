//! Per-connection session
//!
//! A session owns its connection and walks it through the protocol states:
//!
//! ```text
//! Handshake --next_state=1--> Status --request, [ping]--> Closed
//!           --next_state=2--> Login  --login start------> Closed
//! ```
//!
//! Any packet that does not fit the current state ends the session.

use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use uuid::Uuid;

use super::connection::{Connection, ConnectionError, ConnectionResult};
use super::registry::{SessionId, SessionRegistry};
use crate::protocol::{ids, Clientbound, NextState, Packet, ProtocolState, ServerDescriptor, Serverbound};

/// Placeholder identity for a player; no authentication takes place.
pub fn offline_uuid(username: &str) -> Uuid {
    Uuid::new_v3(
        &Uuid::NAMESPACE_OID,
        format!("OfflinePlayer:{}", username).as_bytes(),
    )
}

/// Server-side state of one client connection
pub struct Session<S> {
    id: SessionId,
    conn: Connection<S>,
    state: ProtocolState,
    username: Option<String>,
    registry: Arc<dyn SessionRegistry>,
    descriptor: Arc<ServerDescriptor>,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(
        id: SessionId,
        conn: Connection<S>,
        registry: Arc<dyn SessionRegistry>,
        descriptor: Arc<ServerDescriptor>,
    ) -> Self {
        Self {
            id,
            conn,
            state: ProtocolState::Handshake,
            username: None,
            registry,
            descriptor,
        }
    }

    /// Username sent in the login start, if the session got that far
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Drive the session until it closes, then release the connection and
    /// unregister it. Does nothing on an already closed session.
    pub async fn run(&mut self) -> ConnectionResult<()> {
        if self.state == ProtocolState::Closed {
            return Ok(());
        }

        let result = self.drive().await;
        self.state = ProtocolState::Closed;

        if let Err(e) = self.conn.shutdown().await {
            tracing::debug!("Session {} shutdown: {}", self.id, e);
        }

        match self.registry.unregister(self.id).await {
            Some(entry) => tracing::debug!(
                "Session {} from {} unregistered after {:?}",
                self.id,
                entry.addr,
                entry.connected_at.elapsed()
            ),
            None => tracing::warn!("Session {} was not registered", self.id),
        }

        let stats = self.conn.stats();
        tracing::debug!(
            "Session {} traffic: {} frames / {} bytes in, {} frames / {} bytes out",
            self.id,
            stats.frames_received,
            stats.bytes_received,
            stats.frames_sent,
            stats.bytes_sent
        );

        match &result {
            Ok(()) => tracing::debug!("Session {} closed", self.id),
            Err(e) => tracing::warn!(
                "Session {} ({}) aborted: {}",
                self.id,
                self.conn.remote_addr(),
                e
            ),
        }

        result
    }

    async fn drive(&mut self) -> ConnectionResult<()> {
        loop {
            match self.state {
                ProtocolState::Handshake => self.handle_handshake().await?,
                ProtocolState::Status => self.handle_status().await?,
                ProtocolState::Login => self.handle_login().await?,
                ProtocolState::Closed => return Ok(()),
            }
        }
    }

    /// Receive the next packet; a clean close moves the session to Closed
    async fn next_packet(&mut self) -> ConnectionResult<Option<Serverbound>> {
        let packet = self.conn.recv::<Serverbound>(self.state).await?;
        if packet.is_none() {
            tracing::debug!("Session {} peer closed in {} state", self.id, self.state);
            self.state = ProtocolState::Closed;
        }
        Ok(packet)
    }

    fn unexpected(&self, packet: &Serverbound) -> ConnectionError {
        ConnectionError::UnexpectedPacket {
            state: self.state,
            packet_id: packet.packet_id(),
        }
    }

    async fn handle_handshake(&mut self) -> ConnectionResult<()> {
        let Some(packet) = self.next_packet().await? else {
            return Ok(());
        };

        let (protocol_version, server_address, server_port, next_state) = match packet {
            Serverbound::Handshake {
                protocol_version,
                server_address,
                server_port,
                next_state,
            } => (protocol_version, server_address, server_port, next_state),
            other => return Err(self.unexpected(&other)),
        };

        tracing::debug!(
            "Session {} handshake: protocol {}, address {}:{}, next state {}",
            self.id,
            protocol_version,
            server_address,
            server_port,
            next_state
        );

        let Some(next) = NextState::from_id(next_state) else {
            tracing::warn!("Session {} requested invalid next state {}", self.id, next_state);
            return Err(ConnectionError::UnexpectedPacket {
                state: ProtocolState::Handshake,
                packet_id: ids::HANDSHAKE,
            });
        };

        if protocol_version != self.descriptor.protocol_version {
            tracing::debug!(
                "Session {} uses protocol {} (server speaks {})",
                self.id,
                protocol_version,
                self.descriptor.protocol_version
            );
        }

        self.state = next.protocol_state();
        Ok(())
    }

    async fn handle_status(&mut self) -> ConnectionResult<()> {
        match self.next_packet().await? {
            Some(Serverbound::StatusRequest) => {}
            Some(other) => return Err(self.unexpected(&other)),
            None => return Ok(()),
        }

        let online = self.registry.size().await;
        let json = serde_json::to_string(&self.descriptor.status(online))?;
        self.conn.send(&Clientbound::StatusResponse { json }).await?;
        tracing::debug!("Session {} sent status ({} online)", self.id, online);

        match self.next_packet().await? {
            Some(Serverbound::PingRequest { payload }) => {
                self.conn.send(&Clientbound::PingResponse { payload }).await?;
                tracing::debug!(
                    "Session {} answered ping {}",
                    self.id,
                    i64::from_be_bytes(payload)
                );
            }
            Some(other) => return Err(self.unexpected(&other)),
            None => return Ok(()),
        }

        self.state = ProtocolState::Closed;
        Ok(())
    }

    async fn handle_login(&mut self) -> ConnectionResult<()> {
        let username = match self.next_packet().await? {
            Some(Serverbound::LoginStart { username }) => username,
            Some(other) => return Err(self.unexpected(&other)),
            None => return Ok(()),
        };

        tracing::info!("Session {} login attempt: {}", self.id, username);

        let uuid = offline_uuid(&username).hyphenated().to_string();
        self.username = Some(username.clone());

        self.conn
            .send(&Clientbound::LoginSuccess { uuid, username })
            .await?;

        self.state = ProtocolState::Closed;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{InMemoryRegistry, NetworkConfig, SessionEntry};
    use crate::protocol::{CodecError, ServerStatus};
    use async_trait::async_trait;
    use bytes::BytesMut;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{duplex, AsyncWriteExt, DuplexStream};

    fn addr() -> SocketAddr {
        "127.0.0.1:50000".parse().unwrap()
    }

    fn handshake(next_state: u32) -> Serverbound {
        Serverbound::Handshake {
            protocol_version: 765,
            server_address: "localhost".to_string(),
            server_port: 25565,
            next_state,
        }
    }

    /// Registry that only counts calls
    #[derive(Default)]
    struct CountingRegistry {
        unregistered: AtomicUsize,
    }

    #[async_trait]
    impl SessionRegistry for CountingRegistry {
        async fn register(&self, _entry: SessionEntry) {}

        async fn unregister(&self, id: SessionId) -> Option<SessionEntry> {
            if self.unregistered.fetch_add(1, Ordering::SeqCst) == 0 {
                Some(SessionEntry::new(id, addr()))
            } else {
                None
            }
        }

        async fn size(&self) -> usize {
            0
        }
    }

    fn session(
        registry: Arc<dyn SessionRegistry>,
    ) -> (Session<DuplexStream>, Connection<DuplexStream>) {
        let config = NetworkConfig::default();
        let (server_side, client_side) = duplex(64 * 1024);
        let session = Session::new(
            SessionId(1),
            Connection::new(server_side, addr(), &config),
            registry,
            Arc::new(ServerDescriptor::default()),
        );
        (session, Connection::new(client_side, addr(), &config))
    }

    #[tokio::test]
    async fn test_status_and_ping() {
        let registry = Arc::new(InMemoryRegistry::new());
        registry.register(SessionEntry::new(SessionId(1), addr())).await;
        registry.register(SessionEntry::new(SessionId(2), addr())).await;

        let (mut session, mut client) = session(registry.clone());
        let server = tokio::spawn(async move {
            let result = session.run().await;
            (session.state, result)
        });

        client.send(&handshake(1)).await.unwrap();
        client.send(&Serverbound::StatusRequest).await.unwrap();

        let response = client.recv::<Clientbound>(ProtocolState::Status).await.unwrap();
        let json = match response {
            Some(Clientbound::StatusResponse { json }) => json,
            other => panic!("expected status response, got {:?}", other),
        };
        assert!(json.contains("\"protocol\":765"));
        let status: ServerStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(status.players.online, 2);
        assert_eq!(status.players.max, 20);

        let payload = 1i64.to_be_bytes();
        assert_eq!(payload, [0, 0, 0, 0, 0, 0, 0, 1]);
        client
            .send(&Serverbound::PingRequest { payload })
            .await
            .unwrap();
        let pong = client.recv::<Clientbound>(ProtocolState::Status).await.unwrap();
        assert_eq!(pong, Some(Clientbound::PingResponse { payload }));

        assert!(client.read_frame().await.unwrap().is_none());

        let (state, result) = server.await.unwrap();
        assert!(result.is_ok());
        assert_eq!(state, ProtocolState::Closed);
        assert_eq!(registry.size().await, 1);
    }

    #[tokio::test]
    async fn test_status_without_ping() {
        let registry = Arc::new(CountingRegistry::default());
        let (mut session, mut client) = session(registry.clone());
        let server = tokio::spawn(async move { session.run().await });

        client.send(&handshake(1)).await.unwrap();
        client.send(&Serverbound::StatusRequest).await.unwrap();
        let response = client.recv::<Clientbound>(ProtocolState::Status).await.unwrap();
        assert!(matches!(response, Some(Clientbound::StatusResponse { .. })));
        drop(client);

        assert!(server.await.unwrap().is_ok());
        assert_eq!(registry.unregistered.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_login_success() {
        let config = NetworkConfig::default();
        let registry = Arc::new(CountingRegistry::default());

        let mut inbound = BytesMut::new();
        let encoder = crate::protocol::Encoder::new(config.max_frame_size);
        for packet in [
            handshake(2),
            Serverbound::LoginStart {
                username: "Steve".to_string(),
            },
        ] {
            let mut fields = BytesMut::new();
            packet.write_fields(&mut fields);
            encoder.encode(packet.packet_id(), &fields, &mut inbound).unwrap();
        }

        let success = Clientbound::LoginSuccess {
            uuid: offline_uuid("Steve").hyphenated().to_string(),
            username: "Steve".to_string(),
        };
        let mut fields = BytesMut::new();
        success.write_fields(&mut fields);
        let mut outbound = BytesMut::new();
        encoder.encode(0x02, &fields, &mut outbound).unwrap();

        let stream = tokio_test::io::Builder::new()
            .read(&inbound)
            .write(&outbound)
            .build();

        let mut session = Session::new(
            SessionId(9),
            Connection::new(stream, addr(), &config),
            registry.clone(),
            Arc::new(ServerDescriptor::default()),
        );

        session.run().await.unwrap();
        assert_eq!(session.username(), Some("Steve"));
        assert_eq!(session.state, ProtocolState::Closed);
        assert_eq!(registry.unregistered.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_login_success_fields() {
        let registry = Arc::new(CountingRegistry::default());
        let (mut session, mut client) = session(registry);
        let server = tokio::spawn(async move {
            session.run().await.unwrap();
            session.username().map(str::to_string)
        });

        client.send(&handshake(2)).await.unwrap();
        client
            .send(&Serverbound::LoginStart {
                username: "Steve".to_string(),
            })
            .await
            .unwrap();

        let reply = client.recv::<Clientbound>(ProtocolState::Login).await.unwrap();
        let (uuid, username) = match reply {
            Some(Clientbound::LoginSuccess { uuid, username }) => (uuid, username),
            other => panic!("expected login success, got {:?}", other),
        };
        assert_eq!(username, "Steve");
        assert_eq!(uuid, offline_uuid("Steve").to_string());
        assert!(Uuid::parse_str(&uuid).is_ok());

        assert_eq!(server.await.unwrap().as_deref(), Some("Steve"));
    }

    #[tokio::test]
    async fn test_invalid_next_state() {
        let registry = Arc::new(CountingRegistry::default());
        let (mut session, mut client) = session(registry.clone());

        client.send(&handshake(3)).await.unwrap();
        let result = session.run().await;

        assert!(matches!(
            result,
            Err(ConnectionError::UnexpectedPacket {
                state: ProtocolState::Handshake,
                packet_id: 0x00
            })
        ));
        assert_eq!(session.state, ProtocolState::Closed);
        assert_eq!(registry.unregistered.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_wrong_packet_unregisters_once() {
        let registry = Arc::new(CountingRegistry::default());
        let (mut session, mut client) = session(registry.clone());

        client.send(&handshake(1)).await.unwrap();
        client
            .send(&Serverbound::PingRequest { payload: [0; 8] })
            .await
            .unwrap();

        let result = session.run().await;
        assert!(matches!(
            result,
            Err(ConnectionError::UnexpectedPacket {
                state: ProtocolState::Status,
                packet_id: 0x01
            })
        ));

        // A second run on a closed session must not unregister again
        assert!(session.run().await.is_ok());
        assert_eq!(registry.unregistered.load(Ordering::SeqCst), 1);
        assert_eq!(session.username(), None);
    }

    #[tokio::test]
    async fn test_unknown_handshake_id() {
        let registry = Arc::new(CountingRegistry::default());
        let (mut session, mut client) = session(registry.clone());

        client.write_frame(0x05, &[]).await.unwrap();
        let result = session.run().await;

        assert!(matches!(
            result,
            Err(ConnectionError::UnexpectedPacket {
                state: ProtocolState::Handshake,
                packet_id: 0x05
            })
        ));
        assert_eq!(registry.unregistered.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_malformed_length_aborts() {
        let config = NetworkConfig::default();
        let registry = Arc::new(CountingRegistry::default());
        let (server_side, mut raw) = duplex(1024);
        let mut session = Session::new(
            SessionId(3),
            Connection::new(server_side, addr(), &config),
            registry.clone(),
            Arc::new(ServerDescriptor::default()),
        );

        raw.write_all(&[0xFF; 6]).await.unwrap();
        let result = session.run().await;

        assert!(matches!(
            result,
            Err(ConnectionError::Codec(CodecError::MalformedVarInt))
        ));
        assert_eq!(registry.unregistered.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_peer_closes_before_handshake() {
        let registry = Arc::new(CountingRegistry::default());
        let (mut session, client) = session(registry.clone());
        drop(client);

        assert!(session.run().await.is_ok());
        assert_eq!(session.state, ProtocolState::Closed);
        assert_eq!(registry.unregistered.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_offline_uuid_is_stable() {
        assert_eq!(offline_uuid("Steve"), offline_uuid("Steve"));
        assert_ne!(offline_uuid("Steve"), offline_uuid("Alex"));
        assert_eq!(offline_uuid("Steve").get_version_num(), 3);
    }
}
