//! Game server listener
//!
//! Accepts connections, enforces the player cap and hands every admitted
//! connection to its own session task.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};

use super::connection::{Connection, ConnectionError, ConnectionResult};
use super::registry::{SessionEntry, SessionId, SessionRegistry};
use super::session::Session;
use super::NetworkConfig;
use crate::protocol::{Clientbound, ServerDescriptor, TextComponent};

/// Reason sent to clients refused because the server is full
pub const SERVER_FULL_REASON: &str = "Server is full!";

/// How long a rejected peer gets to read the disconnect frame
const REJECT_LINGER: Duration = Duration::from_secs(2);

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Server already running")]
    AlreadyRunning,

    #[error("Server not running")]
    NotRunning,

    #[error("Bind failed: {0}")]
    BindFailed(String),
}

pub type ServerResult<T> = Result<T, ServerError>;

/// Events emitted by the server
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// Listener bound and accepting
    Started { bind_addr: SocketAddr },
    /// A connection was admitted and registered
    SessionOpened { id: SessionId, addr: SocketAddr },
    /// A session ended and was unregistered
    SessionClosed {
        id: SessionId,
        addr: SocketAddr,
        username: Option<String>,
        reason: String,
    },
    /// A connection was refused before any session was created
    Rejected { addr: SocketAddr, reason: String },
    /// Server stopped
    Stopped,
    /// Error occurred
    Error { message: String },
}

/// Game server front end
pub struct Server {
    /// Server configuration
    config: NetworkConfig,
    /// Facts advertised to clients
    descriptor: Arc<ServerDescriptor>,
    /// Live sessions
    registry: Arc<dyn SessionRegistry>,
    /// Event sender
    event_tx: mpsc::Sender<ServerEvent>,
    /// Event receiver (for consumers)
    event_rx: Option<mpsc::Receiver<ServerEvent>>,
    /// Shutdown signal
    shutdown_tx: Option<mpsc::Sender<()>>,
    /// Whether the server is running
    running: Arc<RwLock<bool>>,
}

impl Server {
    /// Create a new server
    pub fn new(
        config: NetworkConfig,
        descriptor: ServerDescriptor,
        registry: Arc<dyn SessionRegistry>,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);

        Self {
            config,
            descriptor: Arc::new(descriptor),
            registry,
            event_tx,
            event_rx: Some(event_rx),
            shutdown_tx: None,
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Take the event receiver (can only be called once)
    pub fn take_event_receiver(&mut self) -> Option<mpsc::Receiver<ServerEvent>> {
        self.event_rx.take()
    }

    /// Start the server, returning the bound address
    pub async fn start(&mut self) -> ServerResult<SocketAddr> {
        {
            let running = self.running.read().await;
            if *running {
                return Err(ServerError::AlreadyRunning);
            }
        }

        let bind_addr = self.config.bind_addr();
        let listener = TcpListener::bind(&bind_addr).await.map_err(|e| {
            ServerError::BindFailed(format!("Failed to bind to {}: {}", bind_addr, e))
        })?;

        let local_addr = listener.local_addr()?;
        tracing::info!("Server listening on {}", local_addr);

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx);

        {
            let mut running = self.running.write().await;
            *running = true;
        }

        emit(
            &self.event_tx,
            ServerEvent::Started {
                bind_addr: local_addr,
            },
        );

        let config = self.config.clone();
        let descriptor = self.descriptor.clone();
        let registry = self.registry.clone();
        let event_tx = self.event_tx.clone();
        let running = self.running.clone();
        let mut next_id = 1u64;

        // Spawn the accept loop
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, addr)) => {
                                let id = SessionId(next_id);
                                next_id += 1;
                                admit(
                                    id,
                                    stream,
                                    addr,
                                    &config,
                                    &descriptor,
                                    &registry,
                                    &event_tx,
                                ).await;
                            }
                            Err(e) => {
                                tracing::error!("Accept error: {}", e);
                                emit(&event_tx, ServerEvent::Error {
                                    message: e.to_string(),
                                });
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Server shutdown requested");
                        break;
                    }
                }
            }

            let mut running = running.write().await;
            *running = false;

            emit(&event_tx, ServerEvent::Stopped);
        });

        Ok(local_addr)
    }

    /// Stop accepting connections; running sessions finish on their own
    pub async fn stop(&mut self) -> ServerResult<()> {
        {
            let running = self.running.read().await;
            if !*running {
                return Err(ServerError::NotRunning);
            }
        }

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }

        Ok(())
    }

    /// Number of live sessions
    pub async fn online(&self) -> usize {
        self.registry.size().await
    }

    /// Check if the server is running
    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }
}

/// Queue an event for the consumer without ever waiting on it.
///
/// Events are dropped when the channel is full or nobody holds the receiver,
/// so an idle consumer cannot stall the accept loop or a session task.
fn emit(event_tx: &mpsc::Sender<ServerEvent>, event: ServerEvent) {
    if let Err(e) = event_tx.try_send(event) {
        tracing::trace!("Dropped server event: {}", e);
    }
}

/// Apply the player cap to a fresh connection and spawn its session.
///
/// The accept loop is the only caller that registers sessions, so the size
/// check cannot be overtaken by a concurrent registration.
async fn admit(
    id: SessionId,
    stream: TcpStream,
    addr: SocketAddr,
    config: &NetworkConfig,
    descriptor: &Arc<ServerDescriptor>,
    registry: &Arc<dyn SessionRegistry>,
    event_tx: &mpsc::Sender<ServerEvent>,
) {
    let online = registry.size().await;
    if online >= descriptor.max_players as usize {
        tracing::info!("Rejecting {}: server full ({} online)", addr, online);

        let config = config.clone();
        let event_tx = event_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = reject_connection(stream, addr, &config, SERVER_FULL_REASON).await {
                tracing::debug!("Failed to reject {}: {}", addr, e);
            }
            emit(
                &event_tx,
                ServerEvent::Rejected {
                    addr,
                    reason: SERVER_FULL_REASON.to_string(),
                },
            );
        });
        return;
    }

    tracing::info!("New connection from {} (session {})", addr, id);
    registry.register(SessionEntry::new(id, addr)).await;

    let conn = Connection::new(stream, addr, config);
    let mut session = Session::new(id, conn, registry.clone(), descriptor.clone());
    let event_tx = event_tx.clone();

    tokio::spawn(async move {
        emit(&event_tx, ServerEvent::SessionOpened { id, addr });

        let reason = match session.run().await {
            Ok(()) => "Connection closed".to_string(),
            Err(e) => format!("Error: {}", e),
        };

        emit(
            &event_tx,
            ServerEvent::SessionClosed {
                id,
                addr,
                username: session.username().map(str::to_string),
                reason,
            },
        );
    });
}

/// Send a disconnect frame with `reason` and close the connection
async fn reject_connection(
    stream: TcpStream,
    addr: SocketAddr,
    config: &NetworkConfig,
    reason: &str,
) -> ConnectionResult<()> {
    let mut conn = Connection::new(stream, addr, config);
    let reason = serde_json::to_string(&TextComponent::new(reason))?;

    conn.send(&Clientbound::Disconnect { reason }).await?;
    conn.shutdown().await?;
    conn.drain(REJECT_LINGER).await;

    Ok(())
}
