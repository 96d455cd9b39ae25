//! Session registry
//!
//! Tracks live sessions for the online count and the admission cap.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::time::Instant;
use tokio::sync::RwLock;

/// Identifier of one accepted connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What the registry knows about a session
#[derive(Debug, Clone)]
pub struct SessionEntry {
    pub id: SessionId,
    pub addr: SocketAddr,
    pub connected_at: Instant,
}

impl SessionEntry {
    pub fn new(id: SessionId, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            connected_at: Instant::now(),
        }
    }
}

/// Shared set of live sessions
#[async_trait]
pub trait SessionRegistry: Send + Sync {
    /// Add a session; replaces any entry with the same id
    async fn register(&self, entry: SessionEntry);

    /// Remove a session, returning its entry if it was registered
    async fn unregister(&self, id: SessionId) -> Option<SessionEntry>;

    /// Number of registered sessions
    async fn size(&self) -> usize;
}

/// Registry kept in process memory
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    sessions: RwLock<HashMap<SessionId, SessionEntry>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionRegistry for InMemoryRegistry {
    async fn register(&self, entry: SessionEntry) {
        let mut sessions = self.sessions.write().await;
        sessions.insert(entry.id, entry);
    }

    async fn unregister(&self, id: SessionId) -> Option<SessionEntry> {
        let mut sessions = self.sessions.write().await;
        sessions.remove(&id)
    }

    async fn size(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn entry(id: u64) -> SessionEntry {
        SessionEntry::new(SessionId(id), "127.0.0.1:40000".parse().unwrap())
    }

    #[tokio::test]
    async fn test_register_and_unregister() {
        let registry = InMemoryRegistry::new();
        assert_eq!(registry.size().await, 0);

        registry.register(entry(1)).await;
        registry.register(entry(2)).await;
        assert_eq!(registry.size().await, 2);

        let removed = registry.unregister(SessionId(1)).await.unwrap();
        assert_eq!(removed.id, SessionId(1));
        assert_eq!(removed.addr.port(), 40000);
        assert!(registry.unregister(SessionId(1)).await.is_none());
        assert_eq!(registry.size().await, 1);
    }

    #[tokio::test]
    async fn test_register_same_id_twice_counts_once() {
        let registry = InMemoryRegistry::new();
        registry.register(entry(7)).await;
        registry.register(entry(7)).await;
        assert_eq!(registry.size().await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_updates() {
        let registry = Arc::new(InMemoryRegistry::new());

        let mut tasks = Vec::new();
        for id in 0..64u64 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                registry.register(entry(id)).await;
                if id % 2 == 0 {
                    assert!(registry.unregister(SessionId(id)).await.is_some());
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(registry.size().await, 32);
    }
}
