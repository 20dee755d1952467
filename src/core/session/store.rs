//! Concurrent session registry.
//!
//! The store is the only cross-session shared mutable structure in the
//! bridge. Everything else is owned by a single session's event-loop task.

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Shared handle to a live session.
///
/// The handle carries just enough to find and destroy a session; the mutable
/// session state lives inside the event-loop task and is never shared.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub id: String,
    /// Cancelling tears down the event loop, its timers and the engine link.
    pub cancel: CancellationToken,
    pub started_at: Instant,
}

impl SessionHandle {
    pub fn new(id: String) -> Self {
        Self {
            id,
            cancel: CancellationToken::new(),
            started_at: Instant::now(),
        }
    }
}

/// Registry of active sessions keyed by session id.
#[derive(Debug, Default)]
pub struct SessionStore {
    inner: DashMap<String, SessionHandle>,
}

impl SessionStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: DashMap::new(),
        })
    }

    /// Register a new session. Returns the handle's cancellation token.
    pub fn insert(&self, handle: SessionHandle) -> CancellationToken {
        let token = handle.cancel.clone();
        self.inner.insert(handle.id.clone(), handle);
        token
    }

    pub fn get(&self, id: &str) -> Option<SessionHandle> {
        self.inner.get(id).map(|entry| entry.value().clone())
    }

    /// Destroy a session: cancel its event loop (which closes the engine
    /// link and every session-scoped timer) and drop it from the registry.
    /// Idempotent; destroying an unknown or already-destroyed id is a no-op.
    pub fn destroy(&self, id: &str) {
        if let Some((_, handle)) = self.inner.remove(id) {
            handle.cancel.cancel();
            info!(
                session_id = %id,
                lifetime_secs = handle.started_at.elapsed().as_secs(),
                "Session destroyed"
            );
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.inner.iter().map(|entry| entry.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let store = SessionStore::new();
        store.insert(SessionHandle::new("s1".to_string()));

        assert_eq!(store.len(), 1);
        assert!(store.get("s1").is_some());
        assert!(store.get("s2").is_none());
    }

    #[test]
    fn test_destroy_cancels_and_removes() {
        let store = SessionStore::new();
        let token = store.insert(SessionHandle::new("s1".to_string()));

        assert!(!token.is_cancelled());
        store.destroy("s1");
        assert!(token.is_cancelled());
        assert!(store.get("s1").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let store = SessionStore::new();
        store.insert(SessionHandle::new("s1".to_string()));

        store.destroy("s1");
        store.destroy("s1");
        store.destroy("never-existed");
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_access() {
        let store = SessionStore::new();
        let mut tasks = Vec::new();
        for i in 0..32 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                let id = format!("s{i}");
                store.insert(SessionHandle::new(id.clone()));
                assert!(store.get(&id).is_some());
                if i % 2 == 0 {
                    store.destroy(&id);
                }
            }));
        }
        for task in tasks {
            task.await.expect("task");
        }
        assert_eq!(store.len(), 16);
    }
}
