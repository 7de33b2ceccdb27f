//! Session registry keyed by session id.
//!
//! Sessions are created on first use. Idle sessions are dropped by a
//! periodic sweep, and when the registry is full the least recently used
//! session makes room for a new one.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ragdesk_agent::{Session, SessionFactory};
use ragdesk_core::message::SessionId;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

struct Entry {
    session: Session,
    last_used: Instant,
}

pub struct SessionRegistry {
    factory: SessionFactory,
    entries: RwLock<HashMap<String, Entry>>,
    idle_timeout: Duration,
    max_sessions: usize,
}

impl SessionRegistry {
    pub fn new(factory: SessionFactory, idle_timeout: Duration, max_sessions: usize) -> Self {
        Self {
            factory,
            entries: RwLock::new(HashMap::new()),
            idle_timeout,
            max_sessions: max_sessions.max(1),
        }
    }

    /// The session for `id`, created if absent. Marks it as used.
    pub async fn get_or_create(&self, id: &str) -> Session {
        let now = Instant::now();
        let mut entries = self.entries.write().await;

        if let Some(entry) = entries.get_mut(id) {
            entry.last_used = now;
            return entry.session.clone();
        }

        if entries.len() >= self.max_sessions {
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone());
            if let Some(key) = oldest {
                entries.remove(&key);
                info!(session = %key, "Registry full, evicted least recently used session");
            }
        }

        let session = self.factory.create(SessionId::from(id));
        entries.insert(
            id.to_string(),
            Entry {
                session: session.clone(),
                last_used: now,
            },
        );
        session
    }

    /// The session for `id` if it exists, without touching it.
    pub async fn get(&self, id: &str) -> Option<Session> {
        self.entries.read().await.get(id).map(|e| e.session.clone())
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop sessions idle for longer than the timeout. Returns how many.
    pub async fn evict_idle(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| now.duration_since(e.last_used) < self.idle_timeout);
        let evicted = before - entries.len();
        if evicted > 0 {
            debug!(evicted, remaining = entries.len(), "Evicted idle sessions");
        }
        evicted
    }

    /// Run `evict_idle` every `period` until the registry is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let registry = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                registry.evict_idle().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_factory;

    fn registry(idle_secs: u64, max: usize) -> SessionRegistry {
        SessionRegistry::new(test_factory("ok"), Duration::from_secs(idle_secs), max)
    }

    #[tokio::test]
    async fn same_id_returns_same_session() {
        let reg = registry(60, 10);
        let a = reg.get_or_create("alice").await;
        a.chat("hello").await;

        let again = reg.get_or_create("alice").await;
        assert_eq!(again.history().await.len(), 2);
        assert_eq!(reg.len().await, 1);
    }

    #[tokio::test]
    async fn different_ids_are_isolated() {
        let reg = registry(60, 10);
        reg.get_or_create("alice").await.chat("hello").await;

        let bob = reg.get_or_create("bob").await;
        assert!(bob.history().await.is_empty());
        assert_eq!(reg.len().await, 2);
    }

    #[tokio::test]
    async fn full_registry_evicts_least_recently_used() {
        tokio::time::pause();
        let reg = registry(3600, 2);
        reg.get_or_create("a").await;
        tokio::time::advance(Duration::from_secs(1)).await;
        reg.get_or_create("b").await;
        tokio::time::advance(Duration::from_secs(1)).await;
        // Touch "a" so "b" becomes the oldest
        reg.get_or_create("a").await;
        tokio::time::advance(Duration::from_secs(1)).await;
        reg.get_or_create("c").await;

        assert_eq!(reg.len().await, 2);
        assert!(reg.get("a").await.is_some());
        assert!(reg.get("b").await.is_none());
        assert!(reg.get("c").await.is_some());
    }

    #[tokio::test]
    async fn idle_sessions_are_evicted() {
        tokio::time::pause();
        let reg = registry(10, 10);
        reg.get_or_create("old").await;
        tokio::time::advance(Duration::from_secs(8)).await;
        reg.get_or_create("fresh").await;
        tokio::time::advance(Duration::from_secs(5)).await;

        assert_eq!(reg.evict_idle().await, 1);
        assert!(reg.get("old").await.is_none());
        assert!(reg.get("fresh").await.is_some());
    }

    #[tokio::test]
    async fn sweeper_runs_periodically() {
        tokio::time::pause();
        let reg = Arc::new(registry(5, 10));
        reg.get_or_create("x").await;
        let handle = reg.spawn_sweeper(Duration::from_secs(10));

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(reg.is_empty().await);
        handle.abort();
    }
}
