//! Socket registry: correlation id → active outbound connection
//!
//! Single source of truth for "is this logical stream still open". The
//! map is only handed out through the narrow put/get/remove contract;
//! removal after a close is deferred by a grace window so that
//! close-adjacent coordinator messages still resolve the entry and die
//! quietly on the closed socket's own error path.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};

/// Deferral between a socket's close and its entry's removal
pub const CLOSE_GRACE: Duration = Duration::from_secs(4);

/// An active outbound connection, keyed by correlation id
#[derive(Debug, Clone)]
pub struct StreamEntry {
    /// Write handle feeding the socket's single writer task
    pub writer: mpsc::Sender<Bytes>,
    /// Remote endpoint, for logging
    pub remote: String,
    /// When the connection was established
    pub opened_at: std::time::Instant,
}

impl StreamEntry {
    pub fn new(writer: mpsc::Sender<Bytes>, remote: String) -> Self {
        Self {
            writer,
            remote,
            opened_at: std::time::Instant::now(),
        }
    }
}

/// Registry of active outbound connections
#[derive(Clone)]
pub struct SocketRegistry {
    entries: Arc<RwLock<HashMap<String, StreamEntry>>>,
    grace: Duration,
}

impl SocketRegistry {
    pub fn new() -> Self {
        Self::with_grace(CLOSE_GRACE)
    }

    /// Registry with a custom removal grace window
    pub fn with_grace(grace: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            grace,
        }
    }

    /// Store a connection under a correlation id.
    ///
    /// Ids are never reused while an entry exists (coordinator
    /// contract), so this never overwrites a live stream.
    pub async fn put(&self, correlation_id: String, entry: StreamEntry) {
        tracing::debug!(
            correlation_id = %correlation_id,
            remote = %entry.remote,
            "Registering connection"
        );

        let mut entries = self.entries.write().await;
        entries.insert(correlation_id, entry);

        tracing::debug!(active_connections = entries.len(), "Connection registered");
    }

    /// Look up the connection for a correlation id
    pub async fn get(&self, correlation_id: &str) -> Option<StreamEntry> {
        let entries = self.entries.read().await;
        entries.get(correlation_id).cloned()
    }

    /// Delete an entry unconditionally
    pub async fn remove(&self, correlation_id: &str) {
        let mut entries = self.entries.write().await;

        if let Some(entry) = entries.remove(correlation_id) {
            tracing::debug!(
                correlation_id = %correlation_id,
                remote = %entry.remote,
                duration_secs = entry.opened_at.elapsed().as_secs(),
                active_connections = entries.len(),
                "Connection removed"
            );
        }
    }

    /// Remove an entry after the grace window elapses.
    ///
    /// Called on every close path instead of removing synchronously;
    /// in-flight coordinator messages referencing the id during the
    /// window still find the entry and fail on the closed writer.
    pub fn schedule_removal(&self, correlation_id: String) {
        let registry = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(registry.grace).await;
            registry.remove(&correlation_id).await;
        });
    }

    /// Number of active entries
    pub async fn count(&self) -> usize {
        self.entries.read().await.len()
    }
}

impl Default for SocketRegistry {
    fn default() -> Self {
        Self::new()
    }
}
