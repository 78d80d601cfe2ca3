//! Session context
//!
//! Append-only per-`(user_id, session_id)` history of tool calls and their
//! results, so a later turn can refer back to earlier output. The store
//! trait allows an external key-value service; the in-memory implementation
//! carries the same TTL semantics and doubles as the degraded mode.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::error::Result;

/// One completed tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    pub turn_index: u64,
    pub tool_name: String,
    pub input: Value,
    pub output_or_error: Value,
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub confirmations: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// Durable per-session history. Writes are fire-and-forget with
/// at-least-once semantics; consumers tolerate duplicates.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn append(&self, user_id: &str, session_id: &str, record: TurnRecord) -> Result<()>;
    async fn history(&self, user_id: &str, session_id: &str) -> Result<Vec<TurnRecord>>;
    async fn next_turn_index(&self, user_id: &str, session_id: &str) -> Result<u64>;
}

struct SessionEntry {
    last_write: Instant,
    records: Vec<TurnRecord>,
}

/// TTL'd in-memory store keyed `user_id:session_id`.
pub struct InMemorySessionStore {
    ttl: Duration,
    entries: Mutex<HashMap<String, SessionEntry>>,
}

impl InMemorySessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn key(user_id: &str, session_id: &str) -> String {
        format!("{user_id}:{session_id}")
    }

    fn purge_expired(&self, entries: &mut HashMap<String, SessionEntry>) {
        let ttl = self.ttl;
        entries.retain(|_, entry| entry.last_write.elapsed() < ttl);
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn append(&self, user_id: &str, session_id: &str, record: TurnRecord) -> Result<()> {
        let mut entries = self.entries.lock().await;
        self.purge_expired(&mut entries);
        let entry = entries
            .entry(Self::key(user_id, session_id))
            .or_insert_with(|| SessionEntry {
                last_write: Instant::now(),
                records: Vec::new(),
            });
        entry.last_write = Instant::now();
        entry.records.push(record);
        Ok(())
    }

    async fn history(&self, user_id: &str, session_id: &str) -> Result<Vec<TurnRecord>> {
        let mut entries = self.entries.lock().await;
        self.purge_expired(&mut entries);
        Ok(entries
            .get(&Self::key(user_id, session_id))
            .map(|e| e.records.clone())
            .unwrap_or_default())
    }

    async fn next_turn_index(&self, user_id: &str, session_id: &str) -> Result<u64> {
        let mut entries = self.entries.lock().await;
        self.purge_expired(&mut entries);
        Ok(entries
            .get(&Self::key(user_id, session_id))
            .map(|e| e.records.len() as u64)
            .unwrap_or(0))
    }
}
