use crate::modules::agents::traits::RawRequest;
use dashmap::DashMap;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Cached raw records with their own expiry
#[derive(Debug, Clone)]
struct CacheEntry {
    items: Vec<Value>,
    created_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn new(items: Vec<Value>, ttl: Duration) -> Self {
        Self {
            items,
            created_at: Instant::now(),
            ttl,
        }
    }

    fn is_expired(&self) -> bool {
        self.created_at.elapsed() > self.ttl
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries_count: usize,
    pub expired_cleanups: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        if self.hits + self.misses == 0 {
            0.0
        } else {
            self.hits as f64 / (self.hits + self.misses) as f64
        }
    }
}

/// Per-agent response cache
///
/// Keys are SHA-256 digests of the logical query, so two requests that only
/// differ by host or payload formatting share an entry. Entries expire by time
/// only.
#[derive(Debug)]
pub struct ResponseCache {
    agent_id: String,
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    cleanups: AtomicU64,
}

impl ResponseCache {
    pub fn new(agent_id: &str, ttl: Duration) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            entries: DashMap::new(),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            cleanups: AtomicU64::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Digest of (agent, capability, query, id, page, language)
    pub fn key_for(&self, request: &RawRequest) -> String {
        let query = request
            .query
            .as_ref()
            .and_then(|q| serde_json::to_string(q).ok())
            .unwrap_or_default();
        let material = format!(
            "{}|{}|{}|{}|{}|{}",
            self.agent_id,
            request.capability,
            query,
            request.id.as_deref().unwrap_or_default(),
            request.page,
            request.lang.as_deref().unwrap_or_default()
        );
        format!("{:x}", Sha256::digest(material.as_bytes()))
    }

    pub fn get(&self, key: &str) -> Option<Vec<Value>> {
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired() {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(agent = %self.agent_id, "Cache hit");
                return Some(entry.items.clone());
            }
        }

        if self
            .entries
            .remove_if(key, |_, entry| entry.is_expired())
            .is_some()
        {
            self.cleanups.fetch_add(1, Ordering::Relaxed);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn insert(&self, key: String, items: Vec<Value>) {
        self.entries.insert(key, CacheEntry::new(items, self.ttl));
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired());
        let removed = before.saturating_sub(self.entries.len());
        self.cleanups.fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries_count: self.entries.len(),
            expired_cleanups: self.cleanups.load(Ordering::Relaxed),
        }
    }
}
