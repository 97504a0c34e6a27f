//! Process-wide response cache (C4, spec §4.4). Bounded at 1000 entries;
//! eviction drops expired entries first, then the oldest insertion.

use dashmap::DashMap;
use gateway_core::model::CacheEntry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

pub struct ResponseCache {
    entries: Arc<DashMap<String, CacheEntry>>,
    capacity: usize,
    insertion_counter: AtomicU64,
    insertion_order: Arc<DashMap<String, u64>>,
}

impl ResponseCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            capacity,
            insertion_counter: AtomicU64::new(0),
            insertion_order: Arc::new(DashMap::new()),
        }
    }

    /// Deterministic key; when `body` is present, folds in a short
    /// non-cryptographic hash of it (collisions only reduce hit rate, they
    /// never cross tenants because scope/slug are already in the key).
    pub fn build_key(scope_token: &str, slug: &str, method: &str, path: &str, body: Option<&[u8]>) -> String {
        match body {
            Some(bytes) if !bytes.is_empty() => {
                format!("{scope_token}:{slug}:{method}:{path}:{:x}", fnv1a(bytes))
            }
            _ => format!("{scope_token}:{slug}:{method}:{path}"),
        }
    }

    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.get(key)?;
        if entry.expires_at <= chrono::Utc::now() {
            drop(entry);
            self.entries.remove(key);
            self.insertion_order.remove(key);
            return None;
        }
        Some(entry.clone())
    }

    pub fn set(&self, key: String, entry: CacheEntry) {
        self.evict_expired();
        while self.entries.len() >= self.capacity {
            if !self.evict_oldest() {
                break;
            }
        }
        let seq = self.insertion_counter.fetch_add(1, Ordering::Relaxed);
        self.insertion_order.insert(key.clone(), seq);
        self.entries.insert(key, entry);
    }

    /// Removes every key with the `scope:slug:` prefix (spec §4.4).
    pub fn invalidate(&self, scope_token: &str, slug: &str) {
        let prefix = format!("{scope_token}:{slug}:");
        let to_remove: Vec<String> =
            self.entries.iter().filter(|e| e.key().starts_with(&prefix)).map(|e| e.key().clone()).collect();
        for key in to_remove {
            self.entries.remove(&key);
            self.insertion_order.remove(&key);
        }
    }

    fn evict_expired(&self) {
        let now = chrono::Utc::now();
        let expired: Vec<String> =
            self.entries.iter().filter(|e| e.value().expires_at <= now).map(|e| e.key().clone()).collect();
        for key in expired {
            self.entries.remove(&key);
            self.insertion_order.remove(&key);
        }
    }

    fn evict_oldest(&self) -> bool {
        let oldest = self.insertion_order.iter().min_by_key(|e| *e.value()).map(|e| e.key().clone());
        match oldest {
            Some(key) => {
                self.entries.remove(&key);
                self.insertion_order.remove(&key);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn fnv1a(data: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in data {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

pub fn entry_now(body: Vec<u8>, status: u16, headers: std::collections::HashMap<String, String>, ttl_seconds: u64) -> CacheEntry {
    CacheEntry {
        body,
        status,
        headers,
        expires_at: chrono::Utc::now() + chrono::Duration::seconds(ttl_seconds as i64),
        inserted_at: Instant::now(),
    }
}
