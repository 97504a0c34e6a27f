//! Secret resolver (C11, spec §4.11): decrypts `gw:<scopeId>:<slug>:<ref>`
//! entries via AES-256-GCM and caches the result for 300s (30s for
//! negative/empty results).

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use dashmap::DashMap;
use futures::future::join_all;
use gateway_core::model::ResolvedSecrets;
use gateway_core::repository::SecretStore;
use std::sync::Arc;
use std::time::{Duration, Instant};

const POSITIVE_TTL: Duration = Duration::from_secs(300);
const NEGATIVE_TTL: Duration = Duration::from_secs(30);

struct CachedSecret {
    value: String,
    expires_at: Instant,
}

pub struct SecretResolver {
    store: Arc<dyn SecretStore>,
    cipher: Aes256Gcm,
    cache: DashMap<String, CachedSecret>,
}

impl SecretResolver {
    /// `key_bytes` must be exactly 32 bytes (AES-256).
    pub fn new(store: Arc<dyn SecretStore>, key_bytes: &[u8]) -> Self {
        let key = Key::<Aes256Gcm>::from_slice(key_bytes);
        Self { store, cipher: Aes256Gcm::new(key), cache: DashMap::new() }
    }

    /// Resolves every ref in `secret_refs` in parallel. Failures yield an
    /// empty string rather than aborting the request (spec §4.11).
    pub async fn resolve_all(&self, scope_token: &str, slug: &str, secret_refs: &[String]) -> ResolvedSecrets {
        let futures = secret_refs.iter().map(|reference| self.resolve_one(scope_token, slug, reference));
        let results = join_all(futures).await;
        let mut map = std::collections::HashMap::new();
        for (reference, value) in secret_refs.iter().zip(results) {
            map.insert(reference.clone(), value);
        }
        ResolvedSecrets(map)
    }

    async fn resolve_one(&self, scope_token: &str, slug: &str, reference: &str) -> String {
        let cache_key = format!("gw:{scope_token}:{slug}:{reference}");
        if let Some(cached) = self.cache.get(&cache_key) {
            if cached.expires_at > Instant::now() {
                return cached.value.clone();
            }
        }

        let value = match self.decrypt_from_store(&cache_key).await {
            Some(plaintext) => plaintext,
            None => {
                tracing::warn!(key = %cache_key, "secret resolution failed, caching negative result");
                String::new()
            }
        };

        let ttl = if value.is_empty() { NEGATIVE_TTL } else { POSITIVE_TTL };
        self.cache.insert(cache_key, CachedSecret { value: value.clone(), expires_at: Instant::now() + ttl });
        value
    }

    async fn decrypt_from_store(&self, key: &str) -> Option<String> {
        let encrypted = self.store.get(key).await.ok().flatten()?;
        if encrypted.iv.len() != 12 {
            return None;
        }
        let nonce = Nonce::from_slice(&encrypted.iv);
        let plaintext = self
            .cipher
            .decrypt(nonce, Payload { msg: &encrypted.ciphertext, aad: key.as_bytes() })
            .ok()?;
        String::from_utf8(plaintext).ok()
    }
}
