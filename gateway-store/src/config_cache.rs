//! Scope-aware connector+endpoint resolver with a TTL cache and the
//! specificity-ordered path matcher (C8, spec §4.8).

use dashmap::DashMap;
use gateway_core::connector::ConnectorStatus;
use gateway_core::endpoint::{parse_pattern, specificity, match_pattern};
use gateway_core::model::{ConfigCacheEntry, ResolvedConfig};
use gateway_core::repository::{ConnectorRepository, EndpointRepository};
use gateway_core::scope::ScopeFilter;
use std::sync::Arc;
use std::time::{Duration, Instant};

const POSITIVE_TTL: Duration = Duration::from_secs(60);
const NEGATIVE_TTL: Duration = Duration::from_secs(5);

pub struct ConfigResolver {
    connectors: Arc<dyn ConnectorRepository>,
    endpoints: Arc<dyn EndpointRepository>,
    cache: DashMap<String, ConfigCacheEntry>,
}

impl ConfigResolver {
    pub fn new(connectors: Arc<dyn ConnectorRepository>, endpoints: Arc<dyn EndpointRepository>) -> Self {
        Self { connectors, endpoints, cache: DashMap::new() }
    }

    fn cache_key(scope_token: &str, slug: &str, method: &str, path: &str) -> String {
        format!("config:{scope_token}:{slug}:{method}:{path}")
    }

    /// `invalidate` deletes all cache entries whose key begins with
    /// `config:<scopeId>:<slug>:`.
    pub fn invalidate(&self, scope_token: &str, slug: &str) {
        let prefix = format!("config:{scope_token}:{slug}:");
        let stale: Vec<String> = self.cache.iter().filter(|e| e.key().starts_with(&prefix)).map(|e| e.key().clone()).collect();
        for key in stale {
            self.cache.remove(&key);
        }
    }

    pub async fn resolve(
        &self,
        scope_token: &str,
        filter: &ScopeFilter,
        method: &str,
        path: &str,
    ) -> anyhow::Result<Option<ResolvedConfig>> {
        let normalized_path = if path.starts_with('/') { path.to_string() } else { format!("/{path}") };
        let key = Self::cache_key(scope_token, &filter.slug, method, &normalized_path);

        if let Some(cached) = self.cache.get(&key) {
            if cached.expires_at > Instant::now() {
                return Ok(cached.config.clone());
            }
        }

        let connector = self.connectors.find_by_scope(filter).await?;
        let connector = match connector {
            Some(c) if c.status == ConnectorStatus::Published => c,
            _ => {
                self.cache.insert(key, ConfigCacheEntry { config: None, expires_at: Instant::now() + NEGATIVE_TTL });
                return Ok(None);
            }
        };

        let endpoints = self.endpoints.list_enabled(&connector.id).await?;
        let mut candidates: Vec<_> = endpoints
            .into_iter()
            .filter(|e| e.method.matches(method))
            .map(|e| {
                let segments = parse_pattern(&e.path);
                let spec = specificity(&segments);
                (e, segments, spec)
            })
            .collect();
        candidates.sort_by(|a, b| b.2.cmp(&a.2));

        let matched = candidates.into_iter().find_map(|(endpoint, segments, _)| {
            match_pattern(&segments, &normalized_path).map(|_| endpoint)
        });

        let resolved = matched.map(|endpoint| ResolvedConfig { connector: connector.clone(), endpoint });
        let ttl = if resolved.is_some() { POSITIVE_TTL } else { NEGATIVE_TTL };
        self.cache.insert(key, ConfigCacheEntry { config: resolved.clone(), expires_at: Instant::now() + ttl });
        Ok(resolved)
    }
}
