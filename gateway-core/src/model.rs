use crate::connector::Connector;
use crate::endpoint::Endpoint;
use http::{HeaderMap, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;

/// `{connector, endpoint}`, treated as one ownership unit throughout the
/// pipeline (spec §3).
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub connector: Connector,
    pub endpoint: Endpoint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CallerType {
    Session,
    ApiKey,
    /// No caller was established, e.g. a usage record emitted for a request
    /// that failed authentication (spec §3, §4.17).
    Unknown,
}

/// Produced by C9, read-only thereafter except the one promotion mutation
/// performed by C10 (spec §3, §4.10).
#[derive(Debug, Clone)]
pub struct AuthResult {
    pub caller_type: CallerType,
    pub caller_id: String,
    pub scope_id: String,
    pub api_key_id: Option<String>,
    pub plan_id: Option<String>,
    pub allowed_endpoints: Option<Vec<String>>,
    pub allowed_ips: Option<Vec<String>>,
    pub rate_limit: Option<u32>,
    pub daily_quota: Option<u64>,
    pub monthly_quota: Option<u64>,
    pub max_request_size: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiKeyStatus {
    Active,
    Revoked,
    Expired,
}

/// Opaque repository record. Lookup is strictly by `keyHash`; the raw key
/// is never persisted (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: String,
    pub key_hash: String,
    pub status: ApiKeyStatus,
    pub team_id: Option<String>,
    pub owner_user_id: Option<String>,
    pub created_by: String,
    pub plan_id: Option<String>,
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub allowed_endpoints: Vec<String>,
    #[serde(default)]
    pub allowed_ips: Vec<String>,
}

impl ApiKey {
    pub fn is_usable(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        if self.status != ApiKeyStatus::Active {
            return false;
        }
        match self.expires_at {
            Some(exp) => now < exp,
            None => true,
        }
    }
}

/// Map `ref -> value` produced by C11. Lifetime is one request; callers
/// must never log its contents or interpolate them into error messages.
#[derive(Debug, Clone, Default)]
pub struct ResolvedSecrets(pub HashMap<String, String>);

impl ResolvedSecrets {
    pub fn get(&self, reference: &str) -> Option<&str> {
        self.0.get(reference).map(String::as_str)
    }
}

/// Produced by C13, consumed by C14.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub url: String,
    pub method: http::Method,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

/// Produced by C14, or synthesized by C4 on a cache hit.
#[derive(Debug, Clone)]
pub struct ProxyResult {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    pub upstream_latency_ms: u64,
    pub cached: bool,
}

/// Produced at the end of every completed request (success or error),
/// consumed in batches by C16 (spec §3, §4.16).
#[derive(Debug, Clone, Serialize)]
pub struct UsageRecord {
    pub scope_id: String,
    pub connector_id: String,
    pub endpoint_name: String,
    pub api_key_id: Option<String>,
    pub caller_type: CallerType,
    pub caller_id: String,
    pub method: String,
    pub path: String,
    pub status_code: u16,
    pub latency_ms: u64,
    pub upstream_latency_ms: u64,
    pub request_bytes: u64,
    pub response_bytes: u64,
    pub cached: bool,
    pub error: Option<String>,
    pub region: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Process-local, per-`slug` circuit state (spec §3, §4.6). `failures >= 5`
/// trips CLOSED -> OPEN; OPEN -> HALF_OPEN once `now >= next_probe_at`;
/// a single HALF_OPEN probe closes or reopens the circuit. Open duration
/// is 30 seconds.
#[derive(Debug, Clone)]
pub struct CircuitBreakerState {
    pub state: BreakerState,
    pub failures: u32,
    pub last_failure_at: Option<Instant>,
    pub next_probe_at: Option<Instant>,
}

impl Default for CircuitBreakerState {
    fn default() -> Self {
        Self {
            state: BreakerState::Closed,
            failures: 0,
            last_failure_at: None,
            next_probe_at: None,
        }
    }
}

/// Response cache entry (spec §3, §4.4). Max 1000 entries per process;
/// eviction drops expired entries first, then the oldest insertion.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub body: Vec<u8>,
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub expires_at: chrono::DateTime<chrono::Utc>,
    pub inserted_at: Instant,
}

/// Resolver cache entry (spec §3, §4.8). 60s positive TTL, 5s negative TTL.
#[derive(Debug, Clone)]
pub struct ConfigCacheEntry {
    pub config: Option<ResolvedConfig>,
    pub expires_at: Instant,
}
