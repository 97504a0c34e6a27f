use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Top-level configuration for the gateway dataplane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Gateway node ID (auto-generated if not set)
    #[serde(default = "default_node_id")]
    pub node_id: String,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub secrets: SecretsConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub usage: UsageConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Dataplane HTTP listener address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,

    /// Number of worker threads (0 = available_parallelism)
    #[serde(default)]
    pub workers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// etcd endpoints backing the distributed rate limiter / quota counters (C5)
    #[serde(default = "default_etcd_endpoints")]
    pub etcd_endpoints: Vec<String>,

    /// Key prefix for rate limit / quota keys
    #[serde(default = "default_rl_prefix")]
    pub prefix: String,

    /// Fall back to counting persisted usage records when the KV is unavailable
    #[serde(default = "default_true")]
    pub db_fallback: bool,

    /// Max distinct cached limiters before LRU eviction (spec §4.5/§5)
    #[serde(default = "default_max_limiters")]
    pub max_limiters: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretsConfig {
    /// 32-byte AES-256-GCM key, hex-encoded. In production this is sourced
    /// from a KMS; a fixed default is provided only so the binary boots
    /// without external configuration in standalone/dev mode.
    #[serde(default = "default_secrets_key_hex")]
    pub encryption_key_hex: String,

    /// Positive decryption cache TTL, seconds (spec §4.11)
    #[serde(default = "default_secret_cache_ttl")]
    pub cache_ttl_s: u64,

    /// Negative (empty-result) cache TTL, seconds
    #[serde(default = "default_secret_negative_ttl")]
    pub negative_cache_ttl_s: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Response cache capacity (spec §3 CacheEntry: max 1000 entries)
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageConfig {
    #[serde(default = "default_usage_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_usage_flush_interval_s")]
    pub flush_interval_s: u64,
    #[serde(default = "default_usage_max_pending")]
    pub max_pending: usize,
    /// FaaS / short-lived process mode: write each record immediately instead
    /// of buffering (spec §4.16).
    #[serde(default)]
    pub short_lived: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub prometheus: PrometheusConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrometheusConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_metrics_addr")]
    pub addr: SocketAddr,
}

impl GatewayConfig {
    /// Load configuration from an optional YAML file, then apply
    /// `GATEWAY_`-prefixed, `__`-nested environment overrides.
    pub fn load(config_path: Option<&str>) -> anyhow::Result<Self> {
        let mut figment = Figment::new();

        if let Some(path) = config_path {
            figment = figment.merge(Yaml::file(path));
        } else {
            for default_path in &["gateway.yaml", "/etc/gateway/gateway.yaml", "config/gateway.yaml"] {
                if std::path::Path::new(default_path).exists() {
                    figment = figment.merge(Yaml::file(default_path));
                    break;
                }
            }
        }

        figment = figment.merge(Env::prefixed("GATEWAY_").split("__"));

        let config: Self = figment.extract()?;
        Ok(config)
    }

    pub fn effective_workers(&self) -> usize {
        if self.server.workers == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            self.server.workers
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            server: ServerConfig::default(),
            rate_limit: RateLimitConfig::default(),
            secrets: SecretsConfig::default(),
            cache: CacheConfig::default(),
            usage: UsageConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
            workers: 0,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            etcd_endpoints: default_etcd_endpoints(),
            prefix: default_rl_prefix(),
            db_fallback: true,
            max_limiters: default_max_limiters(),
        }
    }
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            encryption_key_hex: default_secrets_key_hex(),
            cache_ttl_s: default_secret_cache_ttl(),
            negative_cache_ttl_s: default_secret_negative_ttl(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
        }
    }
}

impl Default for UsageConfig {
    fn default() -> Self {
        Self {
            batch_size: default_usage_batch_size(),
            flush_interval_s: default_usage_flush_interval_s(),
            max_pending: default_usage_max_pending(),
            short_lived: false,
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            prometheus: PrometheusConfig::default(),
        }
    }
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            addr: default_metrics_addr(),
        }
    }
}

fn default_node_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
fn default_http_addr() -> SocketAddr {
    "0.0.0.0:8080".parse().unwrap()
}
fn default_etcd_endpoints() -> Vec<String> {
    vec!["http://127.0.0.1:2379".to_string()]
}
fn default_rl_prefix() -> String {
    "gw".to_string()
}
fn default_max_limiters() -> usize {
    256
}
fn default_secrets_key_hex() -> String {
    "00".repeat(32)
}
fn default_secret_cache_ttl() -> u64 {
    300
}
fn default_secret_negative_ttl() -> u64 {
    30
}
fn default_cache_capacity() -> usize {
    1000
}
fn default_usage_batch_size() -> usize {
    50
}
fn default_usage_flush_interval_s() -> u64 {
    5
}
fn default_usage_max_pending() -> usize {
    500
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_metrics_addr() -> SocketAddr {
    "127.0.0.1:9090".parse().unwrap()
}
fn default_true() -> bool {
    true
}
