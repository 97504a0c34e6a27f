//! Trait seams for the opaque persistence store, secret vault, and session
//! validator (spec §1 "out of scope... treated as an opaque repository /
//! opaque encrypted KV / external collaborator"). The dataplane only ever
//! sees these interfaces; production adapters and the in-memory test
//! doubles both live outside `gateway-core`.

use crate::connector::Connector;
use crate::endpoint::Endpoint;
use crate::model::{ApiKey, UsageRecord};
use crate::scope::ScopeFilter;
use async_trait::async_trait;

#[async_trait]
pub trait ConnectorRepository: Send + Sync {
    async fn find_by_scope(&self, filter: &ScopeFilter) -> anyhow::Result<Option<Connector>>;
}

#[async_trait]
pub trait EndpointRepository: Send + Sync {
    async fn list_enabled(&self, connector_id: &str) -> anyhow::Result<Vec<Endpoint>>;
}

#[async_trait]
pub trait ApiKeyRepository: Send + Sync {
    async fn find_by_hash(&self, key_hash: &str) -> anyhow::Result<Option<ApiKey>>;
    /// Fire-and-forget `lastUsedAt` bump (spec §4.9); failures must never
    /// fail the request.
    async fn touch_last_used(&self, api_key_id: &str);
}

#[async_trait]
pub trait TeamMembershipRepository: Send + Sync {
    async fn is_member(&self, user_id: &str, team_id: &str) -> anyhow::Result<bool>;
}

/// Opaque encrypted KV: `get/put/delete` over `gw:<scopeId>:<slug>:<ref>`
/// keys, returning the ciphertext and IV stored alongside it.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<EncryptedSecret>>;
}

#[derive(Debug, Clone)]
pub struct EncryptedSecret {
    pub ciphertext: Vec<u8>,
    pub iv: Vec<u8>,
}

#[async_trait]
pub trait UsageWriter: Send + Sync {
    async fn write_batch(&self, records: &[UsageRecord]) -> anyhow::Result<()>;
    /// Count persisted records for `scope_id` since `since`, used as the
    /// quota fallback when the KV is unavailable (spec §4.5).
    async fn count_since(&self, scope_id: &str, since: chrono::DateTime<chrono::Utc>) -> anyhow::Result<u64>;
}

#[derive(Debug, Clone)]
pub struct SessionPrincipal {
    pub user_id: String,
    pub team_id_header: Option<String>,
}

/// External session-token validator (out of scope per spec §1; the
/// dataplane only calls through this seam).
#[async_trait]
pub trait SessionValidator: Send + Sync {
    async fn validate(&self, bearer_token: &str) -> anyhow::Result<Option<SessionPrincipal>>;
}
