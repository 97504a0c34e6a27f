//! In-memory repository/secret-store/usage-writer implementations
//! (SPEC_FULL.md §10.4). Used both by the dataplane crate's integration
//! tests and as the server binary's standalone/default-configuration
//! persistence layer, optionally seeded from a JSON file at startup;
//! production deployments behind a real database are wired by the
//! (out-of-scope) admin/control-plane surface.

use async_trait::async_trait;
use dashmap::DashMap;
use gateway_core::connector::Connector;
use gateway_core::endpoint::Endpoint;
use gateway_core::model::{ApiKey, UsageRecord};
use gateway_core::repository::{
    ApiKeyRepository, ConnectorRepository, EncryptedSecret, EndpointRepository, SecretStore,
    SessionPrincipal, SessionValidator, TeamMembershipRepository, UsageWriter,
};
use gateway_core::scope::ScopeFilter;
use std::sync::Mutex;

#[derive(Default)]
pub struct InMemoryConnectorRepository {
    pub connectors: Vec<Connector>,
}

#[async_trait]
impl ConnectorRepository for InMemoryConnectorRepository {
    async fn find_by_scope(&self, filter: &ScopeFilter) -> anyhow::Result<Option<Connector>> {
        Ok(self
            .connectors
            .iter()
            .find(|c| {
                c.slug == filter.slug
                    && c.team_id == filter.team_id
                    && c.owner_user_id == filter.owner_user_id
            })
            .cloned())
    }
}

#[derive(Default)]
pub struct InMemoryEndpointRepository {
    pub endpoints: Vec<Endpoint>,
}

#[async_trait]
impl EndpointRepository for InMemoryEndpointRepository {
    async fn list_enabled(&self, connector_id: &str) -> anyhow::Result<Vec<Endpoint>> {
        Ok(self
            .endpoints
            .iter()
            .filter(|e| e.connector_id == connector_id && e.enabled)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryApiKeyRepository {
    pub keys: DashMap<String, ApiKey>,
}

#[async_trait]
impl ApiKeyRepository for InMemoryApiKeyRepository {
    async fn find_by_hash(&self, key_hash: &str) -> anyhow::Result<Option<ApiKey>> {
        Ok(self.keys.get(key_hash).map(|e| e.clone()))
    }

    async fn touch_last_used(&self, _api_key_id: &str) {}
}

#[derive(Default)]
pub struct InMemoryTeamMembershipRepository {
    pub memberships: Vec<(String, String)>,
}

#[async_trait]
impl TeamMembershipRepository for InMemoryTeamMembershipRepository {
    async fn is_member(&self, user_id: &str, team_id: &str) -> anyhow::Result<bool> {
        Ok(self.memberships.iter().any(|(u, t)| u == user_id && t == team_id))
    }
}

#[derive(Default)]
pub struct InMemorySecretStore {
    pub secrets: DashMap<String, EncryptedSecret>,
}

#[async_trait]
impl SecretStore for InMemorySecretStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<EncryptedSecret>> {
        Ok(self.secrets.get(key).map(|e| e.clone()))
    }
}

#[derive(Default)]
pub struct InMemoryUsageWriter {
    pub records: Mutex<Vec<UsageRecord>>,
}

#[async_trait]
impl UsageWriter for InMemoryUsageWriter {
    async fn write_batch(&self, records: &[UsageRecord]) -> anyhow::Result<()> {
        self.records.lock().unwrap().extend_from_slice(records);
        Ok(())
    }

    async fn count_since(&self, scope_id: &str, since: chrono::DateTime<chrono::Utc>) -> anyhow::Result<u64> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.scope_id == scope_id && r.timestamp >= since)
            .count() as u64)
    }
}

/// Session validator double: accepts any token present in `valid_tokens`.
#[derive(Default)]
pub struct InMemorySessionValidator {
    pub valid_tokens: DashMap<String, SessionPrincipal>,
}

#[async_trait]
impl SessionValidator for InMemorySessionValidator {
    async fn validate(&self, bearer_token: &str) -> anyhow::Result<Option<SessionPrincipal>> {
        Ok(self.valid_tokens.get(bearer_token).map(|e| e.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_core::connector::{ConnectorStatus, Visibility};
    use std::collections::HashMap;

    #[tokio::test]
    async fn finds_connector_matching_scope_filter() {
        let connector = Connector {
            id: "c1".into(),
            slug: "openai".into(),
            team_id: Some("t1".into()),
            owner_user_id: None,
            display_name: "OpenAI".into(),
            status: ConnectorStatus::Published,
            visibility: Visibility::Team,
            upstream_base_url: "https://api.openai.com".into(),
            allowed_hosts: vec![],
            default_timeout_ms: 5000,
            health_check_path: None,
            auth_type: "bearer".into(),
            auth_config: HashMap::new(),
            secret_refs: vec![],
            response_wrapper: false,
            streaming_enabled: false,
            error_mapping: HashMap::new(),
        };
        let repo = InMemoryConnectorRepository { connectors: vec![connector] };
        let filter = ScopeFilter { slug: "openai".into(), team_id: Some("t1".into()), owner_user_id: None };
        assert!(repo.find_by_scope(&filter).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn team_membership_lookup_matches_pair() {
        let repo = InMemoryTeamMembershipRepository { memberships: vec![("u1".into(), "t1".into())] };
        assert!(repo.is_member("u1", "t1").await.unwrap());
        assert!(!repo.is_member("u1", "t2").await.unwrap());
    }
}
