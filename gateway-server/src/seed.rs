//! Standalone/dev-mode data seeding (SPEC_FULL.md §10.4). Populates the
//! in-memory repositories from an optional JSON file at startup; a
//! production deployment behind a real database replaces this module
//! entirely rather than extending it.

use gateway_core::connector::Connector;
use gateway_core::endpoint::Endpoint;
use gateway_core::model::ApiKey;
use gateway_core::repository::SessionPrincipal;
use gateway_store::memory::{
    InMemoryApiKeyRepository, InMemoryConnectorRepository, InMemoryEndpointRepository,
    InMemorySecretStore, InMemorySessionValidator, InMemoryTeamMembershipRepository,
    InMemoryUsageWriter,
};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Default, Deserialize)]
pub struct SeedFile {
    #[serde(default)]
    pub connectors: Vec<Connector>,
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
    #[serde(default)]
    pub api_keys: Vec<ApiKey>,
    #[serde(default)]
    pub team_memberships: Vec<(String, String)>,
    #[serde(default)]
    pub session_tokens: Vec<SeedSessionToken>,
}

#[derive(Debug, Deserialize)]
pub struct SeedSessionToken {
    pub token: String,
    pub user_id: String,
    #[serde(default)]
    pub team_id_header: Option<String>,
}

impl SeedFile {
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

/// The standalone-mode repository set, built once at startup and shared by
/// every dataplane component that needs a repository seam.
pub struct SeedRepos {
    pub connectors: Arc<InMemoryConnectorRepository>,
    pub endpoints: Arc<InMemoryEndpointRepository>,
    pub api_keys: Arc<InMemoryApiKeyRepository>,
    pub team_memberships: Arc<InMemoryTeamMembershipRepository>,
    pub secrets: Arc<InMemorySecretStore>,
    pub usage: Arc<InMemoryUsageWriter>,
    pub sessions: Arc<InMemorySessionValidator>,
}

impl SeedRepos {
    pub fn empty() -> Self {
        Self::from_seed(SeedFile::default())
    }

    pub fn from_seed(seed: SeedFile) -> Self {
        let api_keys = InMemoryApiKeyRepository::default();
        for key in seed.api_keys {
            api_keys.keys.insert(key.key_hash.clone(), key);
        }

        let sessions = InMemorySessionValidator::default();
        for token in seed.session_tokens {
            sessions.valid_tokens.insert(
                token.token,
                SessionPrincipal { user_id: token.user_id, team_id_header: token.team_id_header },
            );
        }

        Self {
            connectors: Arc::new(InMemoryConnectorRepository { connectors: seed.connectors }),
            endpoints: Arc::new(InMemoryEndpointRepository { endpoints: seed.endpoints }),
            api_keys: Arc::new(api_keys),
            team_memberships: Arc::new(InMemoryTeamMembershipRepository { memberships: seed.team_memberships }),
            secrets: Arc::new(InMemorySecretStore::default()),
            usage: Arc::new(InMemoryUsageWriter::default()),
            sessions: Arc::new(sessions),
        }
    }
}
