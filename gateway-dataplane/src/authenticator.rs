//! Authenticator (C9, spec §4.9). Two paths selected by the `Authorization`
//! header: `Bearer gw_<rawKey>` resolves through the API-key repository,
//! anything else through the external session validator.

use gateway_core::model::{ApiKeyStatus, AuthResult, CallerType};
use gateway_core::repository::{ApiKeyRepository, SessionValidator};
use sha2::{Digest, Sha256};
use std::sync::Arc;

const API_KEY_PREFIX: &str = "gw_";

fn hex_encode(bytes: impl AsRef<[u8]>) -> String {
    bytes.as_ref().iter().map(|b| format!("{b:02x}")).collect()
}

pub struct Authenticator {
    api_keys: Arc<dyn ApiKeyRepository>,
    sessions: Arc<dyn SessionValidator>,
}

impl Authenticator {
    pub fn new(api_keys: Arc<dyn ApiKeyRepository>, sessions: Arc<dyn SessionValidator>) -> Self {
        Self { api_keys, sessions }
    }

    /// `None` means unauthenticated (surfaces as 401 at the call site).
    pub async fn authenticate(
        &self,
        authorization: Option<&str>,
        team_id_header: Option<&str>,
    ) -> anyhow::Result<Option<AuthResult>> {
        let Some(header) = authorization else {
            return Ok(None);
        };
        let Some(token) = header.strip_prefix("Bearer ") else {
            return Ok(None);
        };

        if let Some(raw_key) = token.strip_prefix(API_KEY_PREFIX) {
            return self.authenticate_api_key(raw_key).await;
        }

        self.authenticate_session(token, team_id_header).await
    }

    async fn authenticate_api_key(&self, raw_key: &str) -> anyhow::Result<Option<AuthResult>> {
        let key_hash = hex_encode(Sha256::digest(raw_key.as_bytes()));
        let Some(key) = self.api_keys.find_by_hash(&key_hash).await? else {
            return Ok(None);
        };
        if key.status != ApiKeyStatus::Active {
            return Ok(None);
        }
        if !key.is_usable(chrono::Utc::now()) {
            return Ok(None);
        }

        let key_id = key.id.clone();
        let api_keys = self.api_keys.clone();
        tokio::spawn(async move {
            api_keys.touch_last_used(&key_id).await;
        });

        let scope_id = match &key.team_id {
            Some(team_id) => team_id.clone(),
            None => format!("personal:{}", key.owner_user_id.clone().unwrap_or_default()),
        };

        Ok(Some(AuthResult {
            caller_type: CallerType::ApiKey,
            caller_id: key.id.clone(),
            scope_id,
            api_key_id: Some(key.id.clone()),
            plan_id: key.plan_id.clone(),
            allowed_endpoints: (!key.allowed_endpoints.is_empty()).then(|| key.allowed_endpoints.clone()),
            allowed_ips: (!key.allowed_ips.is_empty()).then(|| key.allowed_ips.clone()),
            rate_limit: None,
            daily_quota: None,
            monthly_quota: None,
            max_request_size: None,
        }))
    }

    async fn authenticate_session(
        &self,
        bearer_token: &str,
        team_id_header: Option<&str>,
    ) -> anyhow::Result<Option<AuthResult>> {
        let Some(principal) = self.sessions.validate(bearer_token).await? else {
            return Ok(None);
        };

        let scope_id = match team_id_header {
            Some(team_id) => team_id.to_string(),
            None => format!("personal:{}", principal.user_id),
        };

        Ok(Some(AuthResult {
            caller_type: CallerType::Session,
            caller_id: principal.user_id,
            scope_id,
            api_key_id: None,
            plan_id: None,
            allowed_endpoints: None,
            allowed_ips: None,
            rate_limit: None,
            daily_quota: None,
            monthly_quota: None,
            max_request_size: None,
        }))
    }
}
