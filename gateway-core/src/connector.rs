use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectorStatus {
    Draft,
    Published,
    Archived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Private,
    Team,
    Public,
}

/// A tenant-owned configuration binding a public slug to an upstream base URL,
/// an authentication method, and a set of endpoint rules (spec §1, §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connector {
    pub id: String,
    pub slug: String,
    pub team_id: Option<String>,
    pub owner_user_id: Option<String>,
    pub display_name: String,
    pub status: ConnectorStatus,
    pub visibility: Visibility,
    pub upstream_base_url: String,
    #[serde(default)]
    pub allowed_hosts: Vec<String>,
    pub default_timeout_ms: u64,
    #[serde(default)]
    pub health_check_path: Option<String>,
    pub auth_type: String,
    #[serde(default)]
    pub auth_config: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub secret_refs: Vec<String>,
    #[serde(default)]
    pub response_wrapper: bool,
    #[serde(default)]
    pub streaming_enabled: bool,
    #[serde(default)]
    pub error_mapping: HashMap<u16, String>,
}

impl Connector {
    /// `slug` must match `[a-z0-9-]+` per spec §3.
    pub fn is_valid_slug(slug: &str) -> bool {
        !slug.is_empty()
            && slug
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
    }

    /// `teamId` XOR `ownerUserId` must be non-null.
    pub fn has_valid_ownership(&self) -> bool {
        self.team_id.is_some() != self.owner_user_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_validation_accepts_lowercase_digits_hyphen() {
        assert!(Connector::is_valid_slug("openai-v2"));
        assert!(!Connector::is_valid_slug("OpenAI"));
        assert!(!Connector::is_valid_slug("open_ai"));
        assert!(!Connector::is_valid_slug(""));
    }

    #[test]
    fn ownership_is_xor() {
        let mut c = sample();
        c.team_id = Some("t1".into());
        c.owner_user_id = None;
        assert!(c.has_valid_ownership());

        c.owner_user_id = Some("u1".into());
        assert!(!c.has_valid_ownership());

        c.team_id = None;
        assert!(c.has_valid_ownership());

        c.owner_user_id = None;
        assert!(!c.has_valid_ownership());
    }

    fn sample() -> Connector {
        Connector {
            id: "c1".into(),
            slug: "openai".into(),
            team_id: None,
            owner_user_id: None,
            display_name: "OpenAI".into(),
            status: ConnectorStatus::Published,
            visibility: Visibility::Team,
            upstream_base_url: "https://api.example.com".into(),
            allowed_hosts: vec![],
            default_timeout_ms: 5000,
            health_check_path: None,
            auth_type: "bearer".into(),
            auth_config: HashMap::new(),
            secret_refs: vec![],
            response_wrapper: false,
            streaming_enabled: false,
            error_mapping: HashMap::new(),
        }
    }
}
