//! Access verifier (C10, spec §4.10). Decides whether an authenticated
//! caller may reach a resolved connector, promoting a personal scope to the
//! connector's team scope when a team membership is found.

use gateway_core::connector::Connector;
use gateway_core::model::{AuthResult, CallerType};
use gateway_core::repository::TeamMembershipRepository;
use gateway_core::scope::Scope;
use std::sync::Arc;

pub struct AccessVerifier {
    memberships: Arc<dyn TeamMembershipRepository>,
}

impl AccessVerifier {
    pub fn new(memberships: Arc<dyn TeamMembershipRepository>) -> Self {
        Self { memberships }
    }

    /// Mutates `auth.scope_id` in place on a team-membership promotion
    /// (spec §4.10 step 3). Returns whether the caller is allowed through.
    pub async fn verify(&self, auth: &mut AuthResult, connector: &Connector) -> anyhow::Result<bool> {
        if connector
            .team_id
            .as_deref()
            .is_some_and(|team_id| auth.scope_id == team_id)
        {
            return Ok(true);
        }

        if let Some(owner_user_id) = &connector.owner_user_id {
            if auth.scope_id == format!("personal:{owner_user_id}") {
                return Ok(true);
            }
        }

        if auth.caller_type == CallerType::Session && Scope::is_personal(&auth.scope_id) {
            if let (Scope::Personal(user_id), Some(team_id)) =
                (Scope::parse(&auth.scope_id), &connector.team_id)
            {
                if self.memberships.is_member(&user_id, team_id).await? {
                    auth.scope_id = team_id.clone();
                    return Ok(true);
                }
            }
        }

        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gateway_core::connector::{ConnectorStatus, Visibility};
    use std::collections::HashMap;

    struct FakeMemberships {
        members: Vec<(&'static str, &'static str)>,
    }

    #[async_trait]
    impl TeamMembershipRepository for FakeMemberships {
        async fn is_member(&self, user_id: &str, team_id: &str) -> anyhow::Result<bool> {
            Ok(self.members.iter().any(|(u, t)| *u == user_id && *t == team_id))
        }
    }

    fn connector(team_id: Option<&str>, owner_user_id: Option<&str>) -> Connector {
        Connector {
            id: "c1".into(),
            slug: "openai".into(),
            team_id: team_id.map(String::from),
            owner_user_id: owner_user_id.map(String::from),
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
        }
    }

    fn auth(caller_type: CallerType, scope_id: &str) -> AuthResult {
        AuthResult {
            caller_type,
            caller_id: "caller".into(),
            scope_id: scope_id.into(),
            api_key_id: None,
            plan_id: None,
            allowed_endpoints: None,
            allowed_ips: None,
            rate_limit: None,
            daily_quota: None,
            monthly_quota: None,
            max_request_size: None,
        }
    }

    #[tokio::test]
    async fn matching_team_scope_is_allowed() {
        let verifier = AccessVerifier::new(Arc::new(FakeMemberships { members: vec![] }));
        let mut a = auth(CallerType::ApiKey, "team-1");
        assert!(verifier.verify(&mut a, &connector(Some("team-1"), None)).await.unwrap());
    }

    #[tokio::test]
    async fn matching_owner_scope_is_allowed() {
        let verifier = AccessVerifier::new(Arc::new(FakeMemberships { members: vec![] }));
        let mut a = auth(CallerType::ApiKey, "personal:user-9");
        assert!(verifier.verify(&mut a, &connector(None, Some("user-9"))).await.unwrap());
    }

    #[tokio::test]
    async fn session_member_is_promoted_to_team_scope() {
        let verifier = AccessVerifier::new(Arc::new(FakeMemberships { members: vec![("user-9", "team-1")] }));
        let mut a = auth(CallerType::Session, "personal:user-9");
        assert!(verifier.verify(&mut a, &connector(Some("team-1"), None)).await.unwrap());
        assert_eq!(a.scope_id, "team-1");
    }

    #[tokio::test]
    async fn api_key_caller_is_never_promoted() {
        let verifier = AccessVerifier::new(Arc::new(FakeMemberships { members: vec![("user-9", "team-1")] }));
        let mut a = auth(CallerType::ApiKey, "personal:user-9");
        assert!(!verifier.verify(&mut a, &connector(Some("team-1"), None)).await.unwrap());
        assert_eq!(a.scope_id, "personal:user-9");
    }

    #[tokio::test]
    async fn non_member_is_denied() {
        let verifier = AccessVerifier::new(Arc::new(FakeMemberships { members: vec![] }));
        let mut a = auth(CallerType::Session, "personal:user-9");
        assert!(!verifier.verify(&mut a, &connector(Some("team-1"), None)).await.unwrap());
    }
}
