use serde::{Deserialize, Serialize};

/// Tagged tenancy identifier carried by every dataplane request (spec §3, §4.1).
///
/// `Public` is an explicit sentinel variant rather than an overloaded string —
/// see SPEC_FULL.md §9's resolution of the "public scope sentinel" open question.
/// It never round-trips through [`Scope::parse`]/[`Scope::serialize`]: those two
/// functions only know the wire forms `<teamId>` and `personal:<userId>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    Team(String),
    Personal(String),
    Public,
}

const PERSONAL_PREFIX: &str = "personal:";

impl Scope {
    /// Parse the wire form. A team ID is an opaque UUID, so any string that
    /// literally begins with `personal:` must be treated as personal — a team
    /// ID can never collide with that prefix.
    pub fn parse(raw: &str) -> Scope {
        match raw.strip_prefix(PERSONAL_PREFIX) {
            Some(user_id) => Scope::Personal(user_id.to_string()),
            None => Scope::Team(raw.to_string()),
        }
    }

    /// Serialize back to the wire form. Panics if called on `Public`, which
    /// never appears on the wire; callers must branch on visibility before
    /// serializing.
    pub fn serialize(&self) -> String {
        match self {
            Scope::Team(id) => id.clone(),
            Scope::Personal(user_id) => format!("{PERSONAL_PREFIX}{user_id}"),
            Scope::Public => panic!("Scope::Public has no wire representation"),
        }
    }

    pub fn is_personal(raw: &str) -> bool {
        raw.starts_with(PERSONAL_PREFIX)
    }

    /// Build the repository filter fields used to look up a connector for
    /// this scope: personal scopes filter by owner, team scopes by team id.
    pub fn filter(&self, connector_slug: &str) -> ScopeFilter {
        match self {
            Scope::Team(team_id) => ScopeFilter {
                slug: connector_slug.to_string(),
                team_id: Some(team_id.clone()),
                owner_user_id: None,
            },
            Scope::Personal(user_id) => ScopeFilter {
                slug: connector_slug.to_string(),
                team_id: None,
                owner_user_id: Some(user_id.clone()),
            },
            Scope::Public => ScopeFilter {
                slug: connector_slug.to_string(),
                team_id: None,
                owner_user_id: None,
            },
        }
    }

    /// Cache-key-safe textual representation — distinct for every scope,
    /// including `Public`, so tenant isolation (spec §8) holds in cache keys.
    pub fn cache_token(&self) -> String {
        match self {
            Scope::Team(id) => format!("team:{id}"),
            Scope::Personal(user_id) => format!("personal:{user_id}"),
            Scope::Public => "public".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScopeFilter {
    pub slug: String,
    pub team_id: Option<String>,
    pub owner_user_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_team_scope() {
        assert_eq!(Scope::parse("team-abc-123"), Scope::Team("team-abc-123".into()));
    }

    #[test]
    fn parses_personal_scope() {
        assert_eq!(Scope::parse("personal:user-1"), Scope::Personal("user-1".into()));
    }

    #[test]
    fn round_trips_team_scope() {
        let s = Scope::Team("t1".into());
        assert_eq!(Scope::parse(&s.serialize()), s);
    }

    #[test]
    fn round_trips_personal_scope() {
        let s = Scope::Personal("u1".into());
        assert_eq!(Scope::parse(&s.serialize()), s);
    }

    #[test]
    fn is_personal_detects_prefix() {
        assert!(Scope::is_personal("personal:u1"));
        assert!(!Scope::is_personal("team-id"));
    }

    #[test]
    fn distinct_scopes_have_distinct_cache_tokens() {
        let a = Scope::Team("x".into()).cache_token();
        let b = Scope::Personal("x".into()).cache_token();
        let c = Scope::Public.cache_token();
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(b, c);
    }

    #[test]
    fn filter_uses_owner_for_personal_and_team_for_team() {
        let p = Scope::Personal("u1".into()).filter("slug-a");
        assert_eq!(p.owner_user_id.as_deref(), Some("u1"));
        assert!(p.team_id.is_none());

        let t = Scope::Team("t1".into()).filter("slug-a");
        assert_eq!(t.team_id.as_deref(), Some("t1"));
        assert!(t.owner_user_id.is_none());
    }
}
