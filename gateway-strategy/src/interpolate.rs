use gateway_core::model::ResolvedSecrets;
use regex::Regex;
use std::sync::OnceLock;

fn pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{secrets\.([A-Za-z0-9_-]+)\}\}").unwrap())
}

/// Replace every `{{secrets.NAME}}` occurrence in `template` with the
/// resolved secret value. Returns the interpolated string and whether any
/// reference could not be resolved (collapses to empty string either way).
pub fn interpolate_secrets(template: &str, secrets: &ResolvedSecrets) -> (String, bool) {
    let mut any_unresolved = false;
    let result = pattern()
        .replace_all(template, |caps: &regex::Captures| match secrets.get(&caps[1]) {
            Some(value) if !value.is_empty() => value.to_string(),
            _ => {
                any_unresolved = true;
                String::new()
            }
        })
        .into_owned();
    (result, any_unresolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn resolves_known_secret() {
        let mut map = HashMap::new();
        map.insert("TOKEN".to_string(), "abc123".to_string());
        let secrets = ResolvedSecrets(map);
        let (out, unresolved) = interpolate_secrets("Bearer {{secrets.TOKEN}}", &secrets);
        assert_eq!(out, "Bearer abc123");
        assert!(!unresolved);
    }

    #[test]
    fn unresolved_reference_collapses_to_empty() {
        let secrets = ResolvedSecrets::default();
        let (out, unresolved) = interpolate_secrets("Bearer {{secrets.MISSING}}", &secrets);
        assert_eq!(out, "Bearer ");
        assert!(unresolved);
    }

    #[test]
    fn empty_secret_value_is_treated_as_unresolved() {
        let mut map = HashMap::new();
        map.insert("TOKEN".to_string(), "".to_string());
        let secrets = ResolvedSecrets(map);
        let (_, unresolved) = interpolate_secrets("{{secrets.TOKEN}}", &secrets);
        assert!(unresolved);
    }

    #[test]
    fn names_with_hyphens_are_supported() {
        let mut map = HashMap::new();
        map.insert("api-key".to_string(), "v".to_string());
        let secrets = ResolvedSecrets(map);
        let (out, unresolved) = interpolate_secrets("{{secrets.api-key}}", &secrets);
        assert_eq!(out, "v");
        assert!(!unresolved);
    }
}
