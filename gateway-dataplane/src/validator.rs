//! Request validator (C12, spec §4.12). Runs before the transform pipeline;
//! checks in order, failing fast on the first violation.

use gateway_core::endpoint::Endpoint;
use gateway_core::error::GatewayError;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;

const MAX_PATTERN_BODY_BYTES: usize = 1_000_000;

pub struct Validator;

impl Validator {
    pub fn validate(
        endpoint: &Endpoint,
        headers: &BTreeMap<String, String>,
        body: &[u8],
    ) -> Result<(), GatewayError> {
        Self::check_required_headers(endpoint, headers)?;
        Self::check_body_pattern(endpoint, body)?;
        Self::check_body_blacklist(endpoint, body)?;
        Self::check_body_schema(endpoint, body)?;
        Ok(())
    }

    fn check_required_headers(
        endpoint: &Endpoint,
        headers: &BTreeMap<String, String>,
    ) -> Result<(), GatewayError> {
        for required in &endpoint.required_headers {
            let present = headers.keys().any(|k| k.eq_ignore_ascii_case(required));
            if !present {
                return Err(GatewayError::ValidationFailed(format!(
                    "missing required header: {required}"
                )));
            }
        }
        Ok(())
    }

    fn check_body_pattern(endpoint: &Endpoint, body: &[u8]) -> Result<(), GatewayError> {
        let Some(pattern) = &endpoint.body_pattern else {
            return Ok(());
        };
        if body.len() > MAX_PATTERN_BODY_BYTES {
            return Ok(());
        }
        let re = Regex::new(pattern)
            .map_err(|e| GatewayError::Internal(format!("invalid bodyPattern regex: {e}")))?;
        let body_str = String::from_utf8_lossy(body);
        if !re.is_match(&body_str) {
            return Err(GatewayError::ValidationFailed("body does not match required pattern".into()));
        }
        Ok(())
    }

    fn check_body_blacklist(endpoint: &Endpoint, body: &[u8]) -> Result<(), GatewayError> {
        if endpoint.body_blacklist.is_empty() {
            return Ok(());
        }
        let body_str = String::from_utf8_lossy(body).to_lowercase();
        for term in &endpoint.body_blacklist {
            if body_str.contains(&term.to_lowercase()) {
                return Err(GatewayError::ValidationFailed(format!(
                    "body contains blacklisted term: {term}"
                )));
            }
        }
        Ok(())
    }

    fn check_body_schema(endpoint: &Endpoint, body: &[u8]) -> Result<(), GatewayError> {
        let Some(schema) = &endpoint.body_schema else {
            return Ok(());
        };
        let parsed: Value = serde_json::from_slice(body)
            .map_err(|_| GatewayError::ValidationFailed("body is not valid JSON".into()))?;

        let schema_type = schema.get("type").and_then(Value::as_str);
        match schema_type {
            Some("object") => Self::check_object_schema(schema, &parsed),
            Some("array") => {
                if parsed.is_array() {
                    Ok(())
                } else {
                    Err(GatewayError::ValidationFailed("body must be a JSON array".into()))
                }
            }
            _ => Ok(()),
        }
    }

    fn check_object_schema(schema: &Value, parsed: &Value) -> Result<(), GatewayError> {
        let Value::Object(obj) = parsed else {
            return Err(GatewayError::ValidationFailed("body must be a JSON object".into()));
        };

        if let Some(required) = schema.get("required").and_then(Value::as_array) {
            for field in required {
                let Some(name) = field.as_str() else { continue };
                if !obj.contains_key(name) {
                    return Err(GatewayError::ValidationFailed(format!("missing required field: {name}")));
                }
            }
        }

        if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
            for (name, prop_schema) in properties {
                let Some(value) = obj.get(name) else { continue };
                let Some(expected) = prop_schema.get("type").and_then(Value::as_str) else { continue };
                let matches = match expected {
                    "string" => value.is_string(),
                    "number" => value.is_number(),
                    "boolean" => value.is_boolean(),
                    _ => true,
                };
                if !matches {
                    return Err(GatewayError::ValidationFailed(format!(
                        "field {name} must be of type {expected}"
                    )));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn sample_endpoint() -> Endpoint {
        Endpoint {
            id: "e1".into(),
            connector_id: "c1".into(),
            name: "test".into(),
            method: gateway_core::endpoint::HttpMethod::Post,
            path: "/widgets".into(),
            enabled: true,
            upstream_method: None,
            upstream_path: "/widgets".into(),
            upstream_content_type: None,
            upstream_query_params: vec![],
            upstream_static_body: None,
            body_transform: "passthrough".into(),
            header_mapping: HashMap::new(),
            rate_limit: None,
            timeout_ms: None,
            max_request_size: None,
            max_response_size: None,
            cache_ttl_s: None,
            retries: 0,
            body_pattern: None,
            body_blacklist: vec![],
            body_schema: None,
            required_headers: vec![],
            response_body_transform: None,
        }
    }

    #[test]
    fn missing_required_header_rejects() {
        let mut ep = sample_endpoint();
        ep.required_headers = vec!["x-api-version".into()];
        let headers = BTreeMap::new();
        assert!(Validator::validate(&ep, &headers, b"").is_err());
    }

    #[test]
    fn required_header_check_is_case_insensitive() {
        let mut ep = sample_endpoint();
        ep.required_headers = vec!["X-Api-Version".into()];
        let mut headers = BTreeMap::new();
        headers.insert("x-api-version".into(), "1".into());
        assert!(Validator::validate(&ep, &headers, b"").is_ok());
    }

    #[test]
    fn body_pattern_mismatch_rejects() {
        let mut ep = sample_endpoint();
        ep.body_pattern = Some(r"^\{.*\}$".to_string());
        let headers = BTreeMap::new();
        assert!(Validator::validate(&ep, &headers, b"not json").is_err());
        assert!(Validator::validate(&ep, &headers, b"{\"a\":1}").is_ok());
    }

    #[test]
    fn body_blacklist_is_case_insensitive_substring_match() {
        let mut ep = sample_endpoint();
        ep.body_blacklist = vec!["DROP TABLE".into()];
        let headers = BTreeMap::new();
        assert!(Validator::validate(&ep, &headers, b"please drop table users").is_err());
        assert!(Validator::validate(&ep, &headers, b"hello world").is_ok());
    }

    #[test]
    fn body_schema_requires_declared_fields_and_types() {
        let mut ep = sample_endpoint();
        ep.body_schema = Some(json!({
            "type": "object",
            "required": ["name"],
            "properties": { "name": { "type": "string" }, "count": { "type": "number" } }
        }));
        let headers = BTreeMap::new();
        assert!(Validator::validate(&ep, &headers, br#"{"count": 1}"#).is_err());
        assert!(Validator::validate(&ep, &headers, br#"{"name": 5}"#).is_err());
        assert!(Validator::validate(&ep, &headers, br#"{"name": "a", "extra": true}"#).is_ok());
    }

    #[test]
    fn unparseable_json_against_schema_rejects() {
        let mut ep = sample_endpoint();
        ep.body_schema = Some(json!({ "type": "object" }));
        let headers = BTreeMap::new();
        assert!(Validator::validate(&ep, &headers, b"not json").is_err());
    }
}
