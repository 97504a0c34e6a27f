use crate::interpolate::interpolate_secrets;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use gateway_core::model::ResolvedSecrets;
use gateway_core::sigv4::{self, SigningInput};
use std::collections::BTreeMap;
use std::sync::Arc;

pub const WARNING_HEADER: &str = "x-gateway-warning";
pub const WARNING_MISSING_SECRET: &str = "missing-auth-secret";

/// Inputs the auth strategies mutate in place (spec §4.7).
pub struct AuthInput<'a> {
    pub headers: &'a mut BTreeMap<String, String>,
    pub query: &'a mut Vec<(String, String)>,
    pub auth_config: &'a serde_json::Value,
    pub secrets: &'a ResolvedSecrets,
    pub connector_slug: &'a str,
    pub method: &'a str,
    pub host: &'a str,
    pub path: &'a str,
    pub body: Option<&'a [u8]>,
}

pub trait AuthStrategy: Send + Sync {
    fn inject(&self, input: &mut AuthInput);
}

struct None_;
impl AuthStrategy for None_ {
    fn inject(&self, _input: &mut AuthInput) {}
}

struct Bearer;
impl AuthStrategy for Bearer {
    fn inject(&self, input: &mut AuthInput) {
        let token_ref = config_str(input.auth_config, "tokenRef").unwrap_or_else(|| "token".to_string());
        match input.secrets.get(&token_ref) {
            Some(value) if !value.is_empty() => {
                input.headers.insert("authorization".to_string(), format!("Bearer {value}"));
            }
            _ => warn_missing(input),
        }
    }
}

struct Basic;
impl AuthStrategy for Basic {
    fn inject(&self, input: &mut AuthInput) {
        let username_ref = config_str(input.auth_config, "usernameRef").unwrap_or_else(|| "username".to_string());
        let password_ref = config_str(input.auth_config, "passwordRef").unwrap_or_else(|| "password".to_string());
        let username = input.secrets.get(&username_ref).unwrap_or("");
        let password = input.secrets.get(&password_ref).unwrap_or("");
        if username.is_empty() && password.is_empty() {
            warn_missing(input);
            return;
        }
        let encoded = BASE64.encode(format!("{username}:{password}"));
        input.headers.insert("authorization".to_string(), format!("Basic {encoded}"));
    }
}

struct Header;
impl AuthStrategy for Header {
    fn inject(&self, input: &mut AuthInput) {
        let Some(map) = input.auth_config.get("headers").and_then(|v| v.as_object()) else {
            return;
        };
        let mut any_unresolved = false;
        let pairs: Vec<(String, String)> = map
            .iter()
            .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
            .collect();
        for (k, template) in pairs {
            let (resolved, unresolved) = interpolate_secrets(&template, input.secrets);
            any_unresolved |= unresolved;
            input.headers.insert(k.to_ascii_lowercase(), resolved);
        }
        if any_unresolved {
            input.headers.insert(WARNING_HEADER.to_string(), WARNING_MISSING_SECRET.to_string());
        }
    }
}

struct Query;
impl AuthStrategy for Query {
    fn inject(&self, input: &mut AuthInput) {
        let param_name = config_str(input.auth_config, "paramName").unwrap_or_else(|| "key".to_string());
        let secret_ref = config_str(input.auth_config, "secretRef").unwrap_or_else(|| "token".to_string());
        match input.secrets.get(&secret_ref) {
            Some(value) if !value.is_empty() => {
                input.query.push((param_name, value.to_string()));
            }
            _ => warn_missing(input),
        }
    }
}

struct AwsS3;
impl AuthStrategy for AwsS3 {
    fn inject(&self, input: &mut AuthInput) {
        let access_key_ref = config_str(input.auth_config, "accessKeyRef").unwrap_or_else(|| "access_key".to_string());
        let secret_key_ref = config_str(input.auth_config, "secretKeyRef").unwrap_or_else(|| "secret_key".to_string());
        let region = config_str(input.auth_config, "region").unwrap_or_else(|| "us-east-1".to_string());
        let service = config_str(input.auth_config, "service").unwrap_or_else(|| "s3".to_string());

        let (Some(access_key), Some(secret_key)) =
            (input.secrets.get(&access_key_ref), input.secrets.get(&secret_key_ref))
        else {
            return;
        };
        if access_key.is_empty() || secret_key.is_empty() {
            return;
        }

        let mut signing = SigningInput {
            method: input.method,
            host: input.host,
            path: input.path,
            query: input.query,
            headers: input.headers,
            body: input.body,
            access_key,
            secret_key,
            region: &region,
            service: &service,
            sign_payload: false,
            now: chrono::Utc::now(),
        };
        sigv4::sign(&mut signing);
    }
}

fn config_str(config: &serde_json::Value, key: &str) -> Option<String> {
    config.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

fn warn_missing(input: &mut AuthInput) {
    input.headers.insert(WARNING_HEADER.to_string(), WARNING_MISSING_SECRET.to_string());
}

/// Unknown auth strategy names fall back to `none` (spec §4.7).
pub fn resolve(name: &str) -> Arc<dyn AuthStrategy> {
    match name {
        "bearer" => Arc::new(Bearer),
        "basic" => Arc::new(Basic),
        "header" => Arc::new(Header),
        "query" => Arc::new(Query),
        "aws-s3" => Arc::new(AwsS3),
        _ => Arc::new(None_),
    }
}
