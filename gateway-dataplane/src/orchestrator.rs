//! Transform orchestrator (C13, spec §4.13). Builds the final
//! `UpstreamRequest` from a resolved config, the consumer's inbound
//! request, and previously-resolved secrets.

use gateway_core::connector::Connector;
use gateway_core::endpoint::{parse_pattern, Endpoint, PathSegment};
use gateway_core::model::{ResolvedSecrets, UpstreamRequest};
use gateway_strategy::auth::AuthInput;
use gateway_strategy::body::BodyInput;
use gateway_strategy::registry::StrategyRegistry;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use std::collections::BTreeMap;

const FORWARDED_HEADERS: &[&str] = &["x-request-id", "x-trace-id"];

pub struct TransformOrchestrator {
    registry: StrategyRegistry,
}

pub struct OrchestratorInput<'a> {
    pub connector: &'a Connector,
    pub endpoint: &'a Endpoint,
    pub path_param_values: &'a [String],
    pub consumer_query: &'a [(String, String)],
    pub consumer_headers: &'a BTreeMap<String, String>,
    pub consumer_body: Option<&'a str>,
    pub consumer_body_raw: Option<&'a [u8]>,
    pub secrets: &'a ResolvedSecrets,
}

impl TransformOrchestrator {
    pub fn new() -> Self {
        Self { registry: StrategyRegistry::default() }
    }

    pub fn build(&self, input: &OrchestratorInput) -> anyhow::Result<UpstreamRequest> {
        let path = substitute_upstream_path(&input.endpoint.upstream_path, input.path_param_values);
        let url_path = join_base_and_path(&input.connector.upstream_base_url, &path);

        let mut query = input.consumer_query.to_vec();
        for (k, v) in &input.endpoint.upstream_query_params {
            query.retain(|(ek, _)| ek != k);
            query.push((k.clone(), v.clone()));
        }

        let method = input
            .endpoint
            .upstream_method
            .unwrap_or(input.endpoint.method)
            .as_str();

        let mut headers: BTreeMap<String, String> = BTreeMap::new();
        let content_type = input
            .endpoint
            .upstream_content_type
            .clone()
            .or_else(|| input.consumer_headers.get("content-type").cloned());
        if let Some(ct) = content_type {
            headers.insert("content-type".to_string(), ct);
        }
        for header_name in FORWARDED_HEADERS {
            if let Some(value) = input.consumer_headers.get(*header_name) {
                headers.insert(header_name.to_string(), value.clone());
            }
        }
        for (k, template) in &input.endpoint.header_mapping {
            let (resolved, _) = gateway_strategy::interpolate::interpolate_secrets(template, input.secrets);
            headers.insert(k.to_ascii_lowercase(), resolved);
        }

        let body_input = BodyInput {
            consumer_body: input.consumer_body,
            consumer_body_raw: input.consumer_body_raw,
            upstream_static_body: input.endpoint.upstream_static_body.as_deref(),
        };
        let body = self
            .registry
            .body(&input.endpoint.body_transform)
            .apply(&input.endpoint.body_transform, &body_input)
            .unwrap_or_default();

        let host = extract_host(&url_path);
        let auth_config = serde_json::to_value(&input.connector.auth_config).unwrap_or(serde_json::Value::Null);
        {
            let mut auth_input = AuthInput {
                headers: &mut headers,
                query: &mut query,
                auth_config: &auth_config,
                secrets: input.secrets,
                connector_slug: &input.connector.slug,
                method,
                host,
                path: &path,
                body: Some(body.as_slice()),
            };
            self.registry.auth(&input.connector.auth_type).inject(&mut auth_input);
        }

        let final_url = if query.is_empty() {
            url_path
        } else {
            format!("{url_path}?{}", gateway_core::percent::form_encode(&query))
        };

        Ok(UpstreamRequest {
            url: final_url,
            method: Method::from_bytes(method.as_bytes())?,
            headers: to_header_map(&headers),
            body,
        })
    }
}

impl Default for TransformOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

/// Substitute the parsed `:param`/`:param*` slots of `upstream_path`, in
/// encounter order, with `bound_values` taken positionally from matching
/// the consumer path against `endpoint.path` — upstream parameter naming is
/// intentionally decoupled from consumer parameter naming (spec §4.13).
fn substitute_upstream_path(upstream_path: &str, bound_values: &[String]) -> String {
    let segments = parse_pattern(upstream_path);
    let mut values = bound_values.iter();
    let parts: Vec<String> = segments
        .iter()
        .map(|seg| match seg {
            PathSegment::Literal(lit) => lit.clone(),
            PathSegment::Param(_) | PathSegment::CatchAll(_) => {
                values.next().cloned().unwrap_or_default()
            }
        })
        .collect();
    format!("/{}", parts.join("/"))
}

fn join_base_and_path(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = if path.starts_with('/') { path.to_string() } else { format!("/{path}") };
    format!("{base}{path}")
}

fn extract_host(url: &str) -> &str {
    let without_scheme = url.split("://").nth(1).unwrap_or(url);
    let end = without_scheme.find(['/', '?']).unwrap_or(without_scheme.len());
    &without_scheme[..end]
}

fn to_header_map(headers: &BTreeMap<String, String>) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (k, v) in headers {
        if let (Ok(name), Ok(value)) = (HeaderName::try_from(k.as_str()), HeaderValue::try_from(v.as_str())) {
            map.insert(name, value);
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_core::connector::{ConnectorStatus, Visibility};
    use gateway_core::endpoint::HttpMethod;
    use std::collections::HashMap;

    fn connector() -> Connector {
        Connector {
            id: "c1".into(),
            slug: "storj".into(),
            team_id: Some("t1".into()),
            owner_user_id: None,
            display_name: "Storj".into(),
            status: ConnectorStatus::Published,
            visibility: Visibility::Team,
            upstream_base_url: "https://gateway.storjshare.io/".into(),
            allowed_hosts: vec![],
            default_timeout_ms: 5000,
            health_check_path: None,
            auth_type: "none".into(),
            auth_config: HashMap::new(),
            secret_refs: vec![],
            response_wrapper: false,
            streaming_enabled: false,
            error_mapping: HashMap::new(),
        }
    }

    fn endpoint() -> Endpoint {
        Endpoint {
            id: "e1".into(),
            connector_id: "c1".into(),
            name: "get-object".into(),
            method: HttpMethod::Get,
            path: "/:bucket/:key*".into(),
            enabled: true,
            upstream_method: None,
            upstream_path: "/:b/:k*".into(),
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
    fn substitutes_positionally_regardless_of_param_names() {
        let path = substitute_upstream_path("/:b/:k*", &["my-bucket".to_string(), "docs/readme.md".to_string()]);
        assert_eq!(path, "/my-bucket/docs/readme.md");
    }

    #[test]
    fn builds_full_upstream_url_with_base_join_and_query_override() {
        let orchestrator = TransformOrchestrator::new();
        let mut ep = endpoint();
        ep.upstream_query_params = vec![("x-amz-acl".to_string(), "private".to_string())];
        let connector = connector();
        let headers = BTreeMap::new();
        let secrets = ResolvedSecrets::default();
        let input = OrchestratorInput {
            connector: &connector,
            endpoint: &ep,
            path_param_values: &["my-bucket".to_string(), "file.txt".to_string()],
            consumer_query: &[("x-amz-acl".to_string(), "public".to_string())],
            consumer_headers: &headers,
            consumer_body: None,
            consumer_body_raw: None,
            secrets: &secrets,
        };
        let upstream = orchestrator.build(&input).unwrap();
        assert!(upstream.url.starts_with("https://gateway.storjshare.io/my-bucket/file.txt?"));
        assert!(upstream.url.contains("x-amz-acl=private"));
        assert!(!upstream.url.contains("public"));
    }

    #[test]
    fn forwards_request_id_and_trace_id_headers() {
        let orchestrator = TransformOrchestrator::new();
        let ep = endpoint();
        let connector = connector();
        let mut headers = BTreeMap::new();
        headers.insert("x-request-id".to_string(), "req-1".to_string());
        let secrets = ResolvedSecrets::default();
        let input = OrchestratorInput {
            connector: &connector,
            endpoint: &ep,
            path_param_values: &["my-bucket".to_string(), "file.txt".to_string()],
            consumer_query: &[],
            consumer_headers: &headers,
            consumer_body: None,
            consumer_body_raw: None,
            secrets: &secrets,
        };
        let upstream = orchestrator.build(&input).unwrap();
        assert_eq!(upstream.headers.get("x-request-id").unwrap(), "req-1");
    }
}
