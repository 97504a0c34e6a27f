use crate::jsonpath;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Response headers that must never pass through from the upstream verbatim
/// (spec §4.7); gateway headers are applied after this strip so the
/// upstream can never spoof them.
const STRIPPED_HEADERS: &[&str] = &[
    "server",
    "x-powered-by",
    "x-aspnet-version",
    "x-aspnetmvc-version",
    "via",
    "set-cookie",
    "content-length",
    "transfer-encoding",
    "content-encoding",
    "etag",
    "last-modified",
];

pub struct UpstreamResponse<'a> {
    pub status: u16,
    pub content_type: Option<&'a str>,
    pub headers: &'a BTreeMap<String, String>,
    pub body: &'a [u8],
}

pub struct ResponseContext<'a> {
    pub connector_slug: &'a str,
    pub response_wrapper: bool,
    pub error_mapping: &'a std::collections::HashMap<u16, String>,
    pub response_body_transform: Option<&'a str>,
    pub upstream_latency_ms: u64,
    pub cached: bool,
    pub request_id: Option<&'a str>,
    pub trace_id: Option<&'a str>,
}

pub struct BuiltResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

pub trait ResponseStrategy: Send + Sync {
    fn build(&self, raw_name: &str, upstream: &UpstreamResponse, ctx: &ResponseContext) -> BuiltResponse;
}

fn base_headers(upstream: &UpstreamResponse, ctx: &ResponseContext) -> BTreeMap<String, String> {
    base_headers_from_map(upstream.headers, ctx)
}

fn base_headers_from_map(upstream_headers: &BTreeMap<String, String>, ctx: &ResponseContext) -> BTreeMap<String, String> {
    let mut headers: BTreeMap<String, String> = upstream_headers
        .iter()
        .filter(|(k, _)| !STRIPPED_HEADERS.contains(&k.to_ascii_lowercase().as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    headers.insert("x-gateway-latency".to_string(), ctx.upstream_latency_ms.to_string());
    headers.insert(
        "x-gateway-cache".to_string(),
        if ctx.cached { "HIT".to_string() } else { "MISS".to_string() },
    );
    if let Some(id) = ctx.request_id {
        headers.insert("x-request-id".to_string(), id.to_string());
    }
    if let Some(id) = ctx.trace_id {
        headers.insert("x-trace-id".to_string(), id.to_string());
    }
    headers
}

/// Header set for a response whose body is streamed through rather than
/// buffered (spec §4.14, §9): same strip/gateway-header treatment as the
/// buffered strategies, plus SSE headers when the upstream declared
/// `text/event-stream`. Exposed standalone because the streaming dispatch
/// path never materializes an `UpstreamResponse` (there is no body to put
/// in one).
pub fn streaming_headers(
    upstream_headers: &BTreeMap<String, String>,
    upstream_content_type: Option<&str>,
    ctx: &ResponseContext,
) -> BTreeMap<String, String> {
    let mut headers = base_headers_from_map(upstream_headers, ctx);
    if upstream_content_type.is_some_and(|ct| ct.contains("text/event-stream")) {
        headers.insert("content-type".to_string(), "text/event-stream".to_string());
        headers.insert("cache-control".to_string(), "no-cache".to_string());
        headers.insert("connection".to_string(), "keep-alive".to_string());
    }
    headers
}

struct Raw;
impl ResponseStrategy for Raw {
    fn build(&self, _raw_name: &str, upstream: &UpstreamResponse, ctx: &ResponseContext) -> BuiltResponse {
        BuiltResponse {
            status: upstream.status,
            headers: base_headers(upstream, ctx),
            body: upstream.body.to_vec(),
        }
    }
}

struct Streaming;
impl ResponseStrategy for Streaming {
    fn build(&self, _raw_name: &str, upstream: &UpstreamResponse, ctx: &ResponseContext) -> BuiltResponse {
        let mut headers = base_headers(upstream, ctx);
        headers.insert("content-type".to_string(), "text/event-stream".to_string());
        headers.insert("cache-control".to_string(), "no-cache".to_string());
        headers.insert("connection".to_string(), "keep-alive".to_string());
        BuiltResponse { status: upstream.status, headers, body: upstream.body.to_vec() }
    }
}

#[derive(Serialize)]
struct EnvelopeMeta<'a> {
    connector: &'a str,
    #[serde(rename = "upstreamStatus")]
    upstream_status: u16,
    #[serde(rename = "latencyMs")]
    latency_ms: u64,
    cached: bool,
    timestamp: String,
}

#[derive(Serialize)]
struct EnvelopeError<'a> {
    code: String,
    message: &'a str,
}

#[derive(Serialize)]
struct Envelope<'a> {
    success: bool,
    data: serde_json::Value,
    meta: EnvelopeMeta<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<EnvelopeError<'a>>,
}

struct EnvelopeStrategy;
impl ResponseStrategy for EnvelopeStrategy {
    fn build(&self, _raw_name: &str, upstream: &UpstreamResponse, ctx: &ResponseContext) -> BuiltResponse {
        let headers = base_headers(upstream, ctx);
        let is_json = upstream.content_type.map(|ct| ct.contains("json")).unwrap_or(false);
        if !is_json {
            return BuiltResponse { status: upstream.status, headers, body: upstream.body.to_vec() };
        }

        let ok = (200..300).contains(&upstream.status);
        let data = serde_json::from_slice::<serde_json::Value>(upstream.body)
            .unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(upstream.body).into_owned()));
        let mapped_message = ctx.error_mapping.get(&upstream.status);
        let error = if !ok {
            mapped_message.map(|message| EnvelopeError {
                code: format!("UPSTREAM_{}", upstream.status),
                message,
            })
        } else {
            None
        };

        let envelope = Envelope {
            success: ok,
            data,
            meta: EnvelopeMeta {
                connector: ctx.connector_slug,
                upstream_status: upstream.status,
                latency_ms: ctx.upstream_latency_ms,
                cached: ctx.cached,
                timestamp: chrono::Utc::now().to_rfc3339(),
            },
            error,
        };
        let body = serde_json::to_vec(&envelope).unwrap_or_default();
        BuiltResponse { status: upstream.status, headers, body }
    }
}

struct FieldMap;
impl ResponseStrategy for FieldMap {
    fn build(&self, raw_name: &str, upstream: &UpstreamResponse, ctx: &ResponseContext) -> BuiltResponse {
        let headers = base_headers(upstream, ctx);
        let spec = raw_name.strip_prefix("field-map:").unwrap_or("");
        if spec.is_empty() {
            return BuiltResponse { status: upstream.status, headers, body: upstream.body.to_vec() };
        }
        let Ok(parsed) = serde_json::from_slice::<serde_json::Value>(upstream.body) else {
            return BuiltResponse { status: upstream.status, headers, body: upstream.body.to_vec() };
        };

        let mut mapped = serde_json::Value::Object(serde_json::Map::new());
        for pair in spec.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let Some((src, dst)) = pair.split_once("->") else { continue };
            if let Some(value) = jsonpath::get(&parsed, src.trim()) {
                jsonpath::set(&mut mapped, dst.trim(), value.clone());
            }
        }
        BuiltResponse { status: upstream.status, headers, body: serde_json::to_vec(&mapped).unwrap_or_default() }
    }
}

/// Unknown response strategy names fall back to `raw` (spec §4.7).
pub fn resolve(name: &str) -> Arc<dyn ResponseStrategy> {
    if name.starts_with("field-map:") {
        return Arc::new(FieldMap);
    }
    match name {
        "envelope" => Arc::new(EnvelopeStrategy),
        "streaming" => Arc::new(Streaming),
        _ => Arc::new(Raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn ctx<'a>(error_mapping: &'a HashMap<u16, String>) -> ResponseContext<'a> {
        ResponseContext {
            connector_slug: "openai",
            response_wrapper: true,
            error_mapping,
            response_body_transform: None,
            upstream_latency_ms: 42,
            cached: false,
            request_id: Some("req-1"),
            trace_id: None,
        }
    }

    #[test]
    fn strips_unsafe_headers_and_adds_gateway_headers() {
        let mut headers = BTreeMap::new();
        headers.insert("Server".to_string(), "nginx".to_string());
        headers.insert("X-Custom".to_string(), "keep-me".to_string());
        let upstream = UpstreamResponse { status: 200, content_type: Some("text/plain"), headers: &headers, body: b"hi" };
        let error_mapping = HashMap::new();
        let built = resolve("raw").build("raw", &upstream, &ctx(&error_mapping));
        assert!(!built.headers.contains_key("Server"));
        assert_eq!(built.headers.get("X-Custom").unwrap(), "keep-me");
        assert_eq!(built.headers.get("x-gateway-cache").unwrap(), "MISS");
        assert_eq!(built.headers.get("x-request-id").unwrap(), "req-1");
    }

    #[test]
    fn envelope_wraps_json_success_body() {
        let headers = BTreeMap::new();
        let upstream = UpstreamResponse {
            status: 200,
            content_type: Some("application/json"),
            headers: &headers,
            body: br#"{"id":1}"#,
        };
        let error_mapping = HashMap::new();
        let built = resolve("envelope").build("envelope", &upstream, &ctx(&error_mapping));
        let value: serde_json::Value = serde_json::from_slice(&built.body).unwrap();
        assert_eq!(value["success"], true);
        assert_eq!(value["data"]["id"], 1);
        assert_eq!(value["meta"]["connector"], "openai");
        assert!(value.get("error").is_none());
    }

    #[test]
    fn envelope_includes_mapped_error_on_failure_status() {
        let headers = BTreeMap::new();
        let upstream = UpstreamResponse {
            status: 404,
            content_type: Some("application/json"),
            headers: &headers,
            body: br#"{"msg":"nope"}"#,
        };
        let mut error_mapping = HashMap::new();
        error_mapping.insert(404, "resource not found".to_string());
        let built = resolve("envelope").build("envelope", &upstream, &ctx(&error_mapping));
        let value: serde_json::Value = serde_json::from_slice(&built.body).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["error"]["code"], "UPSTREAM_404");
        assert_eq!(value["error"]["message"], "resource not found");
    }

    #[test]
    fn field_map_renames_fields_per_spec() {
        let headers = BTreeMap::new();
        let upstream = UpstreamResponse {
            status: 200,
            content_type: Some("application/json"),
            headers: &headers,
            body: br#"{"choices":[{"text":"hello"}]}"#,
        };
        let error_mapping = HashMap::new();
        let built = resolve("field-map:choices.0.text->answer").build("field-map:choices.0.text->answer", &upstream, &ctx(&error_mapping));
        let value: serde_json::Value = serde_json::from_slice(&built.body).unwrap();
        assert_eq!(value["answer"], "hello");
    }

    #[test]
    fn streaming_headers_set_sse_headers_for_event_stream_content_type() {
        let mut headers = BTreeMap::new();
        headers.insert("Server".to_string(), "nginx".to_string());
        let error_mapping = HashMap::new();
        let built = streaming_headers(&headers, Some("text/event-stream"), &ctx(&error_mapping));
        assert!(!built.contains_key("Server"));
        assert_eq!(built.get("content-type").unwrap(), "text/event-stream");
        assert_eq!(built.get("connection").unwrap(), "keep-alive");
    }

    #[test]
    fn streaming_headers_omit_sse_headers_for_other_content_types() {
        let headers = BTreeMap::new();
        let error_mapping = HashMap::new();
        let built = streaming_headers(&headers, Some("application/json"), &ctx(&error_mapping));
        assert!(!built.contains_key("content-type"));
    }

    #[test]
    fn unknown_name_falls_back_to_raw() {
        let headers = BTreeMap::new();
        let upstream = UpstreamResponse { status: 200, content_type: None, headers: &headers, body: b"raw-body" };
        let error_mapping = HashMap::new();
        let built = resolve("mystery").build("mystery", &upstream, &ctx(&error_mapping));
        assert_eq!(built.body, b"raw-body");
    }
}
