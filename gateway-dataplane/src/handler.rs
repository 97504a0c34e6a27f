//! Dataplane handler (C17, spec §4.17): the strictly sequential per-request
//! pipeline that wires every other component together.

use crate::access::AccessVerifier;
use crate::authenticator::Authenticator;
use crate::orchestrator::{OrchestratorInput, TransformOrchestrator};
use crate::proxy::{ByteStream, Proxy, ProxyOutcome};
use crate::response_builder::ResponseBuilder;
use crate::validator::Validator;
use bytes::Bytes;
use futures::Stream;
use gateway_core::endpoint::{match_pattern, parse_pattern};
use gateway_core::error::GatewayError;
use gateway_core::model::{CacheEntry, CallerType, UsageRecord};
use gateway_core::scope::{Scope, ScopeFilter};
use gateway_observability::usage_sink::UsageSink;
use gateway_strategy::response::{BuiltResponse, UpstreamResponse};
use gateway_store::{ConfigResolver, QuotaCounter, RateLimiter, ResponseCache, SecretResolver};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

/// Everything one inbound request carries into the pipeline. Constructed
/// by the server layer from the raw HTTP request.
pub struct RequestContext {
    pub method: String,
    pub path: String,
    pub headers: BTreeMap<String, String>,
    pub query: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub client_ip: Option<Ipv4Addr>,
    pub request_id: Option<String>,
    pub trace_id: Option<String>,
}

impl RequestContext {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// The dataplane's response to one request: either a fully buffered body
/// or a live byte stream whose usage accounting completes asynchronously
/// once the body has drained (spec §4.14, §9).
pub enum HandlerResponse {
    Built(BuiltResponse),
    Streaming(StreamingHandlerResponse),
}

pub struct StreamingHandlerResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: ByteStream,
}

/// Internal counterpart to `HandlerResponse`: the streaming variant still
/// carries the not-yet-emitted usage accounting responsibility, whereas
/// the built variant carries a finished `UsageRecord` ready to record.
enum HandlerOutcome {
    Built { response: BuiltResponse, usage: UsageRecord },
    Streaming { response: StreamingHandlerResponse },
}

/// Progressively filled in as the pipeline learns more about the caller
/// and the resolved config, so that any early-return error path can still
/// emit a best-effort `UsageRecord` using whatever was learned before the
/// failure (spec §3, §4.17: a record is produced for every completed
/// request, success or error).
#[derive(Default)]
struct UsageAccumulator {
    scope_id: Option<String>,
    connector_id: Option<String>,
    endpoint_name: Option<String>,
    api_key_id: Option<String>,
    caller_type: Option<CallerType>,
    caller_id: Option<String>,
}

impl UsageAccumulator {
    #[allow(clippy::too_many_arguments)]
    fn into_record(
        self,
        method: String,
        path: String,
        status: u16,
        upstream_latency_ms: u64,
        request_bytes: u64,
        response_bytes: u64,
        cached: bool,
        error: Option<String>,
        latency_ms: u64,
    ) -> UsageRecord {
        UsageRecord {
            scope_id: self.scope_id.unwrap_or_default(),
            connector_id: self.connector_id.unwrap_or_default(),
            endpoint_name: self.endpoint_name.unwrap_or_default(),
            api_key_id: self.api_key_id,
            caller_type: self.caller_type.unwrap_or(CallerType::Unknown),
            caller_id: self.caller_id.unwrap_or_else(|| "anonymous".to_string()),
            method,
            path,
            status_code: status,
            latency_ms,
            upstream_latency_ms,
            request_bytes,
            response_bytes,
            cached,
            error,
            region: None,
            timestamp: chrono::Utc::now(),
        }
    }
}

/// Wraps a proxied byte stream to count bytes as they flow through, and
/// fires a completion callback once the stream is exhausted. Used to emit
/// the deferred `UsageRecord` for streaming responses, since the total
/// response size is only known once the body has fully passed through
/// (spec §4.14, §9: the body must never be buffered to measure it).
struct UsageCountingStream<S> {
    inner: S,
    total: u64,
    on_complete: Option<Box<dyn FnOnce(u64) + Send>>,
}

impl<S> UsageCountingStream<S> {
    fn new(inner: S, on_complete: impl FnOnce(u64) + Send + 'static) -> Self {
        Self { inner, total: 0, on_complete: Some(Box::new(on_complete)) }
    }
}

impl<S> Stream for UsageCountingStream<S>
where
    S: Stream<Item = std::io::Result<Bytes>> + Unpin,
{
    type Item = std::io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.total += chunk.len() as u64;
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(err))) => Poll::Ready(Some(Err(err))),
            Poll::Ready(None) => {
                if let Some(cb) = this.on_complete.take() {
                    cb(this.total);
                }
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

pub struct DataplaneHandler {
    authenticator: Authenticator,
    access: AccessVerifier,
    config_resolver: ConfigResolver,
    response_cache: ResponseCache,
    rate_limiter: RateLimiter,
    quota: QuotaCounter,
    secrets: SecretResolver,
    orchestrator: TransformOrchestrator,
    proxy: Proxy,
    response_builder: ResponseBuilder,
    usage_sink: Arc<UsageSink>,
}

impl DataplaneHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        authenticator: Authenticator,
        access: AccessVerifier,
        config_resolver: ConfigResolver,
        response_cache: ResponseCache,
        rate_limiter: RateLimiter,
        quota: QuotaCounter,
        secrets: SecretResolver,
        orchestrator: TransformOrchestrator,
        proxy: Proxy,
        response_builder: ResponseBuilder,
        usage_sink: Arc<UsageSink>,
    ) -> Self {
        Self {
            authenticator,
            access,
            config_resolver,
            response_cache,
            rate_limiter,
            quota,
            secrets,
            orchestrator,
            proxy,
            response_builder,
            usage_sink,
        }
    }

    pub async fn handle(&self, slug: &str, ctx: RequestContext) -> Result<HandlerResponse, GatewayError> {
        let started = Instant::now();
        let mut usage = UsageAccumulator::default();

        match self.handle_inner(slug, &ctx, &mut usage, started).await {
            Ok(HandlerOutcome::Built { response, usage }) => {
                self.usage_sink.record(usage).await;
                Ok(HandlerResponse::Built(response))
            }
            Ok(HandlerOutcome::Streaming { response }) => Ok(HandlerResponse::Streaming(response)),
            Err(err) => {
                tracing::warn!(slug, method = %ctx.method, path = %ctx.path, error = %err, "request failed");
                let record = usage.into_record(
                    ctx.method.clone(),
                    ctx.path.clone(),
                    err.status_code().as_u16(),
                    0,
                    ctx.body.len() as u64,
                    0,
                    false,
                    Some(err.code().to_string()),
                    started.elapsed().as_millis() as u64,
                );
                self.usage_sink.record(record).await;
                Err(err)
            }
        }
    }

    async fn handle_inner(
        &self,
        slug: &str,
        ctx: &RequestContext,
        usage: &mut UsageAccumulator,
        started: Instant,
    ) -> Result<HandlerOutcome, GatewayError> {
        let auth = self
            .authenticator
            .authenticate(ctx.header("authorization"), ctx.header("x-team-id"))
            .await
            .map_err(|e| GatewayError::Internal(e.to_string()))?;
        let mut auth = auth.ok_or(GatewayError::Unauthenticated)?;

        usage.scope_id = Some(auth.scope_id.clone());
        usage.caller_type = Some(auth.caller_type);
        usage.caller_id = Some(auth.caller_id.clone());
        usage.api_key_id = auth.api_key_id.clone();

        let (resolved, public_fallback) = self.resolve_with_public_fallback(slug, &auth, ctx).await?;
        let connector = resolved.connector;
        let endpoint = resolved.endpoint;
        usage.connector_id = Some(connector.id.clone());
        usage.endpoint_name = Some(endpoint.name.clone());

        if !public_fallback {
            let allowed = self
                .access
                .verify(&mut auth, &connector)
                .await
                .map_err(|e| GatewayError::Internal(e.to_string()))?;
            if !allowed {
                return Err(GatewayError::Forbidden(connector.slug.clone()));
            }
        }

        if let Some(allowed_endpoints) = &auth.allowed_endpoints {
            if !allowed_endpoints.iter().any(|name| name == &endpoint.name) {
                return Err(GatewayError::Forbidden(endpoint.name.clone()));
            }
        }
        if let Some(allowed_ips) = &auth.allowed_ips {
            let ip_ok = ctx
                .client_ip
                .map(|ip| gateway_core::host::match_ip_allowlist(ip, allowed_ips))
                .unwrap_or(false);
            if !ip_ok {
                return Err(GatewayError::Forbidden("client IP not allowlisted".to_string()));
            }
        }

        let max_size = endpoint.max_request_size.or(auth.max_request_size);
        if let Some(max_size) = max_size {
            if ctx.body.len() as u64 > max_size {
                return Err(GatewayError::RequestTooLarge);
            }
        }

        let consumer_key = gateway_store::rate_limit::consumer_key(auth.api_key_id.as_deref(), &auth.caller_id);
        let rate_limit = endpoint.rate_limit.or(auth.rate_limit);
        if let Some(limit) = rate_limit {
            let decision = self
                .rate_limiter
                .consume(limit, &consumer_key)
                .await
                .map_err(|e| GatewayError::Internal(e.to_string()))?;
            if !decision.allowed {
                return Err(GatewayError::RateLimited { retry_after_s: decision.retry_after_s });
            }
        }
        if !self
            .quota
            .check_daily(&auth.scope_id, &consumer_key, auth.daily_quota)
            .await
            .map_err(|e| GatewayError::Internal(e.to_string()))?
        {
            return Err(GatewayError::QuotaExceeded { retry_after_s: seconds_until_midnight_utc() });
        }
        if !self
            .quota
            .check_monthly(&auth.scope_id, &consumer_key, auth.monthly_quota)
            .await
            .map_err(|e| GatewayError::Internal(e.to_string()))?
        {
            return Err(GatewayError::QuotaExceeded { retry_after_s: seconds_until_midnight_utc() });
        }

        Validator::validate(&endpoint, &ctx.headers, &ctx.body)?;

        let scope_token = if public_fallback { "public".to_string() } else { auth.scope_id.clone() };
        let cache_eligible = ctx.method.eq_ignore_ascii_case("GET") && endpoint.cache_ttl_s.is_some_and(|ttl| ttl > 0);
        let cache_key = ResponseCache::build_key(&scope_token, &connector.slug, &ctx.method, &ctx.path, None);

        if cache_eligible {
            if let Some(entry) = self.response_cache.get(&cache_key) {
                let headers: BTreeMap<String, String> = entry.headers.clone().into_iter().collect();
                let content_type = headers.get("content-type").map(String::as_str);
                let upstream = UpstreamResponse { status: entry.status, content_type, headers: &headers, body: &entry.body };
                let built = self.response_builder.build(
                    &connector,
                    &endpoint,
                    &upstream,
                    0,
                    true,
                    ctx.request_id.as_deref(),
                    ctx.trace_id.as_deref(),
                );
                let response_bytes = built.body.len() as u64;
                let taken = std::mem::take(usage);
                let usage_record = taken.into_record(
                    ctx.method.clone(),
                    ctx.path.clone(),
                    entry.status,
                    0,
                    ctx.body.len() as u64,
                    response_bytes,
                    true,
                    None,
                    started.elapsed().as_millis() as u64,
                );
                return Ok(HandlerOutcome::Built { response: built, usage: usage_record });
            }
        }

        let secrets = self.secrets.resolve_all(&scope_token, &connector.slug, &connector.secret_refs).await;

        let path_param_values = path_params(&endpoint.path, &ctx.path);
        let consumer_body = std::str::from_utf8(&ctx.body).ok();
        let orchestrator_input = OrchestratorInput {
            connector: &connector,
            endpoint: &endpoint,
            path_param_values: &path_param_values,
            consumer_query: &ctx.query,
            consumer_headers: &ctx.headers,
            consumer_body,
            consumer_body_raw: Some(&ctx.body),
            secrets: &secrets,
        };
        let upstream_request = self
            .orchestrator
            .build(&orchestrator_input)
            .map_err(|e| GatewayError::Internal(e.to_string()))?;

        let timeout_ms = endpoint.timeout_ms.unwrap_or(connector.default_timeout_ms);
        let retries = endpoint.effective_retries();
        let streaming = connector.streaming_enabled;
        let proxy_outcome = self
            .proxy
            .dispatch(upstream_request, timeout_ms, retries, &connector.allowed_hosts, &connector.slug, streaming)
            .await?;

        match proxy_outcome {
            ProxyOutcome::Buffered(proxy_result) => {
                let response_headers: BTreeMap<String, String> = proxy_result
                    .headers
                    .iter()
                    .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
                    .collect();
                let content_type = response_headers.get("content-type").cloned();
                let upstream = UpstreamResponse {
                    status: proxy_result.status.as_u16(),
                    content_type: content_type.as_deref(),
                    headers: &response_headers,
                    body: &proxy_result.body,
                };
                let built = self.response_builder.build(
                    &connector,
                    &endpoint,
                    &upstream,
                    proxy_result.upstream_latency_ms,
                    false,
                    ctx.request_id.as_deref(),
                    ctx.trace_id.as_deref(),
                );

                if cache_eligible && (200..300).contains(&built.status) {
                    if let Some(ttl) = endpoint.cache_ttl_s {
                        self.response_cache.set(
                            cache_key,
                            CacheEntry {
                                body: built.body.clone(),
                                status: built.status,
                                headers: built.headers.clone().into_iter().collect(),
                                expires_at: chrono::Utc::now() + chrono::Duration::seconds(ttl as i64),
                                inserted_at: Instant::now(),
                            },
                        );
                    }
                }

                let response_bytes = built.body.len() as u64;
                let taken = std::mem::take(usage);
                let usage_record = taken.into_record(
                    ctx.method.clone(),
                    ctx.path.clone(),
                    built.status,
                    proxy_result.upstream_latency_ms,
                    ctx.body.len() as u64,
                    response_bytes,
                    false,
                    None,
                    started.elapsed().as_millis() as u64,
                );

                Ok(HandlerOutcome::Built { response: built, usage: usage_record })
            }
            ProxyOutcome::Streaming(streaming_result) => {
                let response_headers: BTreeMap<String, String> = streaming_result
                    .headers
                    .iter()
                    .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
                    .collect();
                let content_type = response_headers.get("content-type").cloned();
                let headers = self.response_builder.build_streaming_headers(
                    &connector,
                    &response_headers,
                    content_type.as_deref(),
                    streaming_result.upstream_latency_ms,
                    ctx.request_id.as_deref(),
                    ctx.trace_id.as_deref(),
                );
                let status = streaming_result.status.as_u16();

                let usage_sink = self.usage_sink.clone();
                let method = ctx.method.clone();
                let path = ctx.path.clone();
                let request_bytes = ctx.body.len() as u64;
                let upstream_latency_ms = streaming_result.upstream_latency_ms;
                let taken = std::mem::take(usage);

                let body = UsageCountingStream::new(streaming_result.body, move |response_bytes| {
                    let record = taken.into_record(
                        method,
                        path,
                        status,
                        upstream_latency_ms,
                        request_bytes,
                        response_bytes,
                        false,
                        None,
                        started.elapsed().as_millis() as u64,
                    );
                    tokio::spawn(async move { usage_sink.record(record).await });
                });

                Ok(HandlerOutcome::Streaming {
                    response: StreamingHandlerResponse { status, headers, body: Box::pin(body) },
                })
            }
        }
    }

    async fn resolve_with_public_fallback(
        &self,
        slug: &str,
        auth: &gateway_core::model::AuthResult,
        ctx: &RequestContext,
    ) -> Result<(gateway_core::model::ResolvedConfig, bool), GatewayError> {
        let scope = Scope::parse(&auth.scope_id);
        let filter = scope.filter(slug);
        if let Some(resolved) = self
            .config_resolver
            .resolve(&auth.scope_id, &filter, &ctx.method, &ctx.path)
            .await
            .map_err(|e| GatewayError::Internal(e.to_string()))?
        {
            return Ok((resolved, false));
        }

        let public_filter = ScopeFilter { slug: slug.to_string(), team_id: None, owner_user_id: None };
        match self
            .config_resolver
            .resolve("public", &public_filter, &ctx.method, &ctx.path)
            .await
            .map_err(|e| GatewayError::Internal(e.to_string()))?
        {
            Some(resolved) => Ok((resolved, true)),
            None => Err(GatewayError::ConfigNotFound),
        }
    }
}

/// Bind the consumer path's `:param`/`:param*` values against the
/// endpoint's own (consumer-facing) path pattern, in encounter order.
fn path_params(endpoint_path: &str, request_path: &str) -> Vec<String> {
    let segments = parse_pattern(endpoint_path);
    match_pattern(&segments, request_path)
        .map(|pairs| pairs.into_iter().map(|(_, value)| value).collect())
        .unwrap_or_default()
}

fn seconds_until_midnight_utc() -> u64 {
    let now = chrono::Utc::now();
    let tomorrow = (now + chrono::Duration::days(1)).date_naive().and_hms_opt(0, 0, 0).unwrap();
    (tomorrow.and_utc() - now).num_seconds().max(0) as u64
}
