//! Service gateway binary: HTTP dataplane, metrics endpoint, and
//! standalone-mode startup wiring (SPEC_FULL.md §10).

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

mod seed;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use clap::Parser;
use gateway_core::config::GatewayConfig;
use gateway_core::error::GatewayError;
use gateway_dataplane::access::AccessVerifier;
use gateway_dataplane::authenticator::Authenticator;
use gateway_dataplane::breaker::CircuitBreaker;
use gateway_dataplane::handler::{DataplaneHandler, HandlerResponse, RequestContext, StreamingHandlerResponse};
use gateway_dataplane::orchestrator::TransformOrchestrator;
use gateway_dataplane::proxy::Proxy;
use gateway_dataplane::response_builder::ResponseBuilder;
use gateway_observability::metrics::MetricsCollector;
use gateway_observability::usage_sink::{SinkMode, UsageSink};
use gateway_store::{ConfigResolver, QuotaCounter, RateLimiter, ResponseCache, SecretResolver};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "gateway-server", version, about = "Multi-tenant service gateway")]
struct Cli {
    /// Path to a YAML config file. Falls back to `gateway.yaml`,
    /// `/etc/gateway/gateway.yaml`, `config/gateway.yaml`, then built-in
    /// defaults, in that order.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Optional JSON file seeding connectors/endpoints/api keys for
    /// standalone/dev mode.
    #[arg(long)]
    seed: Option<PathBuf>,
}

struct AppState {
    handler: Arc<DataplaneHandler>,
    metrics: Arc<MetricsCollector>,
}

fn decode_hex(hex: &str) -> anyhow::Result<Vec<u8>> {
    if hex.len() % 2 != 0 {
        anyhow::bail!("hex string has odd length");
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|e| anyhow::anyhow!(e)))
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.as_ref().map(|p| p.to_string_lossy().into_owned());
    let config = GatewayConfig::load(config_path.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.observability.log_level)),
        )
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), node_id = %config.node_id, "gateway starting");

    let repos = match &cli.seed {
        Some(path) => {
            info!(path = %path.display(), "loading seed data");
            seed::SeedRepos::from_seed(seed::SeedFile::load(path)?)
        }
        None => seed::SeedRepos::empty(),
    };

    let etcd = etcd_client::Client::connect(&config.rate_limit.etcd_endpoints, None).await?;

    let key_bytes = decode_hex(&config.secrets.encryption_key_hex)?;
    let secrets = SecretResolver::new(repos.secrets.clone(), &key_bytes);
    let config_resolver = ConfigResolver::new(repos.connectors.clone(), repos.endpoints.clone());
    let response_cache = ResponseCache::new(config.cache.capacity);
    let rate_limiter = RateLimiter::new(etcd.clone(), config.rate_limit.max_limiters);
    let quota = QuotaCounter::new(etcd.clone(), repos.usage.clone());
    let authenticator = Authenticator::new(repos.api_keys.clone(), repos.sessions.clone());
    let access = AccessVerifier::new(repos.team_memberships.clone());
    let orchestrator = TransformOrchestrator::new();
    let proxy = Proxy::new(reqwest::Client::new(), Arc::new(CircuitBreaker::new()));
    let response_builder = ResponseBuilder::new();
    let sink_mode = if config.usage.short_lived { SinkMode::ShortLived } else { SinkMode::LongLived };
    let usage_sink = UsageSink::new(repos.usage.clone(), sink_mode);

    let handler = Arc::new(DataplaneHandler::new(
        authenticator, access, config_resolver, response_cache, rate_limiter, quota,
        secrets, orchestrator, proxy, response_builder, usage_sink.clone(),
    ));
    let metrics = Arc::new(MetricsCollector::new()?);

    let state = Arc::new(AppState { handler, metrics: metrics.clone() });

    let app = Router::new()
        .route("/api/v1/gw/{slug}", any(proxy_handler_no_path))
        .route("/api/v1/gw/{slug}/{*rest}", any(proxy_handler))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state);

    let http_addr = config.server.http_addr;
    let listener = tokio::net::TcpListener::bind(http_addr).await?;
    info!(addr = %http_addr, "dataplane listening");

    let dataplane_server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());

    if config.observability.prometheus.enabled {
        let metrics_addr = config.observability.prometheus.addr;
        let metrics_app = Router::new().route("/metrics", any(metrics_handler)).with_state(metrics);
        let metrics_listener = tokio::net::TcpListener::bind(metrics_addr).await?;
        info!(addr = %metrics_addr, "metrics listening");
        tokio::spawn(async move {
            if let Err(err) = axum::serve(metrics_listener, metrics_app).await {
                tracing::error!(error = %err, "metrics server failed");
            }
        });
    }

    dataplane_server.await?;

    info!("shutting down, flushing pending usage records");
    usage_sink.shutdown().await;
    info!("gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

async fn metrics_handler(State(metrics): State<Arc<MetricsCollector>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        metrics.gather_text(),
    )
}

async fn proxy_handler_no_path(
    state: State<Arc<AppState>>,
    Path(slug): Path<String>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    dispatch(state, slug, String::new(), method, uri, headers, body).await
}

async fn proxy_handler(
    state: State<Arc<AppState>>,
    Path((slug, rest)): Path<(String, String)>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    dispatch(state, slug, rest, method, uri, headers, body).await
}

async fn dispatch(
    State(state): State<Arc<AppState>>,
    slug: String,
    rest: String,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let started = std::time::Instant::now();
    let path = if rest.is_empty() { "/".to_string() } else { format!("/{rest}") };

    let header_map: BTreeMap<String, String> = headers
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_lowercase(), v.to_string())))
        .collect();
    let query = parse_query(uri.query().unwrap_or(""));
    let client_ip = header_map.get("x-forwarded-for").and_then(|v| v.split(',').next()).and_then(|v| v.trim().parse::<Ipv4Addr>().ok());
    let request_id = header_map.get("x-request-id").cloned();
    let trace_id = header_map.get("x-trace-id").cloned();

    let ctx = RequestContext {
        method: method.to_string(),
        path,
        headers: header_map,
        query,
        body: body.to_vec(),
        client_ip,
        request_id,
        trace_id,
    };

    let method_str = method.to_string();
    let result = state.handler.handle(&slug, ctx).await;
    let elapsed = started.elapsed().as_secs_f64();

    match result {
        Ok(HandlerResponse::Built(built)) => {
            state.metrics.record_request(&slug, &method_str, built.status, elapsed);
            built_response_to_axum(built)
        }
        Ok(HandlerResponse::Streaming(streaming)) => {
            state.metrics.record_request(&slug, &method_str, streaming.status, elapsed);
            streaming_response_to_axum(streaming)
        }
        Err(err) => {
            state.metrics.record_request(&slug, &method_str, err.status_code().as_u16(), elapsed);
            error_to_axum(err)
        }
    }
}

fn parse_query(raw: &str) -> Vec<(String, String)> {
    if raw.is_empty() {
        return Vec::new();
    }
    raw.split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (percent_decode(k), percent_decode(v)),
            None => (percent_decode(pair), String::new()),
        })
        .collect()
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                if let Ok(byte) = u8::from_str_radix(std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap_or(""), 16) {
                    out.push(byte);
                    i += 3;
                } else {
                    out.push(bytes[i]);
                    i += 1;
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn built_response_to_axum(built: gateway_strategy::response::BuiltResponse) -> Response {
    let status = StatusCode::from_u16(built.status).unwrap_or(StatusCode::OK);
    let mut response = Response::builder().status(status);
    for (name, value) in &built.headers {
        response = response.header(name, value);
    }
    response.body(axum::body::Body::from(built.body)).unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn streaming_response_to_axum(streaming: StreamingHandlerResponse) -> Response {
    let status = StatusCode::from_u16(streaming.status).unwrap_or(StatusCode::OK);
    let mut response = Response::builder().status(status);
    for (name, value) in &streaming.headers {
        response = response.header(name, value);
    }
    response
        .body(axum::body::Body::from_stream(streaming.body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn error_to_axum(err: GatewayError) -> Response {
    let status = err.status_code();
    let envelope = err.to_envelope();
    let mut response = (status, axum::Json(envelope)).into_response();
    if let Some(retry_after) = err.retry_after_s() {
        response.headers_mut().insert("retry-after", retry_after.to_string().parse().unwrap());
    }
    response
}
