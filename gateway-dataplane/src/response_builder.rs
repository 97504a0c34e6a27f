//! Response builder (C15, spec §4.15). Picks the response strategy from
//! the resolved config and upstream content type, then delegates to C7.

use gateway_core::connector::Connector;
use gateway_core::endpoint::Endpoint;
use gateway_strategy::registry::StrategyRegistry;
use gateway_strategy::response::{BuiltResponse, ResponseContext, UpstreamResponse};
use std::collections::BTreeMap;

pub struct ResponseBuilder {
    registry: StrategyRegistry,
}

impl ResponseBuilder {
    pub fn new() -> Self {
        Self { registry: StrategyRegistry::default() }
    }

    pub fn build(
        &self,
        connector: &Connector,
        endpoint: &Endpoint,
        upstream: &UpstreamResponse,
        upstream_latency_ms: u64,
        cached: bool,
        request_id: Option<&str>,
        trace_id: Option<&str>,
    ) -> BuiltResponse {
        let mode = resolve_mode(connector, endpoint, upstream.content_type);
        let ctx = ResponseContext {
            connector_slug: &connector.slug,
            response_wrapper: connector.response_wrapper,
            error_mapping: &connector.error_mapping,
            response_body_transform: endpoint.response_body_transform.as_deref(),
            upstream_latency_ms,
            cached,
            request_id,
            trace_id,
        };
        self.registry.response(&mode).build(&mode, upstream, &ctx)
    }

    /// Header set for a dispatch whose body is streamed through rather than
    /// buffered (spec §4.14, §9): no `UpstreamResponse` exists to build from
    /// since the body is never materialized.
    #[allow(clippy::too_many_arguments)]
    pub fn build_streaming_headers(
        &self,
        connector: &Connector,
        upstream_headers: &BTreeMap<String, String>,
        upstream_content_type: Option<&str>,
        upstream_latency_ms: u64,
        request_id: Option<&str>,
        trace_id: Option<&str>,
    ) -> BTreeMap<String, String> {
        let ctx = ResponseContext {
            connector_slug: &connector.slug,
            response_wrapper: connector.response_wrapper,
            error_mapping: &connector.error_mapping,
            response_body_transform: None,
            upstream_latency_ms,
            cached: false,
            request_id,
            trace_id,
        };
        gateway_strategy::response::streaming_headers(upstream_headers, upstream_content_type, &ctx)
    }
}

impl Default for ResponseBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn resolve_mode(connector: &Connector, endpoint: &Endpoint, content_type: Option<&str>) -> String {
    if connector.streaming_enabled && content_type.is_some_and(|ct| ct.contains("text/event-stream")) {
        return "streaming".to_string();
    }
    if let Some(transform) = &endpoint.response_body_transform {
        if transform.starts_with("field-map") {
            return transform.clone();
        }
    }
    if connector.response_wrapper {
        return "envelope".to_string();
    }
    "raw".to_string()
}
