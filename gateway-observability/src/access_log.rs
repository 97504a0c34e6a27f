//! Structured per-request completion log (ambient stack, SPEC_FULL.md
//! §10.3). Emitted at `info` via `tracing`; secret values and raw API keys
//! must never appear here, only key IDs/hashes.

use serde::Serialize;
use tracing::info;

#[derive(Debug, Serialize)]
pub struct AccessLogEntry {
    pub connector_slug: String,
    pub method: String,
    pub path: String,
    pub status: u16,
    pub latency_ms: u64,
    pub cached: bool,
    pub api_key_id: Option<String>,
}

impl AccessLogEntry {
    pub fn emit(&self) {
        info!(
            connector_slug = %self.connector_slug,
            method = %self.method,
            path = %self.path,
            status = self.status,
            latency_ms = self.latency_ms,
            cached = self.cached,
            api_key_id = ?self.api_key_id,
            "request completed"
        );
    }
}
