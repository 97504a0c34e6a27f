use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl HttpMethod {
    pub fn matches(&self, method: &str) -> bool {
        self.as_str().eq_ignore_ascii_case(method)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BodyTransformKind {
    Passthrough,
    Static,
    Template,
    Binary,
    FormEncode,
}

/// A specific route within a connector with its own transforms and policies
/// (spec §3, §4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: String,
    pub connector_id: String,
    pub name: String,
    pub method: HttpMethod,
    /// Pattern with `:param` and `:param*` segments.
    pub path: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub upstream_method: Option<HttpMethod>,
    pub upstream_path: String,
    pub upstream_content_type: Option<String>,
    #[serde(default)]
    pub upstream_query_params: Vec<(String, String)>,
    pub upstream_static_body: Option<String>,
    /// `passthrough|static|template|extract:<dotPath>|binary|form-encode`
    pub body_transform: String,
    #[serde(default)]
    pub header_mapping: HashMap<String, String>,
    pub rate_limit: Option<u32>,
    pub timeout_ms: Option<u64>,
    pub max_request_size: Option<u64>,
    pub max_response_size: Option<u64>,
    pub cache_ttl_s: Option<u64>,
    #[serde(default)]
    pub retries: u32,
    pub body_pattern: Option<String>,
    #[serde(default)]
    pub body_blacklist: Vec<String>,
    pub body_schema: Option<serde_json::Value>,
    #[serde(default)]
    pub required_headers: Vec<String>,
    /// `none|field-map:<spec>`
    pub response_body_transform: Option<String>,
}

fn default_enabled() -> bool {
    true
}

impl Endpoint {
    /// `retries` must be `<= 5` per spec §3.
    pub fn effective_retries(&self) -> u32 {
        self.retries.min(5)
    }
}

/// One segment of a compiled path pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Literal(String),
    Param(String),
    CatchAll(String),
}

/// Parse a pattern like `/:bucket/:key*` into segments. Leading/trailing
/// slashes are ignored; an empty pattern yields no segments.
pub fn parse_pattern(pattern: &str) -> Vec<PathSegment> {
    pattern
        .trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|seg| {
            if let Some(name) = seg.strip_prefix(':') {
                if let Some(name) = name.strip_suffix('*') {
                    PathSegment::CatchAll(name.to_string())
                } else {
                    PathSegment::Param(name.to_string())
                }
            } else {
                PathSegment::Literal(seg.to_string())
            }
        })
        .collect()
}

fn split_path(path: &str) -> Vec<&str> {
    path.trim_matches('/').split('/').filter(|s| !s.is_empty()).collect()
}

/// Attempt to match `path` against a compiled pattern, returning the bound
/// path params by name on success (spec §4.8 path pattern language).
pub fn match_pattern(segments: &[PathSegment], path: &str) -> Option<Vec<(String, String)>> {
    let parts = split_path(path);
    let mut params = Vec::new();
    let mut pi = 0usize;

    for (si, seg) in segments.iter().enumerate() {
        match seg {
            PathSegment::Literal(lit) => {
                if parts.get(pi) != Some(&lit.as_str()) {
                    return None;
                }
                pi += 1;
            }
            PathSegment::Param(name) => {
                let part = parts.get(pi)?;
                if part.is_empty() {
                    return None;
                }
                params.push((name.clone(), part.to_string()));
                pi += 1;
            }
            PathSegment::CatchAll(name) => {
                // Catch-all must be the final segment and requires >= 1 trailing part.
                debug_assert_eq!(si, segments.len() - 1);
                if pi >= parts.len() {
                    return None;
                }
                let rest = parts[pi..].join("/");
                params.push((name.clone(), rest));
                pi = parts.len();
            }
        }
    }

    if pi == parts.len() {
        Some(params)
    } else {
        None
    }
}

/// Specificity score for ordering candidate endpoints before matching:
/// concrete segments outrank `:param`, which outranks `:param*` (spec §4.8).
/// Higher is more specific. Compared lexicographically segment-by-segment,
/// then by segment count (more segments = more specific) as a tie-break.
pub fn specificity(segments: &[PathSegment]) -> Vec<u8> {
    let mut score: Vec<u8> = segments
        .iter()
        .map(|s| match s {
            PathSegment::Literal(_) => 2,
            PathSegment::Param(_) => 1,
            PathSegment::CatchAll(_) => 0,
        })
        .collect();
    // Longer concrete prefixes should win on a tie of kinds; encode length
    // as a final, lowest-priority tie-breaker so it never overrides a kind
    // mismatch earlier in the path.
    score.push(segments.len() as u8);
    score
}
