use crate::jsonpath;
use gateway_core::percent::flatten_json_to_form_fields;
use std::sync::Arc;

/// Inputs common to every body strategy (spec §4.7).
pub struct BodyInput<'a> {
    pub consumer_body: Option<&'a str>,
    pub consumer_body_raw: Option<&'a [u8]>,
    pub upstream_static_body: Option<&'a str>,
}

pub trait BodyStrategy: Send + Sync {
    /// `raw_name` is the full configured value (e.g. `extract:items.0.id`)
    /// so strategies that carry a suffix can parse it per call.
    fn apply(&self, raw_name: &str, input: &BodyInput) -> Option<Vec<u8>>;
}

struct Passthrough;
impl BodyStrategy for Passthrough {
    fn apply(&self, _raw_name: &str, input: &BodyInput) -> Option<Vec<u8>> {
        match input.consumer_body {
            Some(body) if !body.is_empty() => Some(body.as_bytes().to_vec()),
            _ => None,
        }
    }
}

struct Static;
impl BodyStrategy for Static {
    fn apply(&self, _raw_name: &str, input: &BodyInput) -> Option<Vec<u8>> {
        input.upstream_static_body.map(|s| s.as_bytes().to_vec())
    }
}

struct Template;
impl BodyStrategy for Template {
    fn apply(&self, _raw_name: &str, input: &BodyInput) -> Option<Vec<u8>> {
        let template = input.upstream_static_body?;
        let Some(consumer_body) = input.consumer_body else {
            return Some(template.as_bytes().to_vec());
        };
        let Ok(parsed) = serde_json::from_str::<serde_json::Value>(consumer_body) else {
            return Some(consumer_body.as_bytes().to_vec());
        };
        Some(substitute_template(template, &parsed).into_bytes())
    }
}

fn substitute_template(template: &str, body: &serde_json::Value) -> String {
    static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    let re = RE.get_or_init(|| regex::Regex::new(r"\{\{body\.([A-Za-z0-9_.]+)\}\}").unwrap());
    re.replace_all(template, |caps: &regex::Captures| {
        jsonpath::get(body, &caps[1]).map(jsonpath::value_to_display).unwrap_or_default()
    })
    .into_owned()
}

struct Extract;
impl BodyStrategy for Extract {
    fn apply(&self, raw_name: &str, input: &BodyInput) -> Option<Vec<u8>> {
        let dot_path = raw_name.strip_prefix("extract:").unwrap_or(raw_name);
        let consumer_body = input.consumer_body?;
        let Ok(parsed) = serde_json::from_str::<serde_json::Value>(consumer_body) else {
            return Some(consumer_body.as_bytes().to_vec());
        };
        match jsonpath::get(&parsed, dot_path) {
            Some(value) => Some(serde_json::to_vec(value).unwrap_or_default()),
            None => Some(consumer_body.as_bytes().to_vec()),
        }
    }
}

struct Binary;
impl BodyStrategy for Binary {
    fn apply(&self, _raw_name: &str, input: &BodyInput) -> Option<Vec<u8>> {
        input.consumer_body_raw.map(|b| b.to_vec())
    }
}

struct FormEncode;
impl BodyStrategy for FormEncode {
    fn apply(&self, _raw_name: &str, input: &BodyInput) -> Option<Vec<u8>> {
        let consumer_body = input.consumer_body?;
        let Ok(parsed) = serde_json::from_str::<serde_json::Value>(consumer_body) else {
            return Some(consumer_body.as_bytes().to_vec());
        };
        let fields = flatten_json_to_form_fields(&parsed);
        Some(gateway_core::percent::form_encode(&fields).into_bytes())
    }
}

/// Resolve the strategy object for a configured `bodyTransform` value.
/// Strategies beginning with `extract:` dispatch to [`Extract`]; any other
/// unrecognized name falls back to `passthrough` (spec §4.7).
pub fn resolve(name: &str) -> Arc<dyn BodyStrategy> {
    if name.starts_with("extract:") {
        return Arc::new(Extract);
    }
    match name {
        "static" => Arc::new(Static),
        "template" => Arc::new(Template),
        "binary" => Arc::new(Binary),
        "form-encode" => Arc::new(FormEncode),
        _ => Arc::new(Passthrough),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_returns_none_for_empty_body() {
        let strategy = resolve("passthrough");
        let input = BodyInput { consumer_body: Some(""), consumer_body_raw: None, upstream_static_body: None };
        assert!(strategy.apply("passthrough", &input).is_none());
    }

    #[test]
    fn unknown_name_falls_back_to_passthrough() {
        let strategy = resolve("totally-unknown");
        let input = BodyInput { consumer_body: Some("hi"), consumer_body_raw: None, upstream_static_body: None };
        assert_eq!(strategy.apply("totally-unknown", &input).unwrap(), b"hi");
    }

    #[test]
    fn template_substitutes_dot_path() {
        let strategy = resolve("template");
        let input = BodyInput {
            consumer_body: Some(r#"{"user":{"name":"ada"}}"#),
            consumer_body_raw: None,
            upstream_static_body: Some(r#"{"greeting":"hi {{body.user.name}}"}"#),
        };
        let out = strategy.apply("template", &input).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), r#"{"greeting":"hi ada"}"#);
    }

    #[test]
    fn template_missing_path_substitutes_empty_string() {
        let strategy = resolve("template");
        let input = BodyInput {
            consumer_body: Some(r#"{"user":{}}"#),
            consumer_body_raw: None,
            upstream_static_body: Some("hi {{body.user.name}}"),
        };
        let out = strategy.apply("template", &input).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "hi ");
    }

    #[test]
    fn extract_pulls_nested_value_and_json_encodes_it() {
        let strategy = resolve("extract:items.0.id");
        let input = BodyInput {
            consumer_body: Some(r#"{"items":[{"id":"x1"}]}"#),
            consumer_body_raw: None,
            upstream_static_body: None,
        };
        let out = strategy.apply("extract:items.0.id", &input).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), r#""x1""#);
    }

    #[test]
    fn extract_parse_failure_passes_body_through() {
        let strategy = resolve("extract:a.b");
        let input = BodyInput { consumer_body: Some("not json"), consumer_body_raw: None, upstream_static_body: None };
        let out = strategy.apply("extract:a.b", &input).unwrap();
        assert_eq!(out, b"not json");
    }

    #[test]
    fn form_encode_produces_bracket_notation() {
        let strategy = resolve("form-encode");
        let input = BodyInput {
            consumer_body: Some(r#"{"card":{"number":"4111"}}"#),
            consumer_body_raw: None,
            upstream_static_body: None,
        };
        let out = strategy.apply("form-encode", &input).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "card%5Bnumber%5D=4111");
    }

    #[test]
    fn binary_returns_raw_bytes_verbatim() {
        let strategy = resolve("binary");
        let input = BodyInput { consumer_body: None, consumer_body_raw: Some(&[1, 2, 3]), upstream_static_body: None };
        assert_eq!(strategy.apply("binary", &input).unwrap(), vec![1, 2, 3]);
    }
}
