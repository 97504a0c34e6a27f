//! Percent-encoding shared by the SigV4 canonical request builder (C3) and
//! the `form-encode` body strategy (C7). AWS's canonical-query encoding is
//! stricter than `application/x-www-form-urlencoded`, so the two callers
//! use distinct functions rather than a single generic encoder.

/// SigV4 URI-encode per AWS's rules: unreserved characters (`A-Za-z0-9-_.~`)
/// pass through unescaped, everything else becomes `%XX` uppercase hex.
/// When `encode_slash` is false, `/` is left unescaped (used for the
/// canonical *path*, not the canonical *query*).
pub fn sigv4_encode(input: &str, encode_slash: bool) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        let c = byte as char;
        let unreserved = c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~');
        if unreserved || (c == '/' && !encode_slash) {
            out.push(c);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

/// Build a SigV4 canonical query string: percent-encode each key/value,
/// then sort pairs lexicographically by encoded key (ties broken by value).
pub fn canonical_query_string(params: &[(String, String)]) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (sigv4_encode(k, true), sigv4_encode(v, true)))
        .collect();
    encoded.sort();
    encoded
        .into_iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Encode a flat key/value list as `application/x-www-form-urlencoded`,
/// using `+` for spaces per the form media type (not SigV4's `%20`).
pub fn form_encode(params: &[(String, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", form_encode_component(k), form_encode_component(v)))
        .collect::<Vec<_>>()
        .join("&")
}

fn form_encode_component(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        let c = byte as char;
        if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~') {
            out.push(c);
        } else if c == ' ' {
            out.push('+');
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

/// Flatten nested JSON into bracket-notation form fields, e.g.
/// `{"user":{"name":"a"}}` -> `user[name]=a`. Arrays use numeric indices.
/// Used by the `form-encode` body strategy (spec §4.7).
pub fn flatten_json_to_form_fields(value: &serde_json::Value) -> Vec<(String, String)> {
    let mut fields = Vec::new();
    flatten_into(value, None, &mut fields);
    fields
}

fn flatten_into(value: &serde_json::Value, prefix: Option<&str>, out: &mut Vec<(String, String)>) {
    match value {
        serde_json::Value::Object(map) => {
            for (k, v) in map {
                let key = match prefix {
                    Some(p) => format!("{p}[{k}]"),
                    None => k.clone(),
                };
                flatten_into(v, Some(&key), out);
            }
        }
        serde_json::Value::Array(items) => {
            for (i, v) in items.iter().enumerate() {
                let key = match prefix {
                    Some(p) => format!("{p}[{i}]"),
                    None => i.to_string(),
                };
                flatten_into(v, Some(&key), out);
            }
        }
        serde_json::Value::Null => {}
        other => {
            let key = prefix.unwrap_or_default().to_string();
            let scalar = match other {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Bool(b) => b.to_string(),
                serde_json::Value::Number(n) => n.to_string(),
                _ => unreachable!(),
            };
            out.push((key, scalar));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sigv4_encode_leaves_unreserved_untouched() {
        assert_eq!(sigv4_encode("abc-._~XYZ09", true), "abc-._~XYZ09");
    }

    #[test]
    fn sigv4_encode_escapes_slash_for_query_but_not_path() {
        assert_eq!(sigv4_encode("a/b", true), "a%2Fb");
        assert_eq!(sigv4_encode("a/b", false), "a/b");
    }

    #[test]
    fn canonical_query_string_sorts_by_encoded_key() {
        let params = vec![
            ("b".to_string(), "2".to_string()),
            ("a".to_string(), "1".to_string()),
        ];
        assert_eq!(canonical_query_string(&params), "a=1&b=2");
    }

    #[test]
    fn form_encode_uses_plus_for_space() {
        assert_eq!(form_encode(&[("q".to_string(), "a b".to_string())]), "q=a+b");
    }

    #[test]
    fn flatten_nested_object_uses_bracket_notation() {
        let value = json!({"user": {"name": "ada", "age": 3}});
        let mut fields = flatten_json_to_form_fields(&value);
        fields.sort();
        assert_eq!(
            fields,
            vec![
                ("user[age]".to_string(), "3".to_string()),
                ("user[name]".to_string(), "ada".to_string()),
            ]
        );
    }

    #[test]
    fn flatten_array_uses_numeric_indices() {
        let value = json!({"tags": ["a", "b"]});
        let fields = flatten_json_to_form_fields(&value);
        assert_eq!(
            fields,
            vec![
                ("tags[0]".to_string(), "a".to_string()),
                ("tags[1]".to_string(), "b".to_string()),
            ]
        );
    }
}
