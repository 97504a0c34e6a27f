//! Minimal dot-path JSON accessor shared by the `template`/`extract` body
//! strategies and the `field-map` response strategy.

use serde_json::Value;

pub fn get<'a>(value: &'a Value, dot_path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in dot_path.split('.').filter(|s| !s.is_empty()) {
        current = if let Ok(index) = segment.parse::<usize>() {
            current.as_array()?.get(index)?
        } else {
            current.as_object()?.get(segment)?
        };
    }
    Some(current)
}

/// Set `value` at `dot_path` within `target`, creating intermediate objects
/// as needed.
pub fn set(target: &mut Value, dot_path: &str, value: Value) {
    let segments: Vec<&str> = dot_path.split('.').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        return;
    }
    if !target.is_object() {
        *target = Value::Object(serde_json::Map::new());
    }
    let mut current = target;
    for segment in &segments[..segments.len() - 1] {
        let obj = current.as_object_mut().expect("target coerced to object above");
        current = obj
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        if !current.is_object() {
            *current = Value::Object(serde_json::Map::new());
        }
    }
    let obj = current.as_object_mut().expect("target coerced to object above");
    obj.insert(segments[segments.len() - 1].to_string(), value);
}

/// Scalar-to-string rendering used when a body strategy needs the value as
/// text (e.g. substituting into a template).
pub fn value_to_display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn gets_nested_value() {
        let v = json!({"a": {"b": {"c": 42}}});
        assert_eq!(get(&v, "a.b.c"), Some(&json!(42)));
    }

    #[test]
    fn missing_path_returns_none() {
        let v = json!({"a": 1});
        assert_eq!(get(&v, "a.b"), None);
    }

    #[test]
    fn sets_nested_value_creating_intermediates() {
        let mut target = json!({});
        set(&mut target, "user.name", json!("ada"));
        assert_eq!(target, json!({"user": {"name": "ada"}}));
    }
}
