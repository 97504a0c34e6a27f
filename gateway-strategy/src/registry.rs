use crate::auth::{self, AuthStrategy};
use crate::body::{self, BodyStrategy};
use crate::response::{self, ResponseStrategy};
use std::sync::Arc;

/// Named strategy lookup for the three transform dimensions (spec §4.7).
/// Unlike a static `HashMap`, each table's `resolve` applies its own
/// prefix/fallback rule before any lookup, so there is nothing to register
/// at startup — the registry exists to give callers one seam to depend on
/// rather than three free functions scattered across modules.
pub struct StrategyRegistry;

impl StrategyRegistry {
    pub fn body(&self, name: &str) -> Arc<dyn BodyStrategy> {
        body::resolve(name)
    }

    pub fn auth(&self, name: &str) -> Arc<dyn AuthStrategy> {
        auth::resolve(name)
    }

    pub fn response(&self, name: &str) -> Arc<dyn ResponseStrategy> {
        response::resolve(name)
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_extract_prefix_dispatches_to_extract_strategy() {
        let registry = StrategyRegistry::default();
        let strategy = registry.body("extract:a.b");
        let input = body::BodyInput { consumer_body: Some(r#"{"a":{"b":1}}"#), consumer_body_raw: None, upstream_static_body: None };
        assert_eq!(strategy.apply("extract:a.b", &input).unwrap(), b"1");
    }

    #[test]
    fn response_field_map_prefix_dispatches_to_field_map_strategy() {
        let registry = StrategyRegistry::default();
        let strategy = registry.response("field-map:a->b");
        assert!(Arc::strong_count(&strategy) >= 1);
    }
}
