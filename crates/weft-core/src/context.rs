use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Mutable key-value state threaded through one workflow run.
///
/// Keys keep their insertion order. The full context is serialized into
/// every runner call; the snapshot a runner sends back replaces the
/// caller's copy (`replace`), so partial mutations on the two sides of a
/// call boundary cannot diverge.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionContext {
    data: Map<String, Value>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context from initial data (e.g. an inbound request payload).
    pub fn from_map(data: Map<String, Value>) -> Self {
        Self { data }
    }

    /// Get a value by key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Get a value as a string, if it's a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }

    /// Set a value.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.data.insert(key.into(), value);
    }

    /// Set a string value.
    pub fn set_str(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.data.insert(key.into(), Value::String(value.into()));
    }

    /// Merge another context into this one (overwrites on conflict).
    pub fn merge(&mut self, other: &ExecutionContext) {
        for (k, v) in &other.data {
            self.data.insert(k.clone(), v.clone());
        }
    }

    /// Replace this context with a snapshot received across a call boundary.
    pub fn replace(&mut self, other: ExecutionContext) {
        self.data = other.data;
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get the underlying data map.
    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_basic_operations() {
        let mut ctx = ExecutionContext::new();
        ctx.set_str("name", "Alice");
        ctx.set("count", json!(42));

        assert_eq!(ctx.get_str("name"), Some("Alice"));
        assert_eq!(ctx.get("count"), Some(&json!(42)));
        assert_eq!(ctx.get("missing"), None);
        assert_eq!(ctx.len(), 2);
    }

    #[test]
    fn test_merge_overwrites() {
        let mut ctx1 = ExecutionContext::new();
        ctx1.set_str("a", "1");
        ctx1.set_str("b", "2");

        let mut ctx2 = ExecutionContext::new();
        ctx2.set_str("b", "overwritten");
        ctx2.set_str("c", "3");

        ctx1.merge(&ctx2);

        assert_eq!(ctx1.get_str("a"), Some("1"));
        assert_eq!(ctx1.get_str("b"), Some("overwritten"));
        assert_eq!(ctx1.get_str("c"), Some("3"));
    }

    #[test]
    fn test_replace_discards_local_state() {
        let mut ctx = ExecutionContext::new();
        ctx.set_str("local", "value");

        let mut snapshot = ExecutionContext::new();
        snapshot.set_str("remote", "value");

        ctx.replace(snapshot);
        assert_eq!(ctx.get("local"), None);
        assert_eq!(ctx.get_str("remote"), Some("value"));
    }

    #[test]
    fn test_preserves_insertion_order() {
        let mut ctx = ExecutionContext::new();
        ctx.set_str("z", "1");
        ctx.set_str("a", "2");
        ctx.set_str("m", "3");

        let keys: Vec<&str> = ctx.data().keys().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
    }

    #[test]
    fn test_serialization_is_transparent() {
        let mut ctx = ExecutionContext::new();
        ctx.set_str("ECHO_OUTPUT", "hi");

        let json = serde_json::to_string(&ctx).unwrap();
        assert_eq!(json, r#"{"ECHO_OUTPUT":"hi"}"#);

        let parsed: ExecutionContext = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, ctx);
    }
}
