//! Typed lookups into search hits.
//!
//! Elasticsearch returns requested `fields` as flat dotted keys whose values
//! are always arrays, even for scalars:
//!
//! ```text
//! { "pools./Common/web.activeMemberCnt": [2], "@timestamp": ["2026-..."] }
//! ```
//!
//! `_source` on the other hand is a nested object. [`SearchDocument::get`]
//! resolves a dotted path against both shapes and unwraps the single-element
//! array at the leaf. Key absent, empty array and wrong shape all yield `None`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A `fields` or `_source` map of a search hit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SearchDocument(Map<String, Value>);

impl SearchDocument {
    pub fn new(map: Map<String, Value>) -> Self {
        Self(map)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Looks up a dotted path and unwraps the leaf array.
    ///
    /// # Examples
    ///
    /// ```
    /// use check_f5_telemetry::search::SearchDocument;
    ///
    /// let doc: SearchDocument =
    ///     serde_json::from_str(r#"{"log": {"level": ["warn"]}}"#).unwrap();
    /// assert_eq!(doc.get_string("log.level").as_deref(), Some("warn"));
    /// assert!(doc.get("log.missing").is_none());
    /// ```
    pub fn get(&self, path: &str) -> Option<&Value> {
        lookup(&self.0, path)
    }

    /// Numeric field as `f64`. Non-numeric values count as missing.
    pub fn get_f64(&self, path: &str) -> Option<f64> {
        self.get(path).and_then(Value::as_f64)
    }

    /// Scalar field rendered as string.
    pub fn get_string(&self, path: &str) -> Option<String> {
        match self.get(path)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// All leaf paths of the document, nested objects joined with `.`.
    pub fn paths(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(self.0.len());
        collect_paths(&self.0, None, &mut out);
        out
    }
}

impl From<Map<String, Value>> for SearchDocument {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

fn lookup<'a>(map: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    if let Some(value) = map.get(path) {
        return unwrap_leaf(value);
    }
    // Keys may contain dots themselves, so try every split point.
    for (pos, _) in path.match_indices('.') {
        let (head, rest) = (&path[..pos], &path[pos + 1..]);
        if let Some(Value::Object(sub)) = map.get(head)
            && let Some(value) = lookup(sub, rest)
        {
            return Some(value);
        }
    }
    None
}

fn unwrap_leaf(value: &Value) -> Option<&Value> {
    match value {
        Value::Array(items) => items.first(),
        Value::Object(_) => None,
        other => Some(other),
    }
}

fn collect_paths(map: &Map<String, Value>, prefix: Option<&str>, out: &mut Vec<String>) {
    for (key, value) in map {
        let path = match prefix {
            Some(p) => format!("{}.{}", p, key),
            None => key.clone(),
        };
        match value {
            Value::Object(sub) => collect_paths(sub, Some(&path), out),
            _ => out.push(path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> SearchDocument {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_flat_fields() {
        let d = doc(json!({
            "pools./Common/web.activeMemberCnt": [2],
            "@timestamp": ["2026-10-17T10:00:00.000Z"],
        }));
        assert_eq!(d.get_f64("pools./Common/web.activeMemberCnt"), Some(2.0));
        assert_eq!(
            d.get_string("@timestamp").as_deref(),
            Some("2026-10-17T10:00:00.000Z")
        );
    }

    #[test]
    fn test_nested_matches_manual_unwrap() {
        let d = doc(json!({"a": {"b": {"c": [42.5]}}}));
        let manual = d.0["a"]["b"]["c"][0].as_f64();
        assert_eq!(d.get_f64("a.b.c"), manual);
        assert_eq!(d.get_f64("a.b.c"), Some(42.5));
    }

    #[test]
    fn test_nested_keys_with_dots() {
        let d = doc(json!({"members": {"/Common/10.0.0.1:80": {"state": ["up"]}}}));
        assert_eq!(
            d.get_string("members./Common/10.0.0.1:80.state").as_deref(),
            Some("up")
        );
    }

    #[test]
    fn test_missing_is_uniform() {
        let d = doc(json!({
            "empty": [],
            "scalar": 5,
            "obj": {"x": [1]},
        }));
        assert!(d.get("absent").is_none());
        assert!(d.get("empty").is_none());
        assert!(d.get("scalar.sub").is_none());
        assert!(d.get("obj").is_none());
        assert!(d.get("obj.y").is_none());
        assert!(d.get("absent.deeper.path").is_none());
        assert_eq!(d.get_f64("scalar"), Some(5.0));
    }

    #[test]
    fn test_typed_accessors() {
        let d = doc(json!({"n": [1.5], "s": ["text"], "b": [true], "z": [null]}));
        assert_eq!(d.get_f64("s"), None);
        assert_eq!(d.get_string("n").as_deref(), Some("1.5"));
        assert_eq!(d.get_string("b").as_deref(), Some("true"));
        assert_eq!(d.get_string("z"), None);
    }

    #[test]
    fn test_paths() {
        let d = doc(json!({"a": {"b": [1], "c": {"d": [2]}}, "e.f": [3]}));
        let mut paths = d.paths();
        paths.sort();
        assert_eq!(paths, vec!["a.b", "a.c.d", "e.f"]);
    }
}
