use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Value};

/// Aggregate dashboard state: metric name to value.
///
/// Keys are never removed. Writes go through [`ViewModel::merge`],
/// [`ViewModel::set`] or [`ViewModel::adjust_counter`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ViewModel {
    fields: IndexMap<String, Value>,
}

impl ViewModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shallow-merge the top-level fields of `patch`; later writes win.
    /// Returns the keys written.
    pub fn merge(&mut self, patch: &Map<String, Value>) -> Vec<String> {
        let mut written = Vec::with_capacity(patch.len());
        for (key, value) in patch {
            self.fields.insert(key.clone(), value.clone());
            written.push(key.clone());
        }
        written
    }

    /// Overwrite one key.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.fields.insert(key.into(), value);
    }

    /// Apply a signed delta to a numeric key, clamped to a floor of 0.
    ///
    /// Missing or non-integer values count as 0. Returns the new value.
    pub fn adjust_counter(&mut self, key: &str, delta: i64) -> i64 {
        let current = self.counter(key);
        let next = current.saturating_add(delta).max(0);
        self.fields.insert(key.to_string(), Value::from(next));
        next
    }

    /// Read a key as a counter.
    pub fn counter(&self, key: &str) -> i64 {
        match self.fields.get(key) {
            Some(Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_u64().map(|u| i64::try_from(u).unwrap_or(i64::MAX)))
                .or_else(|| n.as_f64().map(|f| f as i64))
                .unwrap_or(0),
            _ => 0,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Render as a JSON object.
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.fields
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}
