//! The DocumentStore: a nested document plus per-key acceptance history
//!
//! All mutations funnel through `apply`. Assign-family operations (set,
//! delete) are gated by last-writer-wins against the History map;
//! increments are commutative and bypass History entirely.

use std::collections::HashMap;

use serde_json::{json, Map, Value};

use crate::protocol::Operation;

/// Nested document + per-dotted-key timestamp of the most recent accepted
/// assign-family operation. No History entry means no assign-family op was
/// ever accepted for that key, so the first write always lands.
#[derive(Debug, Default)]
pub struct DocumentStore {
    data: Map<String, Value>,
    history: HashMap<String, i64>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Walk the document along `path` without creating anything.
    /// Absent if a segment is missing or a scalar blocks descent.
    pub fn read(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.data.get(first)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    /// Apply one mutation, local or remote. Returns true if the document
    /// changed (increments always do; set/delete only when accepted).
    pub fn apply(&mut self, path: &str, timestamp: i64, value: Value, op: Operation) -> bool {
        match op {
            Operation::Set => self.write(path, value, timestamp),
            Operation::Increment => {
                self.increment(path, &value);
                true
            }
            Operation::Delete => self.delete(path, timestamp),
        }
    }

    /// History-gated assign: a no-op when `timestamp` is older than the
    /// already-accepted timestamp for this exact key.
    pub fn write(&mut self, path: &str, value: Value, timestamp: i64) -> bool {
        if self.is_stale(path, timestamp) {
            return false;
        }
        self.history.insert(path.to_string(), timestamp);
        let (parent, leaf) = container_for(&mut self.data, path);
        parent.insert(leaf, value);
        true
    }

    /// Unconditional cumulative add. A missing or non-numeric leaf
    /// initializes to 0. Integer arithmetic while both operands are
    /// integers, floating-point otherwise.
    pub fn increment(&mut self, path: &str, delta: &Value) {
        let (parent, leaf) = container_for(&mut self.data, path);
        let current = parent.get(&leaf).cloned().unwrap_or_else(|| json!(0));
        parent.insert(leaf, add_numeric(&current, delta));
    }

    /// History-gated removal. On acceptance the leaf entry disappears and
    /// the delete's timestamp stays in History as the tombstone, so a
    /// later set with a smaller timestamp is rejected as stale.
    pub fn delete(&mut self, path: &str, timestamp: i64) -> bool {
        if self.is_stale(path, timestamp) {
            return false;
        }
        self.history.insert(path.to_string(), timestamp);
        let (parent, leaf) = container_for(&mut self.data, path);
        parent.remove(&leaf);
        true
    }

    /// Wholesale document substitution (join-snapshot bootstrap).
    /// History is untouched: it keeps gating subsequent per-key writes
    /// with whatever timestamps this node observed locally.
    pub fn replace_all(&mut self, snapshot: Value) {
        match snapshot {
            Value::Object(map) => self.data = map,
            other => {
                log::warn!("ignoring non-object snapshot: {other}");
            }
        }
    }

    /// Full copy of the current document, for snapshot transfer.
    pub fn snapshot(&self) -> Value {
        Value::Object(self.data.clone())
    }

    fn is_stale(&self, path: &str, timestamp: i64) -> bool {
        self.history
            .get(path)
            .map_or(false, |&accepted| timestamp < accepted)
    }
}

/// Resolve the parent container and leaf key for `path`, creating empty
/// containers for missing intermediate segments.
///
/// When an intermediate segment holds a scalar, the scalar is replaced by
/// a container holding an empty container under the scalar's own string
/// form (`{"x": 7}` traversed through `x.y` becomes `{"x": {"7": {}}}`).
/// Legacy behavior, preserved deliberately.
fn container_for<'a>(
    data: &'a mut Map<String, Value>,
    path: &str,
) -> (&'a mut Map<String, Value>, String) {
    let mut segments: Vec<&str> = path.split('.').collect();
    let leaf = segments.pop().unwrap_or("").to_string();

    let mut current = data;
    for segment in segments {
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            let mut coerced = Map::new();
            coerced.insert(scalar_key(entry), Value::Object(Map::new()));
            *entry = Value::Object(coerced);
        }
        current = match entry {
            Value::Object(map) => map,
            _ => unreachable!("intermediate segment was just made a container"),
        };
    }

    (current, leaf)
}

/// Key form a displaced scalar takes during coercion.
fn scalar_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Numeric addition with JS-like looseness: integers stay integers,
/// anything non-numeric counts as 0.
fn add_numeric(current: &Value, delta: &Value) -> Value {
    if let (Some(a), Some(b)) = (current.as_i64(), delta.as_i64()) {
        return json!(a + b);
    }
    let a = current.as_f64().unwrap_or(0.0);
    let b = delta.as_f64().unwrap_or(0.0);
    json!(a + b)
}
