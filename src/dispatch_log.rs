use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

/// One resolved orchestrator transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchLogEntry {
    pub id: String,
    pub dispatched_at: DateTime<Utc>,
    pub resolved_at: DateTime<Utc>,
    pub action_name: &'static str,
    /// Changed top-level state fields as `{field: {before, after}}`.
    pub state_diff: Value,
}

impl DispatchLogEntry {
    pub fn new(
        action_name: &'static str,
        dispatched_at: DateTime<Utc>,
        before: &Value,
        after: &Value,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            dispatched_at,
            resolved_at: Utc::now(),
            action_name,
            state_diff: state_diff(before, after),
        }
    }
}

/// Keeps the most recent `capacity` entries, oldest first.
#[derive(Debug, Clone)]
pub struct DispatchLog {
    capacity: usize,
    entries: VecDeque<DispatchLogEntry>,
}

impl DispatchLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, entry: DispatchLogEntry) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn entries(&self) -> Vec<DispatchLogEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Shallow diff of two JSON objects.
pub fn state_diff(before: &Value, after: &Value) -> Value {
    let empty = Map::new();
    let before = before.as_object().unwrap_or(&empty);
    let after = after.as_object().unwrap_or(&empty);

    let mut diff = Map::new();
    for key in before.keys().chain(after.keys()) {
        if diff.contains_key(key) {
            continue;
        }
        let old = before.get(key).unwrap_or(&Value::Null);
        let new = after.get(key).unwrap_or(&Value::Null);
        if old != new {
            diff.insert(
                key.clone(),
                serde_json::json!({"before": old, "after": new}),
            );
        }
    }
    Value::Object(diff)
}
