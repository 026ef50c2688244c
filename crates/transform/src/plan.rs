//! Shared query plan
//!
//! Before streaming starts, every transformer declares which fields it
//! needs; the union becomes the request body's field selection. The merge
//! is a deep union so independent decoders compose without knowing about
//! each other.

use serde_json::{Map, Value};

#[cfg(test)]
#[path = "plan_test.rs"]
mod tests;

/// Accumulates field selections from the transformer tree.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    fields: Value,
}

impl Default for QueryPlan {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryPlan {
    /// Create an empty plan
    pub fn new() -> Self {
        Self {
            fields: Value::Object(Map::new()),
        }
    }

    /// Merge a field selection into the plan.
    ///
    /// Objects merge recursively, arrays union by value, scalars are
    /// overwritten by the later declaration.
    pub fn require(&mut self, selection: Value) {
        merge(&mut self.fields, selection);
    }

    /// The combined selection
    pub fn fields(&self) -> &Value {
        &self.fields
    }

    /// Consume the plan into the combined selection
    pub fn into_fields(self) -> Value {
        self.fields
    }

    /// Whether nothing was declared
    pub fn is_empty(&self) -> bool {
        matches!(&self.fields, Value::Object(map) if map.is_empty())
    }
}

fn merge(base: &mut Value, addition: Value) {
    match (base, addition) {
        (Value::Object(base), Value::Object(addition)) => {
            for (key, value) in addition {
                match base.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (Value::Array(base), Value::Array(addition)) => {
            for value in addition {
                if !base.contains(&value) {
                    base.push(value);
                }
            }
        }
        (base, addition) => *base = addition,
    }
}
