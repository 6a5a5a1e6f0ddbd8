//! Parameter redaction applied before an event is serialized

use std::collections::{HashMap, HashSet};

use serde_json::Value;

pub const REDACTED: &str = "[REDACTED]";

/// Strips sensitive request parameters. Supplied by the pipeline; the log
/// itself never inspects payloads.
pub trait Redactor: Send + Sync {
    fn redact(&self, operation: &str, params: Value) -> Value;
}

/// Passes parameters through untouched
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopRedactor;

impl Redactor for NoopRedactor {
    fn redact(&self, _operation: &str, params: Value) -> Value {
        params
    }
}

/// Masks named fields at any depth. Global fields apply to every operation,
/// per-operation fields only to that operation.
#[derive(Clone, Debug, Default)]
pub struct FieldRedactor {
    global: HashSet<String>,
    per_operation: HashMap<String, HashSet<String>>,
}

impl FieldRedactor {
    pub fn new<I, S>(global: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            global: global.into_iter().map(Into::into).collect(),
            per_operation: HashMap::new(),
        }
    }

    pub fn with_operation<I, S>(mut self, operation: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.per_operation
            .entry(operation.into())
            .or_default()
            .extend(fields.into_iter().map(Into::into));
        self
    }

    fn masks(&self, operation: &str, field: &str) -> bool {
        self.global.contains(field)
            || self
                .per_operation
                .get(operation)
                .is_some_and(|fields| fields.contains(field))
    }

    fn walk(&self, operation: &str, value: Value) -> Value {
        match value {
            Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(k, v)| {
                        if self.masks(operation, &k) {
                            (k, Value::String(REDACTED.to_string()))
                        } else {
                            let v = self.walk(operation, v);
                            (k, v)
                        }
                    })
                    .collect(),
            ),
            Value::Array(items) => {
                Value::Array(items.into_iter().map(|v| self.walk(operation, v)).collect())
            }
            other => other,
        }
    }
}

impl Redactor for FieldRedactor {
    fn redact(&self, operation: &str, params: Value) -> Value {
        self.walk(operation, params)
    }
}
