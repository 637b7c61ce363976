use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error body returned by the traffic service, e.g.
/// `{"detail": "Intersection not found"}`. Request validation failures carry
/// a list of field errors under `detail` instead of a string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendErrorBody {
    #[serde(default)]
    pub detail: Value,
}

impl BackendErrorBody {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: Value::String(detail.into()),
        }
    }

    pub fn message(&self) -> String {
        match &self.detail {
            Value::String(text) => text.clone(),
            Value::Null => String::new(),
            Value::Array(items) => items
                .iter()
                .map(|item| {
                    item.get("msg")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| item.to_string())
                })
                .collect::<Vec<_>>()
                .join("; "),
            other => other.to_string(),
        }
    }
}
