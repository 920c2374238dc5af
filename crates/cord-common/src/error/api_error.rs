//! Structured error body returned by the REST API
//!
//! ```json
//! {"code": 50035, "message": "Invalid Form Body",
//!  "errors": {"content": {"_errors": [{"code": "BASE_TYPE_MAX_LENGTH", "message": "..."}]}}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Error response structure returned by the API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiErrorBody {
    pub code: u64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Value>,
}

impl ApiErrorBody {
    /// Flatten the nested `errors` tree into `path: message` lines.
    ///
    /// Array indices become path segments, e.g. `embeds.0.title: ...`.
    pub fn flatten_errors(&self) -> Vec<String> {
        let mut out = Vec::new();
        if let Some(errors) = &self.errors {
            collect_errors(errors, "", &mut out);
        }
        out
    }
}

fn collect_errors(node: &Value, path: &str, out: &mut Vec<String>) {
    let Value::Object(map) = node else {
        return;
    };

    for (key, value) in map {
        if key == "_errors" {
            if let Value::Array(items) = value {
                for item in items {
                    let message = item
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown error");
                    if path.is_empty() {
                        out.push(message.to_string());
                    } else {
                        out.push(format!("{path}: {message}"));
                    }
                }
            }
            continue;
        }

        let next = if path.is_empty() {
            key.clone()
        } else {
            format!("{path}.{key}")
        };
        collect_errors(value, &next, out);
    }
}

impl fmt::Display for ApiErrorBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)?;
        for line in self.flatten_errors() {
            write!(f, "\n  {line}")?;
        }
        Ok(())
    }
}
