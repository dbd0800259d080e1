// SPDX-License-Identifier: MIT OR Apache-2.0
//! Request body guards for the daemon API.
//!
//! The Admin Query Layer's SQL composition (spec.md §4.8) already rejects
//! unsafe identifiers at the `ingest-warehouse` layer; this module guards
//! the HTTP/WS surface one step earlier, bounding how deep and how large an
//! inbound JSON body can be before it's even handed to a handler. Applies
//! equally to admin search bodies and WS action payloads, since the WS
//! layer decodes and re-dispatches the same shapes (spec.md §4.10).

use serde_json::Value;

/// Limits enforced on an inbound JSON request body.
#[derive(Debug, Clone, Copy)]
pub struct JsonGuardLimits {
    max_depth: usize,
    max_size_bytes: usize,
}

impl JsonGuardLimits {
    /// Builds a limit set.
    pub fn new(max_depth: usize, max_size_bytes: usize) -> Self {
        Self {
            max_depth,
            max_size_bytes,
        }
    }
}

impl Default for JsonGuardLimits {
    /// Admin search bodies and WS action payloads are small, flat objects;
    /// these defaults are generous relative to that shape.
    fn default() -> Self {
        Self::new(10, 1_000_000)
    }
}

fn depth(value: &Value) -> usize {
    match value {
        Value::Object(map) => 1 + map.values().map(depth).max().unwrap_or(0),
        Value::Array(items) => 1 + items.iter().map(depth).max().unwrap_or(0),
        _ => 0,
    }
}

/// Validates that `value` is an object (or absent), within the configured
/// depth and serialized-size bounds. Returns every violation found, not
/// just the first.
pub fn validate_json_object(value: &Value, limits: JsonGuardLimits) -> Vec<String> {
    let mut errors = Vec::new();

    if !value.is_object() && !value.is_null() {
        errors.push("request body must be a JSON object".to_string());
        return errors;
    }

    let encoded_len = serde_json::to_vec(value).map(|b| b.len()).unwrap_or(usize::MAX);
    if encoded_len > limits.max_size_bytes {
        errors.push(format!(
            "request body of {encoded_len} bytes exceeds maximum of {}",
            limits.max_size_bytes
        ));
    }

    let observed_depth = depth(value);
    if observed_depth > limits.max_depth {
        errors.push(format!(
            "request body nesting depth {observed_depth} exceeds maximum of {}",
            limits.max_depth
        ));
    }

    errors
}
