// Helpers for dotted-path access into a JSON configuration tree

use serde_json::{Map, Value};

/// Separator between path segments in configuration keys.
pub const KEY_SEPARATOR: char = '.';

/// Look up `path` (e.g. `outbox.schedules.outbox_relay`) in `root`.
pub fn get_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    path.split(KEY_SEPARATOR)
        .try_fold(root, |node, segment| node.as_object()?.get(segment))
}

/// Insert `value` at `path`, creating intermediate objects.
///
/// Non-object values found on the way are replaced.
pub fn set_path(root: &mut Value, path: &str, value: Value) {
    let mut node = root;
    let mut segments = path.split(KEY_SEPARATOR).peekable();

    while let Some(segment) = segments.next() {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        let Value::Object(map) = node else {
            return;
        };

        if segments.peek().is_none() {
            map.insert(segment.to_string(), value);
            return;
        }

        node = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
}

/// Recursively merge `overlay` into `base`; objects merge, everything else replaces.
pub fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Interpret a raw string (env var, .env line) as a JSON scalar where possible.
///
/// `"5"` becomes a number, `"true"` a bool; anything else stays a string.
pub fn parse_scalar(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(value @ (Value::Number(_) | Value::Bool(_) | Value::Null)) => value,
        _ => Value::String(raw.to_string()),
    }
}
