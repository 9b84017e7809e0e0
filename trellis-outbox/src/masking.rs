//! Masking of sensitive fields in the wire representation.

use serde_json::Value;

/// Mask used when a field does not declare its own.
pub const DEFAULT_MASK: &str = "****";

/// A field whose value must not leave the process in clear text.
///
/// `path` is dotted (`card.number`); arrays on the way are traversed
/// element by element. Only string values are replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensitiveField {
    path: &'static str,
    mask: &'static str,
}

impl SensitiveField {
    pub const fn new(path: &'static str) -> Self {
        Self {
            path,
            mask: DEFAULT_MASK,
        }
    }

    pub const fn with_mask(mut self, mask: &'static str) -> Self {
        self.mask = mask;
        self
    }

    pub fn path(&self) -> &'static str {
        self.path
    }

    pub fn mask(&self) -> &'static str {
        self.mask
    }
}

/// Replace every sensitive string in `value` with its mask.
pub fn mask_fields(value: &mut Value, fields: &[SensitiveField]) {
    for field in fields {
        let segments: Vec<&str> = field.path.split('.').collect();
        mask_path(value, &segments, field.mask);
    }
}

fn mask_path(node: &mut Value, segments: &[&str], mask: &str) {
    match node {
        Value::Array(items) => {
            for item in items {
                mask_path(item, segments, mask);
            }
        }
        Value::Object(map) => {
            let Some((head, rest)) = segments.split_first() else {
                return;
            };
            let Some(child) = map.get_mut(*head) else {
                return;
            };
            if rest.is_empty() {
                mask_leaf(child, mask);
            } else {
                mask_path(child, rest, mask);
            }
        }
        _ => {}
    }
}

fn mask_leaf(node: &mut Value, mask: &str) {
    match node {
        Value::String(s) => *s = mask.to_string(),
        Value::Array(items) => items.iter_mut().for_each(|item| mask_leaf(item, mask)),
        _ => {}
    }
}
