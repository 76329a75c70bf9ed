//! Creation of JSON merge patches ([RFC 7386](https://www.rfc-editor.org/rfc/rfc7386)).

use serde_json::{Map, Value};

/// Creates the merge patch which turns `original` into `modified`.
///
/// Objects are compared key by key: removed keys become `null`, unchanged keys are left out
/// and changed keys are patched recursively. Any other change, including a change inside an
/// array, replaces the value as a whole.
pub fn create_merge_patch(original: &Value, modified: &Value) -> Value {
    match (original, modified) {
        (Value::Object(original), Value::Object(modified)) => {
            Value::Object(create_object_merge_patch(original, modified))
        }
        _ => modified.clone(),
    }
}

/// Like [`create_merge_patch`], for two objects.
///
/// An empty result means there is nothing to patch.
pub fn create_object_merge_patch(
    original: &Map<String, Value>,
    modified: &Map<String, Value>,
) -> Map<String, Value> {
    let mut patch = Map::new();

    for key in original.keys().filter(|key| !modified.contains_key(*key)) {
        patch.insert(key.clone(), Value::Null);
    }

    for (key, new) in modified {
        let value = match (original.get(key), new) {
            (Some(old), new) if old == new => continue,
            (Some(Value::Object(old)), Value::Object(new)) => {
                Value::Object(create_object_merge_patch(old, new))
            }
            _ => new.clone(),
        };
        patch.insert(key.clone(), value);
    }

    patch
}
