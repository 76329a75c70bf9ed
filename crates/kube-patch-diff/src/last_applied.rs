//! Recovery of the inputs which produced a live object.

use kube::{ResourceExt, core::DynamicObject};
use serde_json::{Map, Value};

/// The annotation `kubectl apply` stores the applied configuration in.
pub const LAST_APPLIED_CONFIG_KEY: &str = "kubectl.kubernetes.io/last-applied-configuration";

/// Parses the configuration recorded in the [`LAST_APPLIED_CONFIG_KEY`] annotation.
///
/// Returns [`None`] if the annotation is missing or does not contain a JSON object.
pub fn parse_last_applied_config(live: &DynamicObject) -> Option<Value> {
    let last_applied = live.annotations().get(LAST_APPLIED_CONFIG_KEY)?;

    match serde_json::from_str(last_applied) {
        Ok(inputs @ Value::Object(_)) => Some(inputs),
        Ok(_) => {
            tracing::debug!(
                object = %live.name_any(),
                "ignoring last applied configuration which is not an object"
            );
            None
        }
        Err(error) => {
            tracing::debug!(
                object = %live.name_any(),
                %error,
                "ignoring unparsable last applied configuration"
            );
            None
        }
    }
}

/// Returns the inputs which most likely produced `live`.
///
/// In order of preference:
///
/// 1. the last applied configuration of the object
/// 2. `old_inputs`, unless empty
/// 3. an object only carrying the `apiVersion` and `kind` of `live`
pub fn parse_live_inputs(live: &DynamicObject, old_inputs: Option<&Value>) -> Value {
    if let Some(inputs) = parse_last_applied_config(live) {
        return inputs;
    }

    if let Some(old_inputs) =
        old_inputs.filter(|inputs| inputs.as_object().is_some_and(|map| !map.is_empty()))
    {
        return old_inputs.clone();
    }

    let mut inputs = Map::new();
    if let Some(types) = &live.types {
        inputs.insert("apiVersion".to_owned(), types.api_version.clone().into());
        inputs.insert("kind".to_owned(), types.kind.clone().into());
    }
    Value::Object(inputs)
}
