//! Conversion of JSON merge patches into detailed, per-property diffs.
//!
//! A merge patch between the previous live state of an object and its desired state tells
//! which properties the server will touch, but not why. The diff computed here only reports
//! properties that can be traced back to the user-declared inputs, and marks each of them as
//! added, deleted or updated. Properties matching a [`ForceNewPattern`] are escalated to their
//! `*_REPLACE` kind, signalling that the object has to be replaced instead of updated.
//!
//! ```
//! use kube_patch_diff::diff::{DiffKind, PropertyDiff, compute_diff};
//! use serde_json::json;
//!
//! let object = |replicas: u32| json!({"spec": {"replicas": replicas}});
//! let (patch, old_live, new_inputs, old_inputs) = (object(5), object(3), object(5), object(3));
//!
//! let diff = compute_diff(
//!     patch.as_object().unwrap(),
//!     old_live.as_object().unwrap(),
//!     new_inputs.as_object(),
//!     old_inputs.as_object(),
//!     &[],
//! )
//! .unwrap();
//!
//! assert_eq!(diff["spec.replicas"], PropertyDiff::new(DiffKind::Update, false));
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::force_new::{ForceNewPattern, SchemaQueryError, match_force_new_paths};

mod number;
mod path;

pub use number::{equal_numbers, values_equal};
pub use path::{PathSegment, PropertyPath};

/// The kind of change recorded for a single property.
#[derive(
    Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum DiffKind {
    /// The property was added.
    Add,

    /// The property was added and the object has to be replaced.
    AddReplace,

    /// The property was deleted.
    Delete,

    /// The property was deleted and the object has to be replaced.
    DeleteReplace,

    /// The property was updated.
    Update,

    /// The property was updated and the object has to be replaced.
    UpdateReplace,
}

impl DiffKind {
    /// Returns the `*_REPLACE` counterpart of this kind.
    pub fn into_replace(self) -> Self {
        match self {
            Self::Add | Self::AddReplace => Self::AddReplace,
            Self::Delete | Self::DeleteReplace => Self::DeleteReplace,
            Self::Update | Self::UpdateReplace => Self::UpdateReplace,
        }
    }

    pub fn is_replace(self) -> bool {
        matches!(
            self,
            Self::AddReplace | Self::DeleteReplace | Self::UpdateReplace
        )
    }
}

/// The change recorded for a single property.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyDiff {
    pub kind: DiffKind,

    /// Set if the change originates from the inputs rather than from the server.
    pub input_diff: bool,
}

impl PropertyDiff {
    pub fn new(kind: DiffKind, input_diff: bool) -> Self {
        Self { kind, input_diff }
    }
}

/// Property diffs keyed by their rendered [`PropertyPath`].
pub type DetailedDiff = BTreeMap<String, PropertyDiff>;

/// Returns `true` if any property of the diff requires the object to be replaced.
pub fn requires_replacement(diff: &DetailedDiff) -> bool {
    diff.values().any(|property| property.kind.is_replace())
}

/// Converts the merge patch `patch` into a detailed diff.
///
/// - `old_live_state` is the live object the patch was computed against.
/// - `new_inputs` and `old_inputs` are the current and previous user-declared inputs. Only
///   properties which are part of the inputs show up in the diff.
/// - `force_new` are the patterns of properties which cannot be changed in place.
///
/// Either every changed property is checked successfully against `force_new` or an error is
/// returned, there is no partial result.
///
/// # Panics
///
/// Panics if `patch` is empty. Callers are expected to skip the diff for empty patches.
pub fn compute_diff(
    patch: &Map<String, Value>,
    old_live_state: &Map<String, Value>,
    new_inputs: Option<&Map<String, Value>>,
    old_inputs: Option<&Map<String, Value>>,
    force_new: &[ForceNewPattern],
) -> Result<DetailedDiff, SchemaQueryError> {
    assert!(!patch.is_empty(), "the merge patch must not be empty");

    let mut converter = PatchConverter::new(force_new);
    converter.add_map_to_diff(
        &PropertyPath::root(),
        patch,
        old_live_state,
        new_inputs,
        old_inputs,
        false,
    )?;

    tracing::debug!(
        properties = converter.diff.len(),
        replace = requires_replacement(&converter.diff),
        "computed detailed diff from merge patch"
    );

    Ok(converter.diff)
}

/// Accumulates the detailed diff while walking the patch.
struct PatchConverter<'a> {
    force_new: &'a [ForceNewPattern],
    diff: DetailedDiff,
}

/// Treats `null` like a missing value, merge patches use it to express deletion.
fn present(value: Option<&Value>) -> Option<&Value> {
    value.filter(|value| !value.is_null())
}

impl<'a> PatchConverter<'a> {
    fn new(force_new: &'a [ForceNewPattern]) -> Self {
        Self {
            force_new,
            diff: DetailedDiff::new(),
        }
    }

    /// Records the difference between the patched value `v` and the `old` value at `path`.
    ///
    /// - an absent patched value is a delete
    /// - an absent old value is an add
    /// - maps and arrays on both sides are compared per property / element
    /// - everything else is an update, unless both values are equal
    fn add_value_to_diff(
        &mut self,
        path: &PropertyPath,
        v: Option<&Value>,
        old: Option<&Value>,
        new_input: Option<&Value>,
        old_input: Option<&Value>,
        in_array: bool,
    ) -> Result<(), SchemaQueryError> {
        let (v, old, new_input, old_input) =
            (present(v), present(old), present(new_input), present(old_input));

        if v.is_none() && old.is_none() && old_input.is_none() {
            tracing::trace!(%path, "property is absent everywhere, nothing to compare");
            return Ok(());
        }

        // Without a new input the only possible diff is a delete of an old input. Anything
        // else was populated by the server.
        if new_input.is_none() && (v.is_some() || old_input.is_none()) {
            return Ok(());
        }

        let (kind, input_diff) = match (v, old) {
            (None, _) => (DiffKind::Delete, true),
            (Some(_), None) => (DiffKind::Add, false),
            (Some(Value::Object(v)), Some(Value::Object(old))) => {
                return self.add_map_to_diff(
                    path,
                    v,
                    old,
                    new_input.and_then(Value::as_object),
                    old_input.and_then(Value::as_object),
                    in_array,
                );
            }
            (Some(Value::Array(v)), Some(Value::Array(old))) => {
                return self.add_array_to_diff(
                    path,
                    v,
                    old,
                    new_input.and_then(Value::as_array).map(Vec::as_slice),
                    old_input.and_then(Value::as_array).map(Vec::as_slice),
                );
            }
            (Some(Value::Object(_) | Value::Array(_)), Some(_)) => (DiffKind::Update, false),
            (Some(v), Some(old)) => {
                // A merge patch replaces arrays as a whole, so it overestimates the changed
                // elements. Only values which actually differ are recorded.
                if values_equal(v, old) {
                    return Ok(());
                }
                (DiffKind::Update, false)
            }
        };

        let kind = if self.forces_replacement(path, v)? {
            kind.into_replace()
        } else {
            kind
        };

        let rendered = path.to_string();
        tracing::trace!(path = %rendered, %kind, input_diff, "recording property diff");
        self.diff
            .insert(rendered, PropertyDiff::new(kind, input_diff));

        Ok(())
    }

    /// Records the differences of all properties in the patched map `patch`.
    ///
    /// A merge patch cannot express deletions inside array elements, the whole array is
    /// replaced instead. Inside arrays, keys of `old` missing from `patch` are therefore
    /// recorded as deletes as well.
    fn add_map_to_diff(
        &mut self,
        path: &PropertyPath,
        patch: &Map<String, Value>,
        old: &Map<String, Value>,
        new_input: Option<&Map<String, Value>>,
        old_input: Option<&Map<String, Value>>,
        in_array: bool,
    ) -> Result<(), SchemaQueryError> {
        let inputs = |key: &str| {
            (
                new_input.and_then(|map| map.get(key)),
                old_input.and_then(|map| map.get(key)),
            )
        };

        for (key, value) in patch {
            let (new_input, old_input) = inputs(key);
            self.add_value_to_diff(
                &path.child(key.as_str()),
                Some(value),
                old.get(key),
                new_input,
                old_input,
                in_array,
            )?;
        }

        if in_array {
            for (key, old_value) in old.iter().filter(|(key, _)| !patch.contains_key(*key)) {
                let (new_input, old_input) = inputs(key);
                self.add_value_to_diff(
                    &path.child(key.as_str()),
                    None,
                    Some(old_value),
                    new_input,
                    old_input,
                    in_array,
                )?;
            }
        }

        Ok(())
    }

    /// Records the differences between the patched array `patch` and the `old` array.
    ///
    /// Elements are compared pairwise, surplus elements of `patch` are adds and surplus
    /// elements of `old` are deletes. Inputs shorter than the arrays are tolerated.
    fn add_array_to_diff(
        &mut self,
        path: &PropertyPath,
        patch: &[Value],
        old: &[Value],
        new_input: Option<&[Value]>,
        old_input: Option<&[Value]>,
    ) -> Result<(), SchemaQueryError> {
        let inputs = |index: usize| {
            (
                new_input.and_then(|array| array.get(index)),
                old_input.and_then(|array| array.get(index)),
            )
        };
        let paired = patch.len().min(old.len());

        for (index, (value, old_value)) in patch.iter().zip(old).enumerate() {
            let (new_input, old_input) = inputs(index);
            self.add_value_to_diff(
                &path.child(index),
                Some(value),
                Some(old_value),
                new_input,
                old_input,
                true,
            )?;
        }

        for (index, value) in patch.iter().enumerate().skip(paired) {
            let (new_input, old_input) = inputs(index);
            self.add_value_to_diff(&path.child(index), Some(value), None, new_input, old_input, true)?;
        }

        for (index, old_value) in old.iter().enumerate().skip(paired) {
            let (new_input, old_input) = inputs(index);
            self.add_value_to_diff(
                &path.child(index),
                None,
                Some(old_value),
                new_input,
                old_input,
                true,
            )?;
        }

        Ok(())
    }

    /// Queries the force-new patterns with a document only containing `path`.
    fn forces_replacement(
        &self,
        path: &PropertyPath,
        value: Option<&Value>,
    ) -> Result<bool, SchemaQueryError> {
        if self.force_new.is_empty() {
            return Ok(false);
        }

        let document = path.to_document(value.cloned().unwrap_or(Value::Null));
        let matched = match_force_new_paths(&document, self.force_new)?;
        if let Some(pattern) = matched.first() {
            tracing::trace!(%path, %pattern, "property change requires replacement");
        }

        Ok(!matched.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;
    use crate::force_new::parse_patterns;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("test fixture must be an object, got {other}"),
        }
    }

    /// Computes the diff with inputs given as JSON, `null` inputs are passed as absent.
    fn diff_of(
        patch: Value,
        old_live: Value,
        new_inputs: Value,
        old_inputs: Value,
        force_new: &[&str],
    ) -> Result<DetailedDiff, SchemaQueryError> {
        let force_new = parse_patterns(force_new).expect("test patterns are valid");
        compute_diff(
            &object(patch),
            &object(old_live),
            new_inputs.as_object(),
            old_inputs.as_object(),
            &force_new,
        )
    }

    fn expected(entries: &[(&str, DiffKind, bool)]) -> DetailedDiff {
        entries
            .iter()
            .map(|(path, kind, input_diff)| ((*path).to_owned(), PropertyDiff::new(*kind, *input_diff)))
            .collect()
    }

    #[test]
    fn updated_scalar() {
        let diff = diff_of(
            json!({"spec": {"replicas": 5}}),
            json!({"spec": {"replicas": 3}}),
            json!({"spec": {"replicas": 5}}),
            json!({"spec": {"replicas": 3}}),
            &[],
        )
        .expect("diff succeeds");

        assert_eq!(diff, expected(&[("spec.replicas", DiffKind::Update, false)]));
    }

    #[test]
    fn unchanged_values_produce_no_diff() {
        let state = json!({
            "metadata": {"labels": {"app": "nginx"}},
            "spec": {"replicas": 3, "ports": [{"port": 80}, {"port": 443}]}
        });

        let diff = diff_of(state.clone(), state.clone(), state.clone(), state, &[])
            .expect("diff succeeds");

        assert!(diff.is_empty(), "unexpected diff: {diff:?}");
    }

    #[rstest]
    #[case(json!(3), json!(3.0), None)]
    #[case(json!(3.0), json!(3), None)]
    #[case(json!(3), json!(4), Some(DiffKind::Update))]
    #[case(json!("3"), json!(3), Some(DiffKind::Update))]
    #[case(json!(false), json!(true), Some(DiffKind::Update))]
    fn numeric_equivalence(#[case] old: Value, #[case] new: Value, #[case] kind: Option<DiffKind>) {
        let diff = diff_of(
            json!({"spec": {"weight": new}}),
            json!({"spec": {"weight": old}}),
            json!({"spec": {"weight": new}}),
            json!({"spec": {"weight": old}}),
            &[],
        )
        .expect("diff succeeds");

        let recorded = diff.get("spec.weight").map(|property| property.kind);
        assert_eq!(recorded, kind);
    }

    #[test]
    fn added_and_deleted_properties() {
        let diff = diff_of(
            json!({"metadata": {"labels": {"tier": "web", "legacy": null}}}),
            json!({"metadata": {"labels": {"app": "nginx", "legacy": "true"}}}),
            json!({"metadata": {"labels": {"app": "nginx", "tier": "web"}}}),
            json!({"metadata": {"labels": {"app": "nginx", "legacy": "true"}}}),
            &[],
        )
        .expect("diff succeeds");

        assert_eq!(
            diff,
            expected(&[
                ("metadata.labels.legacy", DiffKind::Delete, true),
                ("metadata.labels.tier", DiffKind::Add, false),
            ])
        );
    }

    #[rstest]
    // Server populated a field the user never declared
    #[case(json!({"spec": {"clusterIP": "10.0.0.1"}}), json!({}), json!(null), json!(null))]
    // Server changed a field the user stopped declaring
    #[case(json!({"spec": {"clusterIP": "10.0.0.2"}}), json!({"spec": {"clusterIP": "10.0.0.1"}}), json!({}), json!({"spec": {"clusterIP": "10.0.0.1"}}))]
    // Server removed a field which was never part of the inputs
    #[case(json!({"spec": {"clusterIP": null}}), json!({"spec": {"clusterIP": "10.0.0.1"}}), json!({"spec": {}}), json!({"spec": {}}))]
    fn server_side_changes_are_suppressed(
        #[case] patch: Value,
        #[case] old_live: Value,
        #[case] new_inputs: Value,
        #[case] old_inputs: Value,
    ) {
        let diff = diff_of(patch, old_live, new_inputs, old_inputs, &[]).expect("diff succeeds");
        assert!(diff.is_empty(), "unexpected diff: {diff:?}");
    }

    #[test]
    fn removed_input_is_recorded_as_delete() {
        let diff = diff_of(
            json!({"spec": {"sessionAffinity": null}}),
            json!({"spec": {"sessionAffinity": "ClientIP"}}),
            json!({"spec": {}}),
            json!({"spec": {"sessionAffinity": "ClientIP"}}),
            &[],
        )
        .expect("diff succeeds");

        assert_eq!(
            diff,
            expected(&[("spec.sessionAffinity", DiffKind::Delete, true)])
        );
    }

    #[test]
    fn deletes_inside_array_elements_are_inferred() {
        let diff = diff_of(
            json!({"spec": {"ports": [{"port": 80}]}}),
            json!({"spec": {"ports": [{"port": 80, "name": "http"}]}}),
            json!({"spec": {"ports": [{"port": 80}]}}),
            json!({"spec": {"ports": [{"port": 80, "name": "http"}]}}),
            &[],
        )
        .expect("diff succeeds");

        assert_eq!(
            diff,
            expected(&[("spec.ports[0].name", DiffKind::Delete, true)])
        );
    }

    #[test]
    fn keys_missing_from_patch_outside_arrays_are_not_deletes() {
        let diff = diff_of(
            json!({"spec": {"replicas": 3}}),
            json!({"spec": {"replicas": 3, "paused": true}}),
            json!({"spec": {"replicas": 3}}),
            json!({"spec": {"replicas": 3, "paused": true}}),
            &[],
        )
        .expect("diff succeeds");

        assert!(diff.is_empty(), "unexpected diff: {diff:?}");
    }

    #[test]
    fn array_elements_are_added_and_deleted() {
        let grown = diff_of(
            json!({"spec": {"args": ["--verbose", "--port=80", "--debug"]}}),
            json!({"spec": {"args": ["--verbose", "--port=8080"]}}),
            json!({"spec": {"args": ["--verbose", "--port=80", "--debug"]}}),
            json!({"spec": {"args": ["--verbose", "--port=8080"]}}),
            &[],
        )
        .expect("diff succeeds");

        assert_eq!(
            grown,
            expected(&[
                ("spec.args[1]", DiffKind::Update, false),
                ("spec.args[2]", DiffKind::Add, false),
            ])
        );

        let shrunk = diff_of(
            json!({"spec": {"items": [{"a": 1}]}}),
            json!({"spec": {"items": [{"a": 1}, {"b": 2}]}}),
            json!({"spec": {"items": [{"a": 1}]}}),
            json!({"spec": {"items": [{"a": 1}, {"b": 2}]}}),
            &[],
        )
        .expect("diff succeeds");

        assert_eq!(
            shrunk,
            expected(&[("spec.items[1]", DiffKind::Delete, true)])
        );
    }

    #[test]
    fn short_input_arrays_are_tolerated() {
        let diff = diff_of(
            json!({"spec": {"args": ["a", "b", "c"]}}),
            json!({"spec": {"args": ["a", "x", "y"]}}),
            json!({"spec": {"args": ["a", "b"]}}),
            json!({"spec": {"args": ["a"]}}),
            &[],
        )
        .expect("diff succeeds");

        assert_eq!(diff, expected(&[("spec.args[1]", DiffKind::Update, false)]));
    }

    #[rstest]
    #[case(json!({"spec": {"selector": "app=nginx"}}), json!({"spec": {"selector": {"app": "nginx"}}}))]
    #[case(json!({"spec": {"selector": ["app"]}}), json!({"spec": {"selector": {"app": "nginx"}}}))]
    #[case(json!({"spec": {"selector": {"app": "nginx"}}}), json!({"spec": {"selector": ["app"]}}))]
    fn type_changes_are_updates(#[case] patch: Value, #[case] old_live: Value) {
        let diff = diff_of(patch.clone(), old_live.clone(), patch, old_live, &[])
            .expect("diff succeeds");

        assert_eq!(diff, expected(&[("spec.selector", DiffKind::Update, false)]));
    }

    #[rstest]
    #[case(&[".spec.clusterIP"], DiffKind::UpdateReplace)]
    #[case(&["spec.clusterIP"], DiffKind::UpdateReplace)]
    #[case(&[".spec"], DiffKind::UpdateReplace)]
    #[case(&[".spec.type", ".spec.ports"], DiffKind::Update)]
    #[case(&[], DiffKind::Update)]
    fn replacement_escalation(#[case] force_new: &[&str], #[case] kind: DiffKind) {
        let diff = diff_of(
            json!({"spec": {"clusterIP": "10.0.0.2"}}),
            json!({"spec": {"clusterIP": "10.0.0.1"}}),
            json!({"spec": {"clusterIP": "10.0.0.2"}}),
            json!({"spec": {"clusterIP": "10.0.0.1"}}),
            force_new,
        )
        .expect("diff succeeds");

        assert_eq!(diff, expected(&[("spec.clusterIP", kind, false)]));
    }

    #[test]
    fn adds_and_deletes_are_escalated() {
        let diff = diff_of(
            json!({"spec": {"volumeName": "pv-2", "storageClassName": null}}),
            json!({"spec": {"storageClassName": "fast"}}),
            json!({"spec": {"volumeName": "pv-2"}}),
            json!({"spec": {"storageClassName": "fast"}}),
            &[".spec.volumeName", ".spec.storageClassName"],
        )
        .expect("diff succeeds");

        assert_eq!(
            diff,
            expected(&[
                ("spec.storageClassName", DiffKind::DeleteReplace, true),
                ("spec.volumeName", DiffKind::AddReplace, false),
            ])
        );
        assert!(requires_replacement(&diff));
    }

    #[test]
    fn escalation_inside_arrays_uses_wildcards() {
        let diff = diff_of(
            json!({"spec": {"containers": [{"name": "web", "image": "nginx:1.27"}]}}),
            json!({"spec": {"containers": [{"name": "app", "image": "nginx:1.26"}]}}),
            json!({"spec": {"containers": [{"name": "web", "image": "nginx:1.27"}]}}),
            json!({"spec": {"containers": [{"name": "app", "image": "nginx:1.26"}]}}),
            &[".spec.containers[*].name"],
        )
        .expect("diff succeeds");

        assert_eq!(
            diff,
            expected(&[
                ("spec.containers[0].image", DiffKind::Update, false),
                ("spec.containers[0].name", DiffKind::UpdateReplace, false),
            ])
        );
    }

    #[test]
    fn reserved_characters_in_keys_are_bracketed() {
        let key = "kubectl.kubernetes.io/last-applied-configuration";
        let diff = diff_of(
            json!({"metadata": {"annotations": {key: "{}"}}}),
            json!({"metadata": {"annotations": {}}}),
            json!({"metadata": {"annotations": {key: "{}"}}}),
            json!({"metadata": {}}),
            &[],
        )
        .expect("diff succeeds");

        assert_eq!(
            diff,
            expected(&[(
                r#"metadata.annotations["kubectl.kubernetes.io/last-applied-configuration"]"#,
                DiffKind::Add,
                false
            )])
        );
    }

    #[test]
    fn shape_errors_abort_the_diff() {
        let result = diff_of(
            json!({"spec": {"ports": {"http": 80}, "replicas": 2}}),
            json!({"spec": {"ports": {"http": 8080}, "replicas": 1}}),
            json!({"spec": {"ports": {"http": 80}, "replicas": 2}}),
            json!({"spec": {"ports": {"http": 8080}, "replicas": 1}}),
            &[".spec.ports[0]"],
        );

        assert!(matches!(
            result,
            Err(SchemaQueryError::EvaluatePattern { .. })
        ));
    }

    #[test]
    #[should_panic(expected = "the merge patch must not be empty")]
    fn empty_patch_is_rejected() {
        let _ = compute_diff(&Map::new(), &Map::new(), None, None, &[]);
    }

    #[rstest]
    #[case(DiffKind::Add, DiffKind::AddReplace)]
    #[case(DiffKind::Delete, DiffKind::DeleteReplace)]
    #[case(DiffKind::Update, DiffKind::UpdateReplace)]
    #[case(DiffKind::UpdateReplace, DiffKind::UpdateReplace)]
    fn into_replace(#[case] kind: DiffKind, #[case] expected: DiffKind) {
        assert_eq!(kind.into_replace(), expected);
        assert!(expected.is_replace());
    }

    #[test]
    fn property_diff_serialization() {
        let diff = expected(&[("spec.clusterIP", DiffKind::UpdateReplace, false)]);

        assert_eq!(
            serde_json::to_value(&diff).expect("diff serializes"),
            json!({"spec.clusterIP": {"kind": "UPDATE_REPLACE", "inputDiff": false}})
        );
        assert_eq!(DiffKind::DeleteReplace.to_string(), "DELETE_REPLACE");
        assert_eq!("ADD".parse::<DiffKind>(), Ok(DiffKind::Add));
    }
}
