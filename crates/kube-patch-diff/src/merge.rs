//! Merging of values which are grouped under the same key.

use std::hash::Hash;

use indexmap::IndexMap;

/// Values collected under a single key, e.g. the hostnames of one IP address in a list of
/// host aliases.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyedValues<K, V> {
    pub key: K,
    pub values: Vec<V>,
}

/// Merges all entries sharing a key into a single [`KeyedValues`].
///
/// Keys keep the order in which they first appear, values keep their input order. Entries
/// without a key are skipped.
///
/// ```
/// use kube_patch_diff::merge::{KeyedValues, merge_by_key};
///
/// let merged = merge_by_key([
///     (Some("192.168.0.1"), vec!["web"]),
///     (None, vec!["ignored"]),
///     (Some("192.168.0.2"), vec!["db"]),
///     (Some("192.168.0.1"), vec!["api"]),
/// ]);
///
/// assert_eq!(merged, vec![
///     KeyedValues { key: "192.168.0.1", values: vec!["web", "api"] },
///     KeyedValues { key: "192.168.0.2", values: vec!["db"] },
/// ]);
/// ```
pub fn merge_by_key<K, V, I>(entries: I) -> Vec<KeyedValues<K, V>>
where
    K: Hash + Eq,
    I: IntoIterator<Item = (Option<K>, Vec<V>)>,
{
    let mut merged: IndexMap<K, Vec<V>> = IndexMap::new();

    for (key, values) in entries {
        let Some(key) = key else {
            continue;
        };
        merged.entry(key).or_default().extend(values);
    }

    merged
        .into_iter()
        .map(|(key, values)| KeyedValues { key, values })
        .collect()
}
