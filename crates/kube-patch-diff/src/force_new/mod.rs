//! Detection of property changes which cannot be applied in place.
//!
//! Some fields of Kubernetes objects are immutable, changing them requires the object to be
//! replaced. These fields are described by [`ForceNewPattern`]s, which are looked up per
//! group, version and kind in a [`ForceNewDatabase`].

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use kube::core::{GroupVersion, GroupVersionKind, gvk::ParseGroupVersionError};
use serde::Deserialize;
use serde_json::Value;
use snafu::{OptionExt, ResultExt, Snafu};

mod pattern;

pub use pattern::{ForceNewPattern, ParsePatternError, ShapeError};

const BUILTIN_FORCE_NEW_FIELDS: &str = include_str!("builtin.yaml");

/// Fields which are immutable on every kind.
const METADATA_FORCE_NEW_FIELDS: [&str; 2] = [".metadata.name", ".metadata.namespace"];

#[derive(Debug, Snafu)]
pub enum SchemaQueryError {
    #[snafu(display("failed to parse force-new pattern {pattern:?}"))]
    ParsePattern {
        source: ParsePatternError,
        pattern: String,
    },

    #[snafu(display("failed to evaluate force-new pattern {pattern:?}"))]
    EvaluatePattern { source: ShapeError, pattern: String },
}

#[derive(Debug, Snafu)]
pub enum ForceNewDatabaseError {
    #[snafu(display("failed to read force-new configuration from {path:?}"))]
    ReadConfig {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to parse force-new configuration"))]
    ParseConfig { source: serde_yaml::Error },

    #[snafu(display("object has no {field:?} field"))]
    MissingTypeInformation { field: &'static str },

    #[snafu(display("failed to parse apiVersion {api_version:?}"))]
    ParseApiVersion {
        source: ParseGroupVersionError,
        api_version: String,
    },
}

/// Parses every pattern, failing on the first malformed one.
pub fn parse_patterns<I, S>(patterns: I) -> Result<Vec<ForceNewPattern>, SchemaQueryError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    patterns
        .into_iter()
        .map(|pattern| {
            let pattern = pattern.as_ref();
            pattern.parse().context(ParsePatternSnafu { pattern })
        })
        .collect()
}

/// Returns the patterns which select at least one value of `document`.
///
/// `document` is usually built with [`PropertyPath::to_document`](crate::diff::PropertyPath::to_document)
/// and only contains the path of a single changed property.
pub fn match_force_new_paths<'p>(
    document: &Value,
    patterns: &'p [ForceNewPattern],
) -> Result<Vec<&'p ForceNewPattern>, SchemaQueryError> {
    let mut matched = Vec::new();

    for pattern in patterns {
        let is_match = pattern.matches(document).context(EvaluatePatternSnafu {
            pattern: pattern.as_str(),
        })?;
        if is_match {
            matched.push(pattern);
        }
    }

    Ok(matched)
}

type KindTable = BTreeMap<String, Vec<ForceNewPattern>>;
type VersionTable = BTreeMap<String, KindTable>;

/// Replace-triggering fields per group, version and kind.
///
/// The configuration format is a nested YAML map, the core group is the empty string:
///
/// ```yaml
/// "":
///   v1:
///     Service:
///       - ".spec.clusterIP"
/// apps:
///   v1:
///     StatefulSet:
///       - ".spec.volumeClaimTemplates"
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct ForceNewDatabase {
    groups: BTreeMap<String, VersionTable>,
}

impl ForceNewDatabase {
    /// The database of well-known immutable fields of the built-in Kubernetes kinds.
    pub fn builtin() -> Self {
        serde_yaml::from_str(BUILTIN_FORCE_NEW_FIELDS)
            .expect("the built-in force-new table must be valid")
    }

    /// Loads additional entries from the YAML file at `path` on top of [`Self::builtin`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ForceNewDatabaseError> {
        let path = path.as_ref();
        let config = std::fs::read_to_string(path).context(ReadConfigSnafu { path })?;

        let database = Self::builtin().with_overrides(&config)?;
        tracing::debug!(path = %path.display(), "loaded force-new configuration");

        Ok(database)
    }

    /// Appends the entries of the YAML document `config` to this database.
    ///
    /// Patterns which are already known for a kind are not added twice.
    pub fn with_overrides(mut self, config: &str) -> Result<Self, ForceNewDatabaseError> {
        let overrides: Self = serde_yaml::from_str(config).context(ParseConfigSnafu)?;

        for (group, versions) in overrides.groups {
            let known_versions = self.groups.entry(group).or_default();
            for (version, kinds) in versions {
                let known_kinds = known_versions.entry(version).or_default();
                for (kind, patterns) in kinds {
                    let known_patterns = known_kinds.entry(kind).or_default();
                    for pattern in patterns {
                        if !known_patterns.contains(&pattern) {
                            known_patterns.push(pattern);
                        }
                    }
                }
            }
        }

        Ok(self)
    }

    /// Returns the replace-triggering patterns for objects of the given kind.
    ///
    /// The metadata fields `name` and `namespace` come first and apply to every kind.
    pub fn patterns_for(&self, gvk: &GroupVersionKind) -> Vec<ForceNewPattern> {
        let kind_patterns = self
            .groups
            .get(&gvk.group)
            .and_then(|versions| versions.get(&gvk.version))
            .and_then(|kinds| kinds.get(&gvk.kind))
            .map(Vec::as_slice)
            .unwrap_or_default();

        metadata_patterns()
            .chain(kind_patterns.iter().cloned())
            .collect()
    }

    /// Determines the group, version and kind of a Kubernetes object.
    pub fn gvk_of(object: &Value) -> Result<GroupVersionKind, ForceNewDatabaseError> {
        let api_version = object
            .get("apiVersion")
            .and_then(Value::as_str)
            .context(MissingTypeInformationSnafu {
                field: "apiVersion",
            })?;
        let kind = object
            .get("kind")
            .and_then(Value::as_str)
            .context(MissingTypeInformationSnafu { field: "kind" })?;

        let group_version: GroupVersion = api_version
            .parse()
            .context(ParseApiVersionSnafu { api_version })?;

        Ok(GroupVersionKind::gvk(
            &group_version.group,
            &group_version.version,
            kind,
        ))
    }
}

fn metadata_patterns() -> impl Iterator<Item = ForceNewPattern> {
    METADATA_FORCE_NEW_FIELDS.into_iter().map(|pattern| {
        pattern
            .parse()
            .expect("metadata force-new patterns must be valid")
    })
}
