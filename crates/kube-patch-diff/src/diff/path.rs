use std::fmt::{self, Display, Write as _};

use serde_json::{Map, Value};

/// Characters which force a key to be rendered in the bracketed `["key"]` form.
const RESERVED_KEY_CHARACTERS: [char; 4] = ['.', '"', '[', ']'];

/// A single step of a [`PropertyPath`].
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub enum PathSegment {
    /// The key of an object property.
    Key(String),

    /// The index of an array element.
    Index(usize),
}

impl From<&str> for PathSegment {
    fn from(key: &str) -> Self {
        Self::Key(key.to_owned())
    }
}

impl From<String> for PathSegment {
    fn from(key: String) -> Self {
        Self::Key(key)
    }
}

impl From<usize> for PathSegment {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

/// The location of a property inside an object tree.
///
/// The [`Display`] implementation renders the path in the format consumers of detailed diffs
/// expect:
///
/// - keys are joined with `.`, e.g. `spec.replicas`
/// - keys containing `.`, `"`, `[` or `]` are rendered as `["key"]` with `"` escaped as `\"`
/// - array indices are rendered as `[N]`
///
/// ```
/// use kube_patch_diff::diff::{PathSegment, PropertyPath};
///
/// let path = PropertyPath::from_iter([
///     PathSegment::from("metadata"),
///     PathSegment::from("annotations"),
///     PathSegment::from("app.kubernetes.io/name"),
/// ]);
/// assert_eq!(path.to_string(), r#"metadata.annotations["app.kubernetes.io/name"]"#);
/// ```
#[derive(Clone, Debug, Default, Hash, PartialEq, Eq)]
pub struct PropertyPath(Vec<PathSegment>);

impl PropertyPath {
    /// The empty path, pointing at the object itself.
    pub fn root() -> Self {
        Self::default()
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns a new path extended by `segment`.
    pub fn child(&self, segment: impl Into<PathSegment>) -> Self {
        let mut segments = Vec::with_capacity(self.0.len() + 1);
        segments.extend_from_slice(&self.0);
        segments.push(segment.into());
        Self(segments)
    }

    /// Builds a document which only contains this path, terminating in `leaf`.
    ///
    /// Keys turn into single-entry objects and indices into single-element arrays, so the
    /// document can be queried with force-new patterns the same way the full object could.
    pub fn to_document(&self, leaf: Value) -> Value {
        self.0
            .iter()
            .rev()
            .fold(leaf, |value, segment| match segment {
                PathSegment::Key(key) => Value::Object(Map::from_iter([(key.clone(), value)])),
                PathSegment::Index(_) => Value::Array(vec![value]),
            })
    }
}

impl<S> FromIterator<S> for PropertyPath
where
    S: Into<PathSegment>,
{
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Tracks whether anything has been rendered yet, an empty leading key renders nothing.
        let mut rendered = false;

        for segment in &self.0 {
            match segment {
                PathSegment::Key(key) if key.contains(RESERVED_KEY_CHARACTERS) => {
                    write!(f, r#"["{}"]"#, key.replace('"', r#"\""#))?;
                    rendered = true;
                }
                PathSegment::Key(key) => {
                    if rendered {
                        f.write_char('.')?;
                    }
                    f.write_str(key)?;
                    rendered |= !key.is_empty();
                }
                PathSegment::Index(index) => {
                    write!(f, "[{index}]")?;
                    rendered = true;
                }
            }
        }

        Ok(())
    }
}
