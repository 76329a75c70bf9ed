//! Detailed property diffs for Kubernetes objects.
//!
//! Given the merge patch between the previous live state of an object and its desired state,
//! [`compute_diff`] reports which user-declared properties are added, deleted or updated and
//! whether any of them can only be changed by replacing the object. The replacement rules are
//! looked up per kind in a [`ForceNewDatabase`].

pub mod diff;
pub mod force_new;
pub mod last_applied;
pub mod logging;
pub mod merge;
pub mod merge_patch;

pub use diff::{DetailedDiff, DiffKind, PropertyDiff, compute_diff, requires_replacement};
pub use force_new::{ForceNewDatabase, ForceNewPattern};
pub use k8s_openapi;
pub use kube;
