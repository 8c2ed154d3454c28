//! Alias derivation.
//!
//! An alias is the directory name immediately above the marker directory:
//! `/work/selectus/.conductor/conductor.db` is `selectus`. When two open
//! sources derive the same alias, one of them is extended with parent
//! segments (`work/selectus`) until it is unique.
//!
//! Assignment is a function of the *set* of paths, not of the order they were
//! opened in: paths are visited in sorted order and each one takes its
//! shortest candidate that nobody earlier has claimed.

use crate::{FALLBACK_ALIAS, MARKER_DIR};
use std::collections::HashSet;
use std::path::{Component, Path};

/// The preferred (unextended) alias for a source path.
///
/// Does not consider collisions; see [`Registry`](crate::Registry) for the
/// unique alias actually assigned to an open source.
pub fn derive_alias(path: &Path) -> String {
    candidates(path).into_iter().next().unwrap_or_else(|| FALLBACK_ALIAS.to_string())
}

/// Candidate aliases for `path`, shortest first.
///
/// The final candidate is the full path itself, which is unique among
/// canonical paths, so assignment can never run out of options.
pub(crate) fn candidates(path: &Path) -> Vec<String> {
    let mut parents = Vec::new();
    let mut marker_found = false;
    for component in path.components() {
        match component {
            Component::Normal(segment) if segment == MARKER_DIR => {
                marker_found = true;
                break;
            },
            Component::Normal(segment) => parents.push(segment.to_string_lossy().into_owned()),
            Component::ParentDir => {
                parents.pop();
            },
            Component::RootDir | Component::Prefix(_) | Component::CurDir => {},
        }
    }
    let full = path.display().to_string();
    if !marker_found || parents.is_empty() {
        return vec![FALLBACK_ALIAS.to_string(), full];
    }
    let mut candidates: Vec<String> =
        (1..=parents.len()).map(|n| parents[parents.len() - n..].join("/")).collect();
    candidates.push(full);
    candidates
}

/// Assign unique aliases to `paths`, returned in the same order.
///
/// Callers must pass paths in a deterministic (sorted) order to get
/// order-independent results.
pub(crate) fn assign<'a>(paths: impl IntoIterator<Item = &'a Path>) -> Vec<String> {
    let mut taken = HashSet::new();
    paths
        .into_iter()
        .map(|path| {
            let alias = candidates(path)
                .into_iter()
                .find(|candidate| !taken.contains(candidate))
                // Only reachable if the same path was passed twice.
                .unwrap_or_else(|| format!("{}#{}", path.display(), taken.len()));
            taken.insert(alias.clone());
            alias
        })
        .collect()
}
