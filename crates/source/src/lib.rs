//! Discovery and connection registry for Conductor sources.
//!
//! A *source* is an independently-owned SQLite file living at
//! `<project>/.conductor/conductor.db`, written to by some other process. This
//! crate finds them and keeps read-only handles to them:
//!
//! - [`discover`] walks scan roots and returns validated source paths, in a
//!   stable order, deduplicated by real path.
//! - [`Registry`] opens sources (once per physical file), derives a short,
//!   unique, human-readable alias for each one, and tracks the metadata the
//!   sync engine needs (modification time, entity count, validity).
//! - [`with_write_connection`] is the narrow escape hatch for a single
//!   mutation: a separate read-write handle that is never pooled or cached.

mod alias;
mod db;
mod discovery;
pub mod error;
#[cfg(any(test, feature = "fixtures"))]
pub mod fixtures;
mod registry;

pub use crate::alias::derive_alias;
pub use crate::db::with_write_connection;
pub use crate::discovery::{DiscoveredSource, Exclusions, discover, discover_detailed, validate_source};
pub use crate::registry::{Connection, Registry, Source, modified};
use std::path::{Path, PathBuf};

/// Directory (below a project directory) that holds the source file.
pub const MARKER_DIR: &str = ".conductor";
/// Name of the source file inside [`MARKER_DIR`].
pub const SOURCE_FILE: &str = "conductor.db";
/// Alias used when a path has no segment above [`MARKER_DIR`].
pub const FALLBACK_ALIAS: &str = "root";
/// Tables a file must contain to be considered a source.
pub const REQUIRED_TABLES: &[&str] = &[
    "projects",
    "sessions",
    "features",
    "memories",
    "handoffs",
    "commits",
    "feature_errors",
    "quality_reflections",
];

/// Project directory owning a source file.
///
/// `/work/selectus/.conductor/conductor.db` becomes `/work/selectus`. Paths
/// without a marker segment are returned unchanged.
pub fn project_dir(source_path: &Path) -> PathBuf {
    let mut project = PathBuf::new();
    for component in source_path.components() {
        if component.as_os_str() == MARKER_DIR {
            return project;
        }
        project.push(component);
    }
    source_path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("/work/selectus/.conductor/conductor.db", "/work/selectus")]
    #[case("/work/.conductor/conductor.db", "/work")]
    #[case("/elsewhere/file.db", "/elsewhere/file.db")]
    fn test_project_dir(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(project_dir(Path::new(input)), PathBuf::from(expected));
    }
}
