//! Filesystem discovery of sources.

use crate::error::{ErrorKind, Result};
use crate::{MARKER_DIR, REQUIRED_TABLES, SOURCE_FILE, db, derive_alias};
use exn::ResultExt;
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Compiled exclude patterns.
///
/// A pattern without `*` matches a directory name exactly. A pattern with
/// `*` is a glob over the whole name where `*` matches any run of characters.
#[derive(Debug, Clone, Default)]
pub struct Exclusions {
    exact: HashSet<String>,
    globs: Vec<Regex>,
}

impl Exclusions {
    pub fn new<S: AsRef<str>>(patterns: impl IntoIterator<Item = S>) -> Result<Self> {
        let mut exclusions = Self::default();
        for pattern in patterns {
            let pattern = pattern.as_ref();
            if pattern.contains('*') {
                let body = pattern.split('*').map(regex::escape).collect::<Vec<_>>().join(".*");
                let regex =
                    Regex::new(&format!("^{body}$")).or_raise(|| ErrorKind::Pattern(pattern.to_string()))?;
                exclusions.globs.push(regex);
            } else {
                exclusions.exact.insert(pattern.to_string());
            }
        }
        Ok(exclusions)
    }

    pub fn is_excluded(&self, name: &str) -> bool {
        self.exact.contains(name) || self.globs.iter().any(|glob| glob.is_match(name))
    }
}

/// A discovered source with probe results, for presenting to a user before
/// anything is opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredSource {
    pub path: PathBuf,
    pub alias: String,
    pub entity_count: u64,
    pub is_valid: bool,
}

/// Does the file at `path` exist, open as SQLite, and contain every required
/// table? Any failure along the way simply means "no".
pub async fn validate_source(path: &Path) -> bool {
    if !is_file(path).await {
        return false;
    }
    match db::table_names(path).await {
        Ok(tables) => REQUIRED_TABLES.iter().all(|table| tables.contains(*table)),
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "Candidate source could not be read");
            false
        },
    }
}

/// Walk `roots` looking for `<dir>/.conductor/conductor.db`.
///
/// Each root is depth 0; directories deeper than `max_depth` are neither
/// checked nor descended into. Hidden directories (and so the marker
/// directory itself), excluded names and symlinks are never descended into.
/// Unreadable directories are skipped. Roots that are missing or not
/// directories contribute nothing.
///
/// Results are returned in a stable, depth-first, name-sorted order and
/// deduplicated by real path: when two paths resolve to the same file, the
/// first one encountered is kept as given.
#[tracing::instrument(level = "debug", skip_all, fields(roots = roots.len(), max_depth = max_depth))]
pub async fn discover<S: AsRef<str>>(
    roots: &[PathBuf],
    exclude_patterns: &[S],
    max_depth: usize,
) -> Result<Vec<PathBuf>> {
    let exclusions = Exclusions::new(exclude_patterns)?;
    let mut found = Vec::new();
    for root in roots {
        if !fs::metadata(root).await.is_ok_and(|meta| meta.is_dir()) {
            tracing::debug!(root = %root.display(), "Scan path is not a directory, skipping");
            continue;
        }
        let mut stack = vec![(root.clone(), 0usize)];
        while let Some((dir, depth)) = stack.pop() {
            if depth > max_depth {
                continue;
            }
            let candidate = dir.join(MARKER_DIR).join(SOURCE_FILE);
            if validate_source(&candidate).await {
                tracing::debug!(path = %candidate.display(), "Found source");
                found.push(candidate);
            }
            let mut children = subdirectories(&dir, &exclusions).await;
            children.sort();
            // Reverse so that popping visits children in ascending order.
            stack.extend(children.into_iter().rev().map(|child| (child, depth + 1)));
        }
    }
    let mut seen = HashSet::new();
    let mut unique = Vec::with_capacity(found.len());
    for path in found {
        let real = fs::canonicalize(&path).await.unwrap_or_else(|_| path.clone());
        if seen.insert(real) {
            unique.push(path);
        }
    }
    tracing::info!(count = unique.len(), "Discovery complete");
    Ok(unique)
}

/// [`discover`], then probe every result for its entity count.
pub async fn discover_detailed<S: AsRef<str>>(
    roots: &[PathBuf],
    exclude_patterns: &[S],
    max_depth: usize,
) -> Result<Vec<DiscoveredSource>> {
    let paths = discover(roots, exclude_patterns, max_depth).await?;
    let mut detailed = Vec::with_capacity(paths.len());
    for path in paths {
        let (entity_count, is_valid) = match db::probe(&path).await {
            Ok(count) => (count, true),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Discovered source failed its probe");
                (0, false)
            },
        };
        detailed.push(DiscoveredSource {
            alias: derive_alias(&path),
            path,
            entity_count,
            is_valid,
        });
    }
    Ok(detailed)
}

async fn is_file(path: &Path) -> bool {
    fs::metadata(path).await.is_ok_and(|meta| meta.is_file())
}

async fn subdirectories(dir: &Path, exclusions: &Exclusions) -> Vec<PathBuf> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            tracing::debug!(dir = %dir.display(), error = %e, "Skipping unreadable directory");
            return Vec::new();
        },
    };
    let mut children = Vec::new();
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(dir = %dir.display(), error = %e, "Stopped reading directory early");
                break;
            },
        };
        // DirEntry::file_type does not follow symlinks.
        if !entry.file_type().await.is_ok_and(|kind| kind.is_dir()) {
            continue;
        }
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with('.') || exclusions.is_excluded(&name) {
            continue;
        }
        children.push(entry.path());
    }
    children
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use rstest::rstest;

    #[rstest]
    #[case("node_modules", "node_modules", true)]
    #[case("node_modules", "node_modules2", false)]
    #[case("*.tmp", "scratch.tmp", true)]
    #[case("*.tmp", "scratch.tmpx", false)]
    #[case("build-*", "build-2024", true)]
    #[case("a.b*", "axb", false)]
    fn test_exclusions(#[case] pattern: &str, #[case] name: &str, #[case] excluded: bool) {
        let exclusions = Exclusions::new([pattern]).unwrap();
        assert_eq!(exclusions.is_excluded(name), excluded);
    }

    #[tokio::test]
    async fn test_discover_finds_sources_in_stable_order() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().to_path_buf();
        fixtures::create_source(&root.join("zeta")).await.unwrap();
        fixtures::create_source(&root.join("alpha")).await.unwrap();
        fixtures::create_source(&root.join("alpha/nested")).await.unwrap();

        let found = discover(&[root.clone()], &["node_modules"], 5).await.unwrap();
        assert_eq!(
            found,
            vec![
                root.join("alpha/.conductor/conductor.db"),
                root.join("alpha/nested/.conductor/conductor.db"),
                root.join("zeta/.conductor/conductor.db"),
            ]
        );
    }

    #[tokio::test]
    async fn test_discover_respects_exclusions_and_hidden_directories() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().to_path_buf();
        fixtures::create_source(&root.join("node_modules/pkg")).await.unwrap();
        fixtures::create_source(&root.join(".hidden/app")).await.unwrap();
        fixtures::create_source(&root.join("cache.tmp/app")).await.unwrap();
        fixtures::create_source(&root.join("kept")).await.unwrap();

        let found = discover(&[root.clone()], &["node_modules", "*.tmp"], 5).await.unwrap();
        assert_eq!(found, vec![root.join("kept/.conductor/conductor.db")]);
    }

    #[tokio::test]
    async fn test_discover_depth_limit() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().to_path_buf();
        fixtures::create_source(&root).await.unwrap();
        fixtures::create_source(&root.join("one")).await.unwrap();
        fixtures::create_source(&root.join("one/two")).await.unwrap();

        let found = discover(&[root.clone()], &[] as &[&str], 1).await.unwrap();
        assert_eq!(found.len(), 2);
        let found = discover(&[root.clone()], &[] as &[&str], 0).await.unwrap();
        assert_eq!(found, vec![root.join(".conductor/conductor.db")]);
    }

    #[tokio::test]
    async fn test_discover_skips_invalid_files() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().to_path_buf();
        let partial = root.join("partial/.conductor/conductor.db");
        fixtures::create_database(&partial, "CREATE TABLE projects (id TEXT PRIMARY KEY);").await.unwrap();
        let garbage = root.join("garbage/.conductor/conductor.db");
        std::fs::create_dir_all(garbage.parent().unwrap()).unwrap();
        std::fs::write(&garbage, b"not sqlite at all, not even slightly").unwrap();

        assert!(!validate_source(&partial).await);
        assert!(!validate_source(&garbage).await);
        assert!(discover(&[root], &[] as &[&str], 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_discover_ignores_missing_roots() {
        let temp = tempfile::tempdir().unwrap();
        let found = discover(&[temp.path().join("missing")], &[] as &[&str], 5).await.unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_discover_deduplicates_overlapping_roots() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().to_path_buf();
        fixtures::create_source(&root.join("app")).await.unwrap();

        let found = discover(&[root.clone(), root.join("app")], &[] as &[&str], 5).await.unwrap();
        assert_eq!(found, vec![root.join("app/.conductor/conductor.db")]);
    }

    #[tokio::test]
    async fn test_discover_detailed_probes_each_source() {
        let temp = tempfile::tempdir().unwrap();
        let path = fixtures::create_source(&temp.path().join("selectus")).await.unwrap();
        fixtures::seed(&path, "INSERT INTO projects (id, name, project_type) VALUES ('p1', 'one', 'web');")
            .await
            .unwrap();

        let detailed = discover_detailed(&[temp.path().to_path_buf()], &[] as &[&str], 5).await.unwrap();
        assert_eq!(
            detailed,
            vec![DiscoveredSource {
                path,
                alias: "selectus".to_string(),
                entity_count: 1,
                is_valid: true,
            }]
        );
    }
}
