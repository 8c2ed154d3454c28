//! The connection registry.
//!
//! Every open source is keyed by its real (symlink-resolved) path, so the same
//! physical file is never opened twice no matter how it was reached. Each entry
//! pairs a lazily-connected, read-only pool with the [`Source`] metadata the
//! rest of the system reports on.

use crate::error::{ErrorKind, Result};
use crate::{alias, db};
use exn::ResultExt;
use parking_lot::RwLock;
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tokio::fs;

/// Metadata of one registered source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    /// Real path of the source file.
    pub path: PathBuf,
    /// Unique, human-readable label. May change when another source with a
    /// colliding alias is opened.
    pub alias: String,
    /// Last known modification time of the file.
    #[serde(with = "time::serde::rfc3339")]
    pub mtime: OffsetDateTime,
    /// Number of projects, as of the last probe.
    pub entity_count: u64,
    /// Whether the last probe succeeded. Invalid sources stay registered but
    /// are never queried.
    pub is_valid: bool,
}

/// A registered source and its read-only pool.
///
/// Cheap to clone; clones share the same pool. The embedded metadata is a
/// snapshot taken when the connection was handed out.
#[derive(Debug, Clone)]
pub struct Connection {
    pool: SqlitePool,
    source: Source,
}

impl Connection {
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    pub fn alias(&self) -> &str {
        &self.source.alias
    }

    pub fn path(&self) -> &Path {
        &self.source.path
    }
}

#[derive(Debug, Default)]
pub struct Registry {
    // Sorted so alias assignment and fan-out order are both deterministic.
    connections: RwLock<BTreeMap<PathBuf, Connection>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the source at `path`, or return the metadata of the existing
    /// connection if the same physical file is already open.
    ///
    /// Fails only if the file does not exist (or cannot be stat'ed). A file
    /// that exists but cannot be queried is registered with
    /// `is_valid = false`.
    #[tracing::instrument(level = "debug", skip_all, fields(path = %path.as_ref().display()))]
    pub async fn open(&self, path: impl AsRef<Path>) -> Result<Source> {
        let path = path.as_ref();
        let key = fs::canonicalize(path).await.unwrap_or_else(|_| path.to_path_buf());
        if let Some(existing) = self.connections.read().get(&key) {
            return Ok(existing.source.clone());
        }

        let mtime = modified(&key).await?;
        let pool = db::read_only_pool(&key);
        let (entity_count, is_valid) = match db::count_entities(&pool).await {
            Ok(count) => (count, true),
            Err(e) => {
                tracing::warn!(path = %key.display(), error = %e, "Source failed its probe, registering as invalid");
                (0, false)
            },
        };
        let source = Source {
            path: key.clone(),
            alias: String::new(),
            mtime,
            entity_count,
            is_valid,
        };

        let opened = {
            let mut connections = self.connections.write();
            match connections.get(&key) {
                // Somebody else opened the same file while we were probing.
                Some(existing) => Err(existing.source.clone()),
                None => {
                    connections.insert(key.clone(), Connection { pool: pool.clone(), source });
                    reassign_aliases(&mut connections);
                    Ok(connections[&key].source.clone())
                },
            }
        };
        match opened {
            Ok(source) => {
                tracing::info!(path = %source.path.display(), alias = %source.alias, entity_count, is_valid, "Opened source");
                Ok(source)
            },
            Err(existing) => {
                pool.close().await;
                Ok(existing)
            },
        }
    }

    /// Look up a connection by registry key or alias, falling back to the real
    /// path of `key` only when neither matches.
    ///
    /// Invalid sources are returned too; check [`Source::is_valid`] before
    /// querying.
    pub fn get(&self, key: &str) -> Option<Connection> {
        let as_path = Path::new(key);
        {
            let connections = self.connections.read();
            let found = connections
                .get(as_path)
                .or_else(|| connections.values().find(|c| c.source.alias == key));
            if let Some(found) = found {
                return Some(found.clone());
            }
        }
        // Touches the filesystem, so only for keys that are neither.
        let real = std::fs::canonicalize(as_path).ok()?;
        self.connections.read().get(&real).cloned()
    }

    /// Every valid connection, in path order.
    pub fn active(&self) -> Vec<Connection> {
        self.connections.read().values().filter(|c| c.source.is_valid).cloned().collect()
    }

    /// Metadata of every valid source, in path order.
    pub fn sources(&self) -> Vec<Source> {
        self.connections
            .read()
            .values()
            .filter(|c| c.source.is_valid)
            .map(|c| c.source.clone())
            .collect()
    }

    /// Metadata of every registered source, valid or not.
    pub fn all_sources(&self) -> Vec<Source> {
        self.connections.read().values().map(|c| c.source.clone()).collect()
    }

    /// Number of valid connections.
    pub fn connection_count(&self) -> usize {
        self.connections.read().values().filter(|c| c.source.is_valid).count()
    }

    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    /// Record a newer modification time for the source at `path`. Returns
    /// `false` if nothing is registered there.
    pub fn record_mtime(&self, path: &Path, mtime: OffsetDateTime) -> bool {
        match self.connections.write().get_mut(path) {
            Some(connection) => {
                connection.source.mtime = mtime;
                true
            },
            None => false,
        }
    }

    /// Re-probe the source at `path` and update its entity count.
    ///
    /// A failed probe is logged and leaves the metadata as it was; a source
    /// caught mid-write must not drop out of fan-out. A previously invalid
    /// source that now probes cleanly becomes valid.
    pub async fn refresh(&self, path: &Path) -> Option<Source> {
        let pool = self.connections.read().get(path).map(|c| c.pool.clone())?;
        let probe = db::count_entities(&pool).await;
        let mut connections = self.connections.write();
        let connection = connections.get_mut(path)?;
        match probe {
            Ok(count) => {
                connection.source.entity_count = count;
                connection.source.is_valid = true;
            },
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "Source probe failed during refresh"),
        }
        Some(connection.source.clone())
    }

    /// Close and forget one source. Remaining aliases are left untouched.
    pub async fn close(&self, key: &str) -> bool {
        let Some(path) = self.get(key).map(|c| c.source.path) else {
            return false;
        };
        let removed = self.connections.write().remove(&path);
        match removed {
            Some(connection) => {
                connection.pool.close().await;
                tracing::info!(path = %path.display(), alias = %connection.source.alias, "Closed source");
                true
            },
            None => false,
        }
    }

    /// Close every source, returning the paths that were open.
    pub async fn close_all(&self) -> Vec<PathBuf> {
        let connections = std::mem::take(&mut *self.connections.write());
        let mut paths = Vec::with_capacity(connections.len());
        for (path, connection) in connections {
            connection.pool.close().await;
            paths.push(path);
        }
        tracing::debug!(count = paths.len(), "Closed all sources");
        paths
    }

    /// Close everything, then open every previously known path again.
    /// Paths that can no longer be opened are skipped.
    pub async fn reopen_all(&self) -> Vec<Source> {
        let paths = self.close_all().await;
        let mut reopened = Vec::with_capacity(paths.len());
        for path in paths {
            match self.open(&path).await {
                Ok(source) => reopened.push(source),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Source could not be reopened"),
            }
        }
        reopened
    }
}

/// Modification time of the file at `path`.
pub async fn modified(path: &Path) -> Result<OffsetDateTime> {
    let metadata = match fs::metadata(path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => exn::bail!(ErrorKind::NotFound(path.to_path_buf())),
        Err(e) => return Err(e).or_raise(|| ErrorKind::Io),
    };
    let modified = metadata.modified().or_raise(|| ErrorKind::Io)?;
    Ok(OffsetDateTime::from(modified))
}

fn reassign_aliases(connections: &mut BTreeMap<PathBuf, Connection>) {
    let aliases = alias::assign(connections.keys().map(PathBuf::as_path));
    for (connection, alias) in connections.values_mut().zip(aliases) {
        if connection.source.alias == alias {
            continue;
        }
        if !connection.source.alias.is_empty() {
            tracing::info!(
                path = %connection.source.path.display(),
                from = %connection.source.alias,
                to = %alias,
                "Source alias changed",
            );
        }
        connection.source.alias = alias;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use std::collections::HashSet;

    #[tokio::test]
    async fn test_open_is_idempotent() {
        let temp = tempfile::tempdir().unwrap();
        let path = fixtures::create_source(&temp.path().join("selectus")).await.unwrap();
        let registry = Registry::new();

        let first = registry.open(&path).await.unwrap();
        let second = registry.open(&path).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(registry.len(), 1);
        assert_eq!(first.alias, "selectus");
        assert!(first.is_valid);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_open_through_symlink_reuses_connection() {
        let temp = tempfile::tempdir().unwrap();
        let path = fixtures::create_source(&temp.path().join("real")).await.unwrap();
        let link = temp.path().join("link");
        std::os::unix::fs::symlink(temp.path().join("real"), &link).unwrap();
        let registry = Registry::new();

        let direct = registry.open(&path).await.unwrap();
        let linked = registry.open(link.join(".conductor/conductor.db")).await.unwrap();
        assert_eq!(direct, linked);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_open_missing_file_fails() {
        let temp = tempfile::tempdir().unwrap();
        let registry = Registry::new();
        let err = registry.open(temp.path().join("nope/.conductor/conductor.db")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_unqueryable_source_is_registered_invalid() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("broken/.conductor/conductor.db");
        fixtures::create_database(&path, "CREATE TABLE unrelated (id INTEGER);").await.unwrap();
        let registry = Registry::new();

        let source = registry.open(&path).await.unwrap();
        assert!(!source.is_valid);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.connection_count(), 0);
        assert!(registry.active().is_empty());
        assert_eq!(registry.all_sources().len(), 1);
    }

    #[tokio::test]
    async fn test_aliases_are_order_independent() {
        let temp = tempfile::tempdir().unwrap();
        let one = fixtures::create_source(&temp.path().join("r1/app")).await.unwrap();
        let two = fixtures::create_source(&temp.path().join("r2/app")).await.unwrap();

        let forward = Registry::new();
        forward.open(&one).await.unwrap();
        forward.open(&two).await.unwrap();
        let backward = Registry::new();
        backward.open(&two).await.unwrap();
        backward.open(&one).await.unwrap();

        let aliases = |registry: &Registry| registry.sources().into_iter().map(|s| s.alias).collect::<Vec<_>>();
        assert_eq!(aliases(&forward), vec!["app", "r2/app"]);
        assert_eq!(aliases(&forward), aliases(&backward));
    }

    #[tokio::test]
    async fn test_three_roots_alias_scenario() {
        let temp = tempfile::tempdir().unwrap();
        let paths = [
            fixtures::create_source(&temp.path().join("r1/app")).await.unwrap(),
            fixtures::create_source(&temp.path().join("r2/app")).await.unwrap(),
            fixtures::create_source(&temp.path().join("r3/root")).await.unwrap(),
        ];
        let registry = Registry::new();
        for path in &paths {
            registry.open(path).await.unwrap();
        }
        let aliases: HashSet<String> = registry.sources().into_iter().map(|s| s.alias).collect();
        assert_eq!(aliases, HashSet::from(["app".to_string(), "r2/app".to_string(), "root".to_string()]));
    }

    #[tokio::test]
    async fn test_get_by_path_and_alias() {
        let temp = tempfile::tempdir().unwrap();
        let path = fixtures::create_source(&temp.path().join("selectus")).await.unwrap();
        let registry = Registry::new();
        let source = registry.open(&path).await.unwrap();

        let by_alias = registry.get("selectus").unwrap();
        assert_eq!(by_alias.path(), source.path);
        let by_path = registry.get(path.to_str().unwrap()).unwrap();
        assert_eq!(by_path.alias(), "selectus");
        assert!(registry.get("unknown").is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_get_through_symlinked_path() {
        let temp = tempfile::tempdir().unwrap();
        let path = fixtures::create_source(&temp.path().join("real")).await.unwrap();
        let link = temp.path().join("link");
        std::os::unix::fs::symlink(temp.path().join("real"), &link).unwrap();
        let registry = Registry::new();
        registry.open(&path).await.unwrap();

        let linked = link.join(".conductor/conductor.db");
        let found = registry.get(linked.to_str().unwrap()).unwrap();
        assert_eq!(found.alias(), "real");
        assert_eq!(registry.get("real").unwrap().path(), found.path());
        assert!(registry.get(link.join("missing.db").to_str().unwrap()).is_none());
    }

    #[tokio::test]
    async fn test_close_keeps_surviving_aliases() {
        let temp = tempfile::tempdir().unwrap();
        let one = fixtures::create_source(&temp.path().join("r1/app")).await.unwrap();
        let two = fixtures::create_source(&temp.path().join("r2/app")).await.unwrap();
        let registry = Registry::new();
        registry.open(&one).await.unwrap();
        registry.open(&two).await.unwrap();

        assert!(registry.close("app").await);
        assert!(!registry.close("app").await);
        let remaining = registry.sources();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].alias, "r2/app");
    }

    #[tokio::test]
    async fn test_reopen_all_skips_vanished_sources() {
        let temp = tempfile::tempdir().unwrap();
        let kept = fixtures::create_source(&temp.path().join("kept")).await.unwrap();
        let gone = fixtures::create_source(&temp.path().join("gone")).await.unwrap();
        let registry = Registry::new();
        registry.open(&kept).await.unwrap();
        registry.open(&gone).await.unwrap();

        std::fs::remove_dir_all(temp.path().join("gone")).unwrap();
        let reopened = registry.reopen_all().await;
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened[0].alias, "kept");
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_refresh_updates_entity_count() {
        let temp = tempfile::tempdir().unwrap();
        let path = fixtures::create_source(&temp.path().join("app")).await.unwrap();
        let registry = Registry::new();
        let source = registry.open(&path).await.unwrap();
        assert_eq!(source.entity_count, 0);

        fixtures::seed(&path, "INSERT INTO projects (id, name, project_type) VALUES ('p1', 'one', 'web');")
            .await
            .unwrap();
        let refreshed = registry.refresh(&source.path).await.unwrap();
        assert_eq!(refreshed.entity_count, 1);
    }

    #[tokio::test]
    async fn test_record_mtime() {
        let temp = tempfile::tempdir().unwrap();
        let path = fixtures::create_source(&temp.path().join("app")).await.unwrap();
        let registry = Registry::new();
        let source = registry.open(&path).await.unwrap();
        let later = source.mtime + time::Duration::seconds(10);

        assert!(registry.record_mtime(&source.path, later));
        assert_eq!(registry.sources()[0].mtime, later);
        assert!(!registry.record_mtime(Path::new("/nowhere"), later));
    }
}
