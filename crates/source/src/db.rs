//! Connection options and the handful of raw statements this crate runs.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use futures::future::BoxFuture;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions};
use sqlx::{ConnectOptions, Connection as _, SqliteExecutor};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tokio::fs;

// Sources are read by one request at a time plus the odd background tick.
const MAX_CONNECTIONS: u32 = 4;
// The external writer holds the lock for short bursts; wait it out rather than
// failing the read.
const BUSY_TIMEOUT: Duration = Duration::from_millis(1500);

fn base_options(path: &Path) -> SqliteConnectOptions {
    SqliteConnectOptions::new().filename(path).busy_timeout(BUSY_TIMEOUT)
}

/// A read-only pool for `path`.
///
/// Connects lazily: nothing touches the file until the first query, so an
/// unreadable file surfaces as a failed probe rather than a failed open.
pub(crate) fn read_only_pool(path: &Path) -> SqlitePool {
    SqlitePoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .connect_lazy_with(base_options(path).read_only(true))
}

/// Number of projects in a source, used both as a validity probe and as the
/// headline entity count.
pub(crate) async fn count_entities<'e>(executor: impl SqliteExecutor<'e>) -> sqlx::Result<u64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM projects").fetch_one(executor).await?;
    Ok(u64::try_from(count).unwrap_or_default())
}

/// Open a short-lived read-only connection and count entities.
pub(crate) async fn probe(path: &Path) -> sqlx::Result<u64> {
    let mut conn = base_options(path).read_only(true).connect().await?;
    let count = count_entities(&mut conn).await;
    _ = conn.close().await;
    count
}

/// Names of every table in the file at `path`.
pub(crate) async fn table_names(path: &Path) -> sqlx::Result<HashSet<String>> {
    let mut conn = base_options(path).read_only(true).connect().await?;
    let names: sqlx::Result<Vec<String>> =
        sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'table'").fetch_all(&mut conn).await;
    _ = conn.close().await;
    Ok(names?.into_iter().collect())
}

/// Run a single mutation against the source at `path`.
///
/// Opens a dedicated read-write connection outside of any pool, hands it to
/// `f`, and closes it again before returning. Nothing about this connection is
/// cached or shared, and the file is never created if it is missing.
///
/// ```no_run
/// # async fn example() -> station_source::error::Result<()> {
/// let affected = station_source::with_write_connection("/work/app/.conductor/conductor.db", |conn| {
///     Box::pin(async move {
///         let result = sqlx::query("UPDATE sessions SET status = 'completed' WHERE id = ?")
///             .bind("s-1")
///             .execute(conn)
///             .await?;
///         Ok(result.rows_affected())
///     })
/// })
/// .await?;
/// # Ok(())
/// # }
/// ```
pub async fn with_write_connection<T, F>(path: impl AsRef<Path>, f: F) -> Result<T>
where
    T: Send,
    F: for<'c> FnOnce(&'c mut SqliteConnection) -> BoxFuture<'c, sqlx::Result<T>>,
{
    let path = path.as_ref();
    if !fs::try_exists(path).await.or_raise(|| ErrorKind::Io)? {
        exn::bail!(ErrorKind::NotFound(path.to_path_buf()));
    }
    let mut conn = base_options(path)
        .read_only(false)
        .create_if_missing(false)
        .connect()
        .await
        .or_raise(|| ErrorKind::Database)?;
    let result = f(&mut conn).await;
    if let Err(e) = conn.close().await {
        tracing::warn!(path = %path.display(), error = %e, "Write connection did not close cleanly");
    }
    result.or_raise(|| ErrorKind::Database)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    #[tokio::test]
    async fn test_probe_counts_projects() {
        let temp = tempfile::tempdir().unwrap();
        let path = fixtures::create_source(&temp.path().join("app")).await.unwrap();
        fixtures::seed(&path, "INSERT INTO projects (id, name, project_type) VALUES ('p1', 'one', 'web'), ('p2', 'two', 'cli');")
            .await
            .unwrap();
        assert_eq!(probe(&path).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_table_names_of_valid_source() {
        let temp = tempfile::tempdir().unwrap();
        let path = fixtures::create_source(&temp.path().join("app")).await.unwrap();
        let tables = table_names(&path).await.unwrap();
        assert!(crate::REQUIRED_TABLES.iter().all(|t| tables.contains(*t)));
    }

    #[tokio::test]
    async fn test_probe_fails_on_garbage() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("garbage.db");
        std::fs::write(&path, b"definitely not a database, just some bytes that fill a header").unwrap();
        assert!(probe(&path).await.is_err());
    }

    #[tokio::test]
    async fn test_write_connection_mutates_and_closes() {
        let temp = tempfile::tempdir().unwrap();
        let path = fixtures::create_source(&temp.path().join("app")).await.unwrap();
        fixtures::seed(&path, "INSERT INTO projects (id, name, project_type) VALUES ('p1', 'one', 'web');")
            .await
            .unwrap();
        let affected = with_write_connection(&path, |conn| {
            Box::pin(async move {
                let result = sqlx::query("UPDATE projects SET name = ? WHERE id = ?")
                    .bind("renamed")
                    .bind("p1")
                    .execute(conn)
                    .await?;
                Ok(result.rows_affected())
            })
        })
        .await
        .unwrap();
        assert_eq!(affected, 1);
        // The change is visible to a completely separate reader.
        let pool = read_only_pool(&path);
        let name: String = sqlx::query_scalar("SELECT name FROM projects WHERE id = 'p1'").fetch_one(&pool).await.unwrap();
        assert_eq!(name, "renamed");
        pool.close().await;
    }

    #[tokio::test]
    async fn test_write_connection_never_creates_files() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("missing.db");
        let err = with_write_connection(&path, |_conn| Box::pin(async move { Ok(()) })).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
        assert!(!path.exists());
    }
}
