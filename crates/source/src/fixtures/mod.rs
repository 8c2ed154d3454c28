//! Throwaway sources for tests.
//!
//! Enabled for this crate's own tests and, through the `fixtures` feature,
//! for downstream crates' dev dependencies.

use crate::error::{ErrorKind, Result};
use crate::{MARKER_DIR, SOURCE_FILE};
use exn::ResultExt;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
use sqlx::{ConnectOptions, Connection as _};
use std::path::{Path, PathBuf};

/// Full schema of a Conductor source.
pub const SCHEMA: &str = include_str!("schema.sql");

/// Create `<project_dir>/.conductor/conductor.db` with the full schema and
/// return its path.
pub async fn create_source(project_dir: &Path) -> Result<PathBuf> {
    let path = project_dir.join(MARKER_DIR).join(SOURCE_FILE);
    create_database(&path, SCHEMA).await?;
    Ok(path)
}

/// Create a database file at `path` (and any missing parent directories),
/// running `sql` against it. Use this for sources with a deliberately broken
/// or partial schema.
pub async fn create_database(path: &Path, sql: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.or_raise(|| ErrorKind::Io)?;
    }
    execute(path, sql, true).await
}

/// Run `sql` against an existing source.
pub async fn seed(path: &Path, sql: &str) -> Result<()> {
    execute(path, sql, false).await
}

async fn execute(path: &Path, sql: &str, create: bool) -> Result<()> {
    // Rollback journal so every commit lands in the main file and moves its
    // modification time, the same signal an external writer produces.
    let mut conn = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(create)
        .journal_mode(SqliteJournalMode::Delete)
        .connect()
        .await
        .or_raise(|| ErrorKind::Database)?;
    let result = sqlx::raw_sql(sql).execute(&mut conn).await;
    conn.close().await.or_raise(|| ErrorKind::Database)?;
    result.or_raise(|| ErrorKind::Database)?;
    Ok(())
}
