use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use serde::Serialize;
use station_cache::{SetOptions, SharedQueryCache, make_key};
use station_source::{Connection, Registry};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Aggregate stats are cheap to recompute, so they live briefly and depend
/// on every source.
pub const STATS_TTL: Duration = Duration::from_secs(60);

const OPERATION: &str = "stats";

/// Fixed-shape counts across every valid source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_projects: u64,
    pub total_features: u64,
    pub features_by_status: BTreeMap<String, u64>,
    pub total_sessions: u64,
    pub active_sessions: u64,
    pub total_memories: u64,
    pub unresolved_issues: u64,
    pub source_count: usize,
}

impl DashboardStats {
    fn merge(&mut self, other: DashboardStats) {
        self.total_projects += other.total_projects;
        self.total_features += other.total_features;
        for (status, count) in other.features_by_status {
            *self.features_by_status.entry(status).or_default() += count;
        }
        self.total_sessions += other.total_sessions;
        self.active_sessions += other.active_sessions;
        self.total_memories += other.total_memories;
        self.unresolved_issues += other.unresolved_issues;
    }
}

async fn count(connection: &Connection, sql: &str) -> sqlx::Result<u64> {
    let count: i64 = sqlx::query_scalar(sql).fetch_one(connection.pool()).await?;
    Ok(u64::try_from(count).unwrap_or_default())
}

/// Counts for one source. All of them, or none.
async fn collect(connection: &Connection) -> sqlx::Result<DashboardStats> {
    let by_status: Vec<(String, i64)> = sqlx::query_as("SELECT status, COUNT(*) FROM features GROUP BY status")
        .fetch_all(connection.pool())
        .await?;
    let features_by_status: BTreeMap<String, u64> = by_status
        .into_iter()
        .map(|(status, count)| (status, u64::try_from(count).unwrap_or_default()))
        .collect();
    Ok(DashboardStats {
        total_projects: count(connection, "SELECT COUNT(*) FROM projects").await?,
        total_features: features_by_status.values().sum(),
        features_by_status,
        total_sessions: count(connection, "SELECT COUNT(*) FROM sessions").await?,
        active_sessions: count(connection, "SELECT COUNT(*) FROM sessions WHERE status = 'active'").await?,
        total_memories: count(connection, "SELECT COUNT(*) FROM memories").await?,
        unresolved_issues: count(connection, "SELECT COUNT(*) FROM quality_reflections WHERE COALESCE(resolved, 0) = 0")
            .await?,
        source_count: 0,
    })
}

/// Sum the counts of every valid source.
///
/// A source whose counts cannot all be read is left out entirely, so the
/// totals never mix a partial source in.
#[tracing::instrument(level = "debug", skip_all)]
pub async fn stats(registry: &Registry, cache: &SharedQueryCache) -> Result<Arc<DashboardStats>> {
    let key = make_key(OPERATION, &()).or_raise(|| ErrorKind::Cache)?;
    let (hit, generation) = {
        let mut cache = cache.lock();
        (cache.get::<DashboardStats>(&key), cache.generation())
    };
    if let Some(hit) = hit {
        return Ok(hit);
    }

    let connections = registry.active();
    let mut totals = DashboardStats {
        source_count: connections.len(),
        ..Default::default()
    };
    for connection in &connections {
        match collect(connection).await {
            Ok(counts) => totals.merge(counts),
            Err(e) => tracing::warn!(source = connection.alias(), error = %e, "Stats query failed, leaving source out"),
        }
    }
    Ok(cache
        .lock()
        .set_if_current(key, totals, SetOptions::default().with_ttl(STATS_TTL), generation))
}
