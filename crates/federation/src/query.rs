//! Fan-out of one read across every source it targets.
//!
//! A source that fails to answer is logged and left out; the read as a whole
//! only fails if its cache key cannot be built.

use crate::error::{ErrorKind, Result};
use crate::filters::{Filters, like_pattern};
use crate::id::CompositeId;
use crate::models::{Aggregated, Entity, Memory};
use exn::ResultExt;
use serde_json::json;
use sqlx::{QueryBuilder, Sqlite};
use station_cache::{SetOptions, SharedQueryCache, make_key};
use station_source::{Connection, Registry};
use std::cmp::Reverse;
use std::sync::Arc;

/// A cached, cross-source listing.
pub type Rows<T> = Arc<Vec<Aggregated<T>>>;

pub const DEFAULT_SEARCH_LIMIT: u32 = 50;

/// Connections a filter record targets.
///
/// Every scope it carries (explicit alias and the alias of each parent id)
/// must name the same valid source, otherwise nothing can match.
pub(crate) fn targets<F: Filters>(registry: &Registry, filters: &F) -> Vec<Connection> {
    let parents = filters.parent_ids();
    let mut scopes = filters.source_alias().into_iter().chain(parents.iter().map(|id| id.alias()));
    let Some(first) = scopes.next() else {
        return registry.active();
    };
    if scopes.any(|scope| scope != first) {
        tracing::debug!(operation = F::OPERATION, "Conflicting source scopes, nothing to query");
        return Vec::new();
    }
    registry.get(first).filter(|c| c.source().is_valid).into_iter().collect()
}

async fn fetch<F: Filters>(connection: &Connection, filters: &F) -> sqlx::Result<Vec<F::Entity>> {
    let mut query = QueryBuilder::<Sqlite>::new(format!("SELECT * FROM {} WHERE 1=1", F::Entity::TABLE));
    filters.push_predicates(&mut query);
    query.push(" ORDER BY ").push(F::Entity::ORDER_BY);
    // A zero limit means no limit.
    match (filters.limit().filter(|limit| *limit > 0), filters.offset()) {
        (Some(limit), offset) => {
            query.push(" LIMIT ").push_bind(i64::from(limit));
            if let Some(offset) = offset {
                query.push(" OFFSET ").push_bind(i64::from(offset));
            }
        },
        (None, Some(offset)) => {
            query.push(" LIMIT -1 OFFSET ").push_bind(i64::from(offset));
        },
        (None, None) => {},
    }
    query.build_query_as::<F::Entity>().fetch_all(connection.pool()).await
}

/// List one entity kind across every targeted source, in source path order.
#[tracing::instrument(level = "debug", skip_all, fields(operation = F::OPERATION))]
pub async fn list<F: Filters>(registry: &Registry, cache: &SharedQueryCache, filters: &F) -> Result<Rows<F::Entity>> {
    let key = make_key(F::OPERATION, filters).or_raise(|| ErrorKind::Cache)?;
    // Rows read across an invalidation must not be cached.
    let (hit, generation) = {
        let mut cache = cache.lock();
        (cache.get::<Vec<Aggregated<F::Entity>>>(&key), cache.generation())
    };
    if let Some(hit) = hit {
        return Ok(hit);
    }

    let connections = targets(registry, filters);
    let mut rows = Vec::new();
    for connection in &connections {
        match fetch(connection, filters).await {
            Ok(batch) => rows.extend(
                batch
                    .into_iter()
                    .map(|row| Aggregated::new(row, connection))
                    .filter(|row| filters.retain(row)),
            ),
            Err(e) => tracing::warn!(source = connection.alias(), error = %e, "Query failed, leaving source out"),
        }
    }

    let tags = connections.iter().map(|c| c.alias().to_string());
    Ok(cache.lock().set_if_current(key, rows, SetOptions::tagged(tags), generation))
}

/// Look up one entity by composite id.
///
/// An id naming an unknown or invalid source is simply absent. So is one
/// whose source fails to answer; that miss is not cached.
#[tracing::instrument(level = "debug", skip_all, fields(table = E::TABLE, id = %id))]
pub async fn get<E: Entity>(registry: &Registry, cache: &SharedQueryCache, id: &CompositeId) -> Result<Option<Aggregated<E>>> {
    let key = make_key(&format!("{}:get", E::TABLE), id).or_raise(|| ErrorKind::Cache)?;
    let (hit, generation) = {
        let mut cache = cache.lock();
        (cache.get::<Option<Aggregated<E>>>(&key), cache.generation())
    };
    if let Some(hit) = hit {
        return Ok((*hit).clone());
    }

    let Some(connection) = registry.get(id.alias()).filter(|c| c.source().is_valid) else {
        return Ok(None);
    };
    let row = sqlx::query_as::<_, E>(&format!("SELECT * FROM {} WHERE id = ?", E::TABLE))
        .bind(id.local())
        .fetch_optional(connection.pool())
        .await;
    match row {
        Ok(row) => {
            let found = row.map(|row| Aggregated::new(row, &connection));
            cache
                .lock()
                .set_if_current(key, found.clone(), SetOptions::tagged([connection.alias()]), generation);
            Ok(found)
        },
        Err(e) => {
            tracing::warn!(source = connection.alias(), error = %e, "Lookup failed");
            Ok(None)
        },
    }
}

/// Rank of a memory against a search query: exact name, then name substring,
/// then content-only matches.
fn search_tier(name: &str, needle: &str) -> u8 {
    let name = name.to_lowercase();
    if name == needle {
        0
    } else if name.contains(needle) {
        1
    } else {
        2
    }
}

/// Case-insensitive substring search over memory names and contents in every
/// valid source, re-ranked across sources.
#[tracing::instrument(level = "debug", skip_all, fields(query = query))]
pub async fn search_memories(
    registry: &Registry,
    cache: &SharedQueryCache,
    query: &str,
    limit: Option<u32>,
) -> Result<Rows<Memory>> {
    let limit = limit.unwrap_or(DEFAULT_SEARCH_LIMIT);
    let key = make_key("memories:search", &json!({ "query": query, "limit": limit })).or_raise(|| ErrorKind::Cache)?;
    let (hit, generation) = {
        let mut cache = cache.lock();
        (cache.get::<Vec<Aggregated<Memory>>>(&key), cache.generation())
    };
    if let Some(hit) = hit {
        return Ok(hit);
    }

    let pattern = like_pattern(query);
    let connections = registry.active();
    let mut rows = Vec::new();
    for connection in &connections {
        let batch = sqlx::query_as::<_, Memory>(
            "SELECT * FROM memories WHERE (name LIKE ? ESCAPE '\\' OR content LIKE ? ESCAPE '\\') \
             ORDER BY created_at DESC LIMIT ?",
        )
        .bind(&pattern)
        .bind(&pattern)
        .bind(i64::from(limit))
        .fetch_all(connection.pool())
        .await;
        match batch {
            Ok(batch) => rows.extend(batch.into_iter().map(|row| Aggregated::new(row, connection))),
            Err(e) => tracing::warn!(source = connection.alias(), error = %e, "Search failed, leaving source out"),
        }
    }

    let needle = query.to_lowercase();
    rows.sort_by_key(|row| (search_tier(&row.name, &needle), Reverse(row.created_at)));
    rows.truncate(limit as usize);

    let tags = connections.iter().map(|c| c.alias().to_string());
    Ok(cache.lock().set_if_current(key, rows, SetOptions::tagged(tags), generation))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::FeatureStatus;
    use crate::models::{Feature, FeatureFilters, MemoryFilters, Session, SessionFilters};
    use rstest::rstest;
    use station_cache::QueryCache;
    use station_source::fixtures;
    use std::time::Duration;

    struct Harness {
        _temp: tempfile::TempDir,
        registry: Registry,
        cache: SharedQueryCache,
    }

    async fn harness(projects: &[(&str, &str)]) -> Harness {
        let temp = tempfile::tempdir().unwrap();
        let registry = Registry::new();
        for (dir, sql) in projects {
            let path = fixtures::create_source(&temp.path().join(dir)).await.unwrap();
            fixtures::seed(&path, sql).await.unwrap();
            registry.open(&path).await.unwrap();
        }
        Harness {
            _temp: temp,
            registry,
            cache: QueryCache::shared(Duration::from_secs(30)),
        }
    }

    fn features_sql(prefix: &str) -> String {
        format!(
            "INSERT INTO projects (id, name, project_type) VALUES ('p1', '{prefix}', 'web');
             INSERT INTO features (id, project_id, category, phase, description, status, priority, steps) VALUES
                ('{prefix}-f1', 'p1', 'core', 1, 'Login form', 'passed', 5, '[\"render\",\"submit\"]'),
                ('{prefix}-f2', 'p1', 'core', 1, 'Logout', 'pending', 9, 'not json'),
                ('{prefix}-f3', 'p1', 'ui', 2, 'Dark_mode 100%', 'failed', 1, NULL);"
        )
    }

    #[tokio::test]
    async fn test_list_merges_sources_in_path_order() {
        let h = harness(&[("alpha", features_sql("a").as_str()), ("beta", features_sql("b").as_str())]).await;
        let rows = list(&h.registry, &h.cache, &FeatureFilters::default()).await.unwrap();
        let ids: Vec<String> = rows.iter().map(|row| row.id.to_string()).collect();
        assert_eq!(ids, ["alpha:a-f2", "alpha:a-f1", "alpha:a-f3", "beta:b-f2", "beta:b-f1", "beta:b-f3"]);

        let login = &rows[1];
        assert_eq!(login.source_alias, "alpha");
        assert_eq!(login.decoration.project_id, Some(CompositeId::new("alpha", "p1")));
        assert_eq!(login.decoration.parsed_steps, ["render", "submit"]);
        assert!(rows[0].decoration.parsed_steps.is_empty(), "undecodable list degrades to empty");
    }

    #[tokio::test]
    async fn test_list_survives_a_broken_source() {
        let temp = tempfile::tempdir().unwrap();
        let registry = Registry::new();
        for dir in ["alpha", "beta", "gamma"] {
            let path = fixtures::create_source(&temp.path().join(dir)).await.unwrap();
            fixtures::seed(&path, &features_sql(dir)).await.unwrap();
            if dir == "beta" {
                fixtures::seed(
                    &path,
                    "DROP TABLE features; CREATE TABLE features (id TEXT PRIMARY KEY, project_id TEXT);
                     INSERT INTO features (id, project_id) VALUES ('x', 'p1');",
                )
                .await
                .unwrap();
            }
            registry.open(&path).await.unwrap();
        }
        let cache = QueryCache::shared(Duration::from_secs(30));

        let rows = list(&registry, &cache, &FeatureFilters::default()).await.unwrap();
        assert_eq!(rows.len(), 6);
        assert!(rows.iter().all(|row| row.source_alias != "beta"));
        assert!(registry.get("beta").unwrap().source().is_valid, "a failed query does not invalidate");
    }

    #[rstest]
    #[case::status(FeatureFilters { status: Some(FeatureStatus::Passed), ..Default::default() }, &["alpha:a-f1", "beta:b-f1"])]
    #[case::alias(FeatureFilters { source_alias: Some("beta".to_string()), phase: Some(2), ..Default::default() }, &["beta:b-f3"])]
    #[case::parent(FeatureFilters { project_id: Some(CompositeId::new("alpha", "p1")), category: Some("ui".to_string()), ..Default::default() }, &["alpha:a-f3"])]
    #[case::conflicting_scopes(FeatureFilters { source_alias: Some("beta".to_string()), project_id: Some(CompositeId::new("alpha", "p1")), ..Default::default() }, &[])]
    #[case::unknown_scope(FeatureFilters { source_alias: Some("nope".to_string()), ..Default::default() }, &[])]
    #[case::escaped_search(FeatureFilters { search: Some("_mode 100%".to_string()), ..Default::default() }, &["alpha:a-f3", "beta:b-f3"])]
    #[case::wildcard_is_literal(FeatureFilters { search: Some("L_g".to_string()), ..Default::default() }, &[])]
    #[case::limit_per_source(FeatureFilters { limit: Some(1), ..Default::default() }, &["alpha:a-f2", "beta:b-f2"])]
    #[case::offset_without_limit(FeatureFilters { offset: Some(2), ..Default::default() }, &["alpha:a-f3", "beta:b-f3"])]
    #[case::zero_limit(FeatureFilters { limit: Some(0), source_alias: Some("alpha".to_string()), ..Default::default() }, &["alpha:a-f2", "alpha:a-f1", "alpha:a-f3"])]
    #[tokio::test]
    async fn test_feature_filters(#[case] filters: FeatureFilters, #[case] expected: &[&str]) {
        let h = harness(&[("alpha", features_sql("a").as_str()), ("beta", features_sql("b").as_str())]).await;
        let rows = list(&h.registry, &h.cache, &filters).await.unwrap();
        let ids: Vec<String> = rows.iter().map(|row| row.id.to_string()).collect();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn test_list_is_cached_and_tagged() {
        let h = harness(&[("alpha", features_sql("a").as_str()), ("beta", features_sql("b").as_str())]).await;
        let scoped = FeatureFilters {
            source_alias: Some("alpha".to_string()),
            ..Default::default()
        };
        let first = list(&h.registry, &h.cache, &scoped).await.unwrap();
        let second = list(&h.registry, &h.cache, &scoped).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(h.cache.lock().stats().hits, 1);

        assert_eq!(h.cache.lock().invalidate_by_source(&["beta"]), 0);
        assert_eq!(h.cache.lock().invalidate_by_source(&["alpha"]), 1);
    }

    #[tokio::test]
    async fn test_memory_tags_filter_any_of() {
        let h = harness(&[(
            "app",
            "INSERT INTO memories (id, name, content, tags) VALUES
                ('m1', 'one', 'x', '[\"rust\",\"db\"]'),
                ('m2', 'two', 'x', '[\"ui\"]'),
                ('m3', 'three', 'x', NULL);",
        )])
        .await;
        let filters = MemoryFilters {
            tags: vec!["db".to_string(), "ops".to_string()],
            ..Default::default()
        };
        let rows = list(&h.registry, &h.cache, &filters).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, CompositeId::new("app", "m1"));
    }

    #[tokio::test]
    async fn test_session_status_filter() {
        let h = harness(&[(
            "app",
            "INSERT INTO sessions (id, session_number, status, started_at) VALUES
                ('s1', 1, 'completed', 100), ('s2', 2, 'active', 200);",
        )])
        .await;
        let filters = SessionFilters {
            status: Some(crate::filters::SessionStatus::Active),
            ..Default::default()
        };
        let rows: Rows<Session> = list(&h.registry, &h.cache, &filters).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].session_number, 2);
    }

    #[tokio::test]
    async fn test_get_by_composite_id() {
        let h = harness(&[("alpha", features_sql("a").as_str()), ("beta", features_sql("b").as_str())]).await;
        let id = CompositeId::parse("beta:b-f1").unwrap();
        let feature = get::<Feature>(&h.registry, &h.cache, &id).await.unwrap().unwrap();
        assert_eq!(feature.description, "Login form");
        assert_eq!(feature.source_alias, "beta");

        let missing = CompositeId::new("beta", "a-f1");
        assert!(get::<Feature>(&h.registry, &h.cache, &missing).await.unwrap().is_none());
        let unknown = CompositeId::new("nope", "a-f1");
        assert!(get::<Feature>(&h.registry, &h.cache, &unknown).await.unwrap().is_none());
        // Two real lookups cached, the unknown source is not.
        assert_eq!(h.cache.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_search_ranks_across_sources() {
        let h = harness(&[
            (
                "alpha",
                "INSERT INTO memories (id, name, content, created_at) VALUES
                    ('m1', 'notes', 'mentions auth in passing', 300),
                    ('m2', 'auth flow', 'details', 100);",
            ),
            (
                "beta",
                "INSERT INTO memories (id, name, content, created_at) VALUES
                    ('m1', 'Auth', 'exact name', 50),
                    ('m2', 'oauth tokens', 'x', 200),
                    ('m3', 'unrelated', 'nothing', 400);",
            ),
        ])
        .await;
        let rows = search_memories(&h.registry, &h.cache, "auth", None).await.unwrap();
        let ids: Vec<String> = rows.iter().map(|row| row.id.to_string()).collect();
        assert_eq!(ids, ["beta:m1", "beta:m2", "alpha:m2", "alpha:m1"]);

        let top = search_memories(&h.registry, &h.cache, "auth", Some(2)).await.unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].id, CompositeId::new("beta", "m1"));
    }

    #[test]
    fn test_search_tier() {
        assert_eq!(search_tier("Auth", "auth"), 0);
        assert_eq!(search_tier("OAuth", "auth"), 1);
        assert_eq!(search_tier("notes", "auth"), 2);
    }

    #[tokio::test]
    async fn test_no_sources_is_empty() {
        let h = harness(&[]).await;
        let rows = list(&h.registry, &h.cache, &FeatureFilters::default()).await.unwrap();
        assert!(rows.is_empty());
    }
}
