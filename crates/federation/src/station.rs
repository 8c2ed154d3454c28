use crate::error::{ErrorKind, Result};
use crate::id::CompositeId;
use crate::models::{
    Aggregated, Commit, CommitFilters, Feature, FeatureError, FeatureErrorFilters, FeatureFilters, Handoff,
    HandoffFilters, Memory, MemoryFilters, Project, ProjectFilters, QualityFilters, QualityReflection, Session,
    SessionFilters,
};
use crate::query::{self, Rows};
use crate::stats::{self, DashboardStats};
use exn::ResultExt;
use station_cache::{CacheStats, QueryCache, SharedQueryCache};
use station_config::Config;
use station_source::error::ErrorKind as SourceErrorKind;
use station_source::{DiscoveredSource, Registry, Source, with_write_connection};
use station_sync::{Listeners, Subscription, SyncEngine, SyncState};
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

const COMPLETE_SESSION: &str = "UPDATE sessions \
    SET status = 'completed', \
        completed_at = CAST(strftime('%s', 'now') AS INTEGER), \
        progress_notes = COALESCE(?, progress_notes) \
    WHERE id = ?";

/// The federated read model: every discovered source, one cache in front of
/// them, and a poller keeping the two consistent.
pub struct Station {
    registry: Arc<Registry>,
    cache: SharedQueryCache,
    sync: Arc<SyncEngine>,
    listeners: Listeners,
    _bridge: Subscription,
    initialized: AtomicBool,
}

impl Default for Station {
    fn default() -> Self {
        Self::new()
    }
}

impl Station {
    pub fn new() -> Self {
        let registry = Arc::new(Registry::new());
        let cache = QueryCache::shared(station_cache::DEFAULT_TTL);
        let sync = Arc::new(SyncEngine::new(registry.clone(), cache.clone()));
        let listeners = Listeners::new();
        let forward = listeners.clone();
        let bridge = sync.on_change(move |changed| forward.emit(changed));
        Self {
            registry,
            cache,
            sync,
            listeners,
            _bridge: bridge,
            initialized: AtomicBool::new(false),
        }
    }

    /// Discover and open every source under the configured scan paths, then
    /// start polling. Returns the number of valid sources.
    ///
    /// Re-initializing shuts the previous state down first. An invalid
    /// configuration is rejected before anything is touched.
    #[tracing::instrument(level = "info", skip_all, fields(scan_paths = config.scan_paths.len()))]
    pub async fn initialize(&self, config: &Config) -> Result<usize> {
        config.validate().or_raise(|| ErrorKind::Config)?;
        if self.is_initialized() {
            self.shutdown().await;
        }
        let paths = station_source::discover(&config.scan_paths, &config.exclude_patterns, config.scan_depth)
            .await
            .or_raise(|| ErrorKind::Source)?;
        for path in &paths {
            if let Err(e) = self.registry.open(path).await {
                tracing::warn!(path = %path.display(), error = ?e, "Could not open discovered source");
            }
        }
        // Aliases settle only once every source is open.
        self.cache.lock().clear();

        self.sync.configure(&config.sync).or_raise(|| ErrorKind::Sync)?;
        self.sync.initialize_mtimes().await;
        self.sync.start().await.or_raise(|| ErrorKind::Sync)?;
        self.initialized.store(true, Ordering::SeqCst);

        let valid = self.registry.active().len();
        tracing::info!(discovered = paths.len(), valid, "Station initialized");
        Ok(valid)
    }

    /// Stop polling, close every source and forget everything cached.
    pub async fn shutdown(&self) {
        self.sync.stop();
        let closed = self.registry.close_all().await;
        self.cache.lock().clear();
        self.sync.clear_mtimes();
        self.initialized.store(false, Ordering::SeqCst);
        tracing::info!(closed = closed.len(), "Station shut down");
    }

    /// Shut down and initialize again, picking up added or removed sources.
    pub async fn rescan(&self, config: &Config) -> Result<usize> {
        self.shutdown().await;
        self.initialize(config).await
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Metadata of every valid source.
    pub fn sources(&self) -> Vec<Source> {
        self.registry.sources()
    }

    /// Find sources without opening them.
    pub async fn discover<S: AsRef<str>>(
        &self,
        roots: &[PathBuf],
        exclude_patterns: &[S],
        max_depth: usize,
    ) -> Result<Vec<DiscoveredSource>> {
        station_source::discover_detailed(roots, exclude_patterns, max_depth)
            .await
            .or_raise(|| ErrorKind::Source)
    }

    /// Open one more source by path.
    pub async fn open_source(&self, path: impl AsRef<Path>) -> Result<Source> {
        let path = path.as_ref();
        let source = match self.registry.open(path).await {
            Ok(source) => source,
            Err(e) if matches!(e.deref(), SourceErrorKind::NotFound(_)) => {
                return Err(e).or_raise(|| ErrorKind::NotFound(path.display().to_string()));
            },
            Err(e) => return Err(e).or_raise(|| ErrorKind::Source),
        };
        // Opening may have extended an existing alias.
        self.cache.lock().clear();
        Ok(source)
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn cache(&self) -> &SharedQueryCache {
        &self.cache
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.lock().stats()
    }

    pub async fn projects(&self, filters: &ProjectFilters) -> Result<Rows<Project>> {
        query::list(&self.registry, &self.cache, filters).await
    }

    pub async fn project(&self, id: &str) -> Result<Option<Aggregated<Project>>> {
        self.lookup(id).await
    }

    pub async fn features(&self, filters: &FeatureFilters) -> Result<Rows<Feature>> {
        query::list(&self.registry, &self.cache, filters).await
    }

    pub async fn feature(&self, id: &str) -> Result<Option<Aggregated<Feature>>> {
        self.lookup(id).await
    }

    pub async fn sessions(&self, filters: &SessionFilters) -> Result<Rows<Session>> {
        query::list(&self.registry, &self.cache, filters).await
    }

    pub async fn session(&self, id: &str) -> Result<Option<Aggregated<Session>>> {
        self.lookup(id).await
    }

    pub async fn memories(&self, filters: &MemoryFilters) -> Result<Rows<Memory>> {
        query::list(&self.registry, &self.cache, filters).await
    }

    pub async fn memory(&self, id: &str) -> Result<Option<Aggregated<Memory>>> {
        self.lookup(id).await
    }

    /// Ranked memory search; `limit` defaults to [`query::DEFAULT_SEARCH_LIMIT`].
    pub async fn search_memories(&self, query: &str, limit: Option<u32>) -> Result<Rows<Memory>> {
        query::search_memories(&self.registry, &self.cache, query, limit).await
    }

    pub async fn handoffs(&self, filters: &HandoffFilters) -> Result<Rows<Handoff>> {
        query::list(&self.registry, &self.cache, filters).await
    }

    pub async fn commits(&self, filters: &CommitFilters) -> Result<Rows<Commit>> {
        query::list(&self.registry, &self.cache, filters).await
    }

    pub async fn feature_errors(&self, filters: &FeatureErrorFilters) -> Result<Rows<FeatureError>> {
        query::list(&self.registry, &self.cache, filters).await
    }

    pub async fn quality_issues(&self, filters: &QualityFilters) -> Result<Rows<QualityReflection>> {
        query::list(&self.registry, &self.cache, filters).await
    }

    pub async fn stats(&self) -> Result<Arc<DashboardStats>> {
        stats::stats(&self.registry, &self.cache).await
    }

    async fn lookup<E: crate::models::Entity>(&self, id: &str) -> Result<Option<Aggregated<E>>> {
        let id = CompositeId::parse(id)?;
        query::get(&self.registry, &self.cache, &id).await
    }

    pub async fn set_live_mode(&self, enabled: bool) -> Result<()> {
        self.sync.set_live_mode(enabled).await.or_raise(|| ErrorKind::Sync)
    }

    pub fn sync_state(&self) -> SyncState {
        self.sync.state()
    }

    /// Drop every cached result and poll right away.
    ///
    /// Listeners always hear about it: with the sources that changed, or with
    /// every valid source if none did.
    pub async fn force_refresh(&self) -> Vec<String> {
        self.cache.lock().clear();
        let changed = self.sync.force_sync().await;
        if !changed.is_empty() {
            return changed;
        }
        let everything: Vec<String> = self.registry.active().iter().map(|c| c.alias().to_string()).collect();
        self.listeners.emit(&everything);
        everything
    }

    /// Register `listener`, called with the aliases of changed sources.
    pub fn on_data_change(&self, listener: impl Fn(&[String]) + Send + Sync + 'static) -> Subscription {
        self.listeners.subscribe(listener)
    }

    /// Mark a session completed, replacing its progress notes when `notes` is
    /// given.
    #[tracing::instrument(level = "info", skip(self, notes))]
    pub async fn complete_session(&self, id: &str, notes: Option<&str>) -> Result<()> {
        let id = CompositeId::parse(id)?;
        let Some(connection) = self.registry.get(id.alias()).filter(|c| c.source().is_valid) else {
            exn::bail!(ErrorKind::UnknownSource(id.alias().to_string()));
        };

        let local = id.local().to_string();
        let notes = notes.map(str::to_string);
        let written = with_write_connection(connection.path(), move |conn| {
            Box::pin(async move {
                let result = sqlx::query(COMPLETE_SESSION).bind(notes).bind(local).execute(&mut *conn).await?;
                Ok(result.rows_affected())
            })
        })
        .await;
        let affected = match written {
            Ok(affected) => affected,
            Err(e) if matches!(e.deref(), SourceErrorKind::NotFound(_)) => {
                return Err(e).or_raise(|| ErrorKind::NotFound(connection.path().display().to_string()));
            },
            Err(e) => return Err(e).or_raise(|| ErrorKind::Source),
        };
        if affected == 0 {
            exn::bail!(ErrorKind::NotFound(id.to_string()));
        }

        let invalidated = self.cache.lock().invalidate_by_source(&[connection.alias()]);
        tracing::info!(invalidated, "Session completed");
        Ok(())
    }
}
