use crate::error::{ErrorKind, Result};
use crate::listeners::{Listeners, Subscription};
use exn::ResultExt;
use parking_lot::Mutex;
use serde::Serialize;
use station_cache::SharedQueryCache;
use station_config::SyncConfig;
use station_source::Registry;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Serializable snapshot of the engine and every registered source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub sources: Vec<SourceState>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_sync: Option<OffsetDateTime>,
    pub is_live_mode: bool,
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceState {
    pub path: PathBuf,
    pub alias: String,
    /// Most recent modification time seen by either the engine or the registry.
    #[serde(with = "time::serde::rfc3339")]
    pub mtime: OffsetDateTime,
    /// When the engine last polled, which is the same for every source.
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_checked: Option<OffsetDateTime>,
    pub entity_count: u64,
    pub is_valid: bool,
}

#[derive(Debug)]
struct State {
    default_interval: Duration,
    live_interval: Duration,
    is_live: bool,
    last_sync: Option<OffsetDateTime>,
    mtimes: HashMap<PathBuf, OffsetDateTime>,
}

impl State {
    fn poll_interval(&self) -> Duration {
        if self.is_live { self.live_interval } else { self.default_interval }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Polls registered sources for modification-time changes.
///
/// Owns only its own mtime map and subscriber list; the registry and the
/// cache are reached exclusively through their public operations.
pub struct SyncEngine {
    registry: Arc<Registry>,
    cache: SharedQueryCache,
    state: Mutex<State>,
    listeners: Listeners,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl SyncEngine {
    pub fn new(registry: Arc<Registry>, cache: SharedQueryCache) -> Self {
        let defaults = SyncConfig::default();
        Self {
            registry,
            cache,
            state: Mutex::new(State {
                default_interval: defaults.default_interval,
                live_interval: defaults.live_interval,
                is_live: false,
                last_sync: None,
                mtimes: HashMap::new(),
            }),
            listeners: Listeners::new(),
            timer: Mutex::new(None),
        }
    }

    /// Apply poll intervals and the cache's default ttl.
    ///
    /// Takes effect for the timer at the next [`start`](Self::start). A zero
    /// interval is rejected and leaves the current settings in place.
    pub fn configure(&self, config: &SyncConfig) -> Result<()> {
        if config.default_interval.is_zero() {
            exn::bail!(ErrorKind::ZeroInterval("default_interval"));
        }
        if config.live_interval.is_zero() {
            exn::bail!(ErrorKind::ZeroInterval("live_interval"));
        }
        {
            let mut state = self.state.lock();
            state.default_interval = config.default_interval;
            state.live_interval = config.live_interval;
        }
        self.cache.lock().set_default_ttl(config.cache_ttl);
        Ok(())
    }

    /// (Re)start polling at the current interval, then tick once immediately.
    ///
    /// Any running timer is cancelled first. The timer only holds a weak
    /// reference, so dropping the last handle to the engine stops it.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let runtime = Handle::try_current().or_raise(|| ErrorKind::NoRuntime)?;
        let period = self.poll_interval();
        let engine = Arc::downgrade(self);
        let handle = runtime.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(engine) = engine.upgrade() else {
                    break;
                };
                engine.tick().await;
            }
        });
        if let Some(previous) = self.timer.lock().replace(handle) {
            previous.abort();
        }
        tracing::debug!(interval_ms = millis(period), live = self.is_live_mode(), "Polling started");
        self.tick().await;
        Ok(())
    }

    pub fn stop(&self) {
        if let Some(handle) = self.timer.lock().take() {
            handle.abort();
            tracing::debug!("Polling stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.timer.lock().is_some()
    }

    /// Switch between the live and default intervals, restarting the timer if
    /// it is running and the mode actually changed.
    pub async fn set_live_mode(self: &Arc<Self>, enabled: bool) -> Result<()> {
        let changed = {
            let mut state = self.state.lock();
            let changed = state.is_live != enabled;
            state.is_live = enabled;
            changed
        };
        if changed {
            tracing::info!(live = enabled, "Live mode toggled");
            if self.is_running() {
                self.start().await?;
            }
        }
        Ok(())
    }

    pub fn is_live_mode(&self) -> bool {
        self.state.lock().is_live
    }

    pub fn poll_interval(&self) -> Duration {
        self.state.lock().poll_interval()
    }

    /// One poll: detect changes, invalidate, notify, stamp the sync time.
    /// Returns the aliases of the sources that changed.
    pub async fn tick(&self) -> Vec<String> {
        let changed = self.check_for_changes().await;
        if !changed.is_empty() {
            let invalidated = self.cache.lock().invalidate_by_source(changed.as_slice());
            tracing::info!(sources = ?changed, invalidated, "Detected source changes");
            self.listeners.emit(&changed);
        }
        self.state.lock().last_sync = Some(OffsetDateTime::now_utc());
        changed
    }

    /// Run one tick now, outside the timer.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn force_sync(&self) -> Vec<String> {
        self.tick().await
    }

    /// Stat every valid source and compare against the last seen mtime.
    ///
    /// The first observation of a path only seeds the map. A path counts as
    /// changed when its mtime is strictly later than the one recorded, in
    /// which case the registry's metadata is brought up to date too.
    pub async fn check_for_changes(&self) -> Vec<String> {
        let mut observed = Vec::new();
        for connection in self.registry.active() {
            match station_source::modified(connection.path()).await {
                Ok(mtime) => observed.push((connection.path().to_path_buf(), connection.alias().to_string(), mtime)),
                Err(e) => tracing::debug!(path = %connection.path().display(), error = %e, "Could not stat source"),
            }
        }
        let changed: Vec<_> = {
            let mut state = self.state.lock();
            observed
                .into_iter()
                .filter(|(path, _, mtime)| {
                    let previous = state.mtimes.insert(path.clone(), *mtime);
                    previous.is_some_and(|previous| *mtime > previous)
                })
                .collect()
        };
        let mut aliases = Vec::with_capacity(changed.len());
        for (path, alias, mtime) in changed {
            self.registry.record_mtime(&path, mtime);
            self.registry.refresh(&path).await;
            aliases.push(alias);
        }
        aliases
    }

    /// Forget every recorded mtime and reseed from the current state of the
    /// valid sources, so paths from before a rescan never linger.
    pub async fn initialize_mtimes(&self) {
        let mut seeded = HashMap::new();
        for connection in self.registry.active() {
            if let Ok(mtime) = station_source::modified(connection.path()).await {
                seeded.insert(connection.path().to_path_buf(), mtime);
            }
        }
        tracing::debug!(count = seeded.len(), "Seeded modification times");
        self.state.lock().mtimes = seeded;
    }

    pub fn clear_mtimes(&self) {
        self.state.lock().mtimes.clear();
    }

    pub fn on_change(&self, listener: impl Fn(&[String]) + Send + Sync + 'static) -> Subscription {
        self.listeners.subscribe(listener)
    }

    /// The subscriber list notified after each tick that found changes.
    pub fn listeners(&self) -> &Listeners {
        &self.listeners
    }

    pub fn state(&self) -> SyncState {
        let sources = self.registry.all_sources();
        let state = self.state.lock();
        SyncState {
            sources: sources
                .into_iter()
                .map(|source| SourceState {
                    mtime: state.mtimes.get(&source.path).copied().unwrap_or(source.mtime),
                    last_checked: state.last_sync,
                    path: source.path,
                    alias: source.alias,
                    entity_count: source.entity_count,
                    is_valid: source.is_valid,
                })
                .collect(),
            last_sync: state.last_sync,
            is_live_mode: state.is_live,
            poll_interval_ms: millis(state.poll_interval()),
        }
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        if let Some(handle) = self.timer.get_mut().take() {
            handle.abort();
        }
    }
}
