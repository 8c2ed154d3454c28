//! Configuration loading and validation.
//!
//! The [`Config`] record is everything the federation core needs from the
//! outside world: where to look for sources, how deep to look, what to skip,
//! and how aggressively to poll and cache. It is layered with [`figment`]:
//!
//! 1. Built-in defaults ([`Config::default`])
//! 2. An optional file (TOML, YAML or JSON, chosen by extension). When no path
//!    is given, `station.toml` in the platform config directory is used if it
//!    exists.
//! 3. Environment variables prefixed with `STATION_`, using `__` to reach
//!    nested keys (e.g. `STATION_SYNC__LIVE_INTERVAL=2000`).
//!
//! Persisting configuration is somebody else's job; this crate only reads.

pub mod error;
pub mod millis;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the configuration file looked up in the platform config directory.
pub const DEFAULT_FILENAME: &str = "station.toml";
/// Prefix for environment variable overrides.
pub const ENV_PREFIX: &str = "STATION_";

/// Directory names never descended into during discovery, unless overridden.
pub const DEFAULT_EXCLUDE_PATTERNS: &[&str] = &[
    "node_modules",
    ".git",
    "dist",
    "build",
    ".next",
    ".svelte-kit",
    "coverage",
    "__pycache__",
    ".venv",
    "venv",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Ordered list of directories to scan for sources.
    pub scan_paths: Vec<PathBuf>,
    /// Maximum directory depth below each scan path.
    pub scan_depth: usize,
    /// Directory names (or single-wildcard globs like `*.tmp`) to skip.
    pub exclude_patterns: Vec<String>,
    pub sync: SyncConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scan_paths: Vec::new(),
            scan_depth: 5,
            exclude_patterns: DEFAULT_EXCLUDE_PATTERNS.iter().map(|p| p.to_string()).collect(),
            sync: SyncConfig::default(),
        }
    }
}

/// Polling and caching parameters, all expressed in milliseconds on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Poll interval while live mode is off.
    #[serde(with = "millis")]
    pub default_interval: Duration,
    /// Poll interval while live mode is on.
    #[serde(with = "millis")]
    pub live_interval: Duration,
    /// Default time-to-live for cached query results.
    #[serde(with = "millis")]
    pub cache_ttl: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            default_interval: Duration::from_secs(120),
            live_interval: Duration::from_secs(5),
            cache_ttl: Duration::from_secs(30),
        }
    }
}

impl Config {
    /// Defaults with the given scan paths.
    pub fn with_scan_paths(scan_paths: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        Self {
            scan_paths: scan_paths.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Location of the configuration file in the platform config directory.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "station").map(|dirs| dirs.config_dir().join(DEFAULT_FILENAME))
    }

    /// Build the layered [`Figment`] without extracting it.
    ///
    /// Missing files are skipped silently by figment, so callers wanting a
    /// hard failure for an explicit path should go through [`Config::load`].
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path.map(Path::to_path_buf).or_else(Self::default_path) {
            figment = match path.extension().and_then(|ext| ext.to_str()) {
                Some("yaml" | "yml") => figment.merge(Yaml::file(path)),
                Some("json") => figment.merge(Json::file(path)),
                _ => figment.merge(Toml::file(path)),
            };
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load configuration from defaults, file and environment, then validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path
            && !path.exists()
        {
            exn::bail!(ErrorKind::NotFound(path.to_path_buf()));
        }
        Self::from_figment(Self::figment(path))
    }

    /// Extract and validate a configuration from an arbitrary figment.
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Config = figment.extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        tracing::debug!(scan_paths = config.scan_paths.len(), depth = config.scan_depth, "Configuration loaded");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sync.default_interval.is_zero() {
            exn::bail!(ErrorKind::Invalid("sync.default_interval must be greater than zero"));
        }
        if self.sync.live_interval.is_zero() {
            exn::bail!(ErrorKind::Invalid("sync.live_interval must be greater than zero"));
        }
        if self.sync.cache_ttl.is_zero() {
            exn::bail!(ErrorKind::Invalid("sync.cache_ttl must be greater than zero"));
        }
        if self.exclude_patterns.iter().any(|p| p.is_empty()) {
            exn::bail!(ErrorKind::Invalid("exclude_patterns must not contain empty patterns"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use rstest::rstest;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.scan_paths.is_empty());
        assert_eq!(config.scan_depth, 5);
        assert!(config.exclude_patterns.iter().any(|p| p == "node_modules"));
        assert_eq!(config.sync.default_interval, Duration::from_secs(120));
        assert_eq!(config.sync.live_interval, Duration::from_secs(5));
        assert_eq!(config.sync.cache_ttl, Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_toml_merges_with_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "station.toml",
                r#"
                    scan_paths = ["/work", "/play"]
                    [sync]
                    live_interval = 1000
                "#,
            )?;
            let config = Config::load(Some(Path::new("station.toml"))).map_err(|e| e.to_string())?;
            assert_eq!(config.scan_paths, vec![PathBuf::from("/work"), PathBuf::from("/play")]);
            assert_eq!(config.sync.live_interval, Duration::from_secs(1));
            // Untouched values keep their defaults.
            assert_eq!(config.sync.default_interval, Duration::from_secs(120));
            assert_eq!(config.scan_depth, 5);
            Ok(())
        });
    }

    #[test]
    fn test_load_json_by_extension() {
        Jail::expect_with(|jail| {
            jail.create_file("station.json", r#"{"scan_depth": 2, "exclude_patterns": ["target"]}"#)?;
            let config = Config::load(Some(Path::new("station.json"))).map_err(|e| e.to_string())?;
            assert_eq!(config.scan_depth, 2);
            assert_eq!(config.exclude_patterns, vec!["target".to_string()]);
            Ok(())
        });
    }

    #[test]
    fn test_environment_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file("station.yaml", "scan_depth: 3\n")?;
            jail.set_env("STATION_SCAN_DEPTH", 7);
            jail.set_env("STATION_SYNC__CACHE_TTL", 500);
            let config = Config::load(Some(Path::new("station.yaml"))).map_err(|e| e.to_string())?;
            assert_eq!(config.scan_depth, 7);
            assert_eq!(config.sync.cache_ttl, Duration::from_millis(500));
            Ok(())
        });
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        Jail::expect_with(|_jail| {
            let err = Config::load(Some(Path::new("nope.toml"))).unwrap_err();
            assert!(matches!(&*err, ErrorKind::NotFound(_)));
            Ok(())
        });
    }

    #[rstest]
    #[case(r#"{"sync": {"default_interval": 0}}"#)]
    #[case(r#"{"sync": {"live_interval": 0}}"#)]
    #[case(r#"{"sync": {"cache_ttl": 0}}"#)]
    #[case(r#"{"exclude_patterns": [""]}"#)]
    fn test_invalid_values_are_rejected(#[case] json: &str) {
        let figment = Figment::from(Serialized::defaults(Config::default())).merge(Json::string(json));
        let err = Config::from_figment(figment).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Invalid(_)));
    }

    #[test]
    fn test_with_scan_paths() {
        let config = Config::with_scan_paths(["/a", "/b"]);
        assert_eq!(config.scan_paths.len(), 2);
        assert_eq!(config.sync, SyncConfig::default());
    }
}
