//! A single read model over every Conductor source on disk.
//!
//! Each project keeps its own `.conductor/conductor.db`. [`Station`] finds
//! them, opens each read-only, and answers listings as if they were one
//! database: rows from every source are merged, tagged with a
//! [`CompositeId`] and the alias of the source they came from, and cached
//! until that source changes on disk.
//!
//! ```no_run
//! # async fn example() -> station_federation::error::Result<()> {
//! use station_federation::{FeatureFilters, FeatureStatus, Station};
//!
//! let station = Station::new();
//! station.initialize(&station_config::Config::with_scan_paths(["/work"])).await?;
//! let failing = station
//!     .features(&FeatureFilters {
//!         status: Some(FeatureStatus::Failed),
//!         ..Default::default()
//!     })
//!     .await?;
//! for feature in failing.iter() {
//!     println!("{} {}", feature.id, feature.description);
//! }
//! # Ok(())
//! # }
//! ```

pub mod error;
mod filters;
mod id;
mod models;
mod query;
mod stats;
mod station;

pub use crate::filters::{ErrorType, FeatureStatus, Filters, ReflectionType, SessionStatus};
pub use crate::id::{CompositeId, DELIMITER};
pub use crate::models::*;
pub use crate::query::{DEFAULT_SEARCH_LIMIT, Rows};
pub use crate::stats::{DashboardStats, STATS_TTL};
pub use crate::station::Station;
pub use station_source::{DiscoveredSource, Source};
pub use station_sync::{Subscription, SyncState};
