//! Change detection for sources written by another process.
//!
//! There is no notification channel from the writer, so the [`SyncEngine`]
//! polls: on every tick it stats each valid source and compares the file's
//! modification time with the last one it saw. Sources whose time moved
//! forward have their dependent cache entries invalidated and are reported to
//! every [`Listeners`] subscriber.
//!
//! Polling runs at one of two intervals. The default (cold) interval is long;
//! *live mode* switches to a short one while somebody is actively watching.

pub mod error;
mod engine;
mod listeners;

pub use crate::engine::{SourceState, SyncEngine, SyncState};
pub use crate::listeners::{Listeners, Subscription};
