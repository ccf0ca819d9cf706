//! Site monitor.
//!
//! Watches external web pages for changes. Each monitored site is bound to a
//! plugin extractor and tracked in one of two modes:
//!
//! - **links** - the set of (url, description) pairs a page lists; urls not
//!   seen before are reported as new
//! - **hash** - a SHA-256 of the page; any difference is an update
//!
//! ```text
//! Scheduler ──tick──► due sites ──► Checker ──► Extractor::fetch
//!                                      │
//!                                      ├──► detector (pure diff)
//!                                      ├──► SiteStore::record_check (atomic)
//!                                      └──► Notifier
//! ```
//!
//! Extractors come from TOML manifests loaded by the [`PluginRegistry`], or
//! are registered directly.

pub mod check;
pub mod config;
pub mod detector;
pub mod error;
pub mod extractors;
pub mod inflight;
pub mod monitor;
pub mod notify;
pub mod plugins;
pub mod scheduler;
pub mod stores;
pub mod testing;
pub mod traits;
pub mod types;

pub use check::{run_check, CheckOutcome, Checker};
pub use config::MonitorConfig;
pub use detector::{classify_hash, detect, link_diff, Diff, HashTransition, RecordedState};
pub use error::{
    CheckError, DetectError, FetchError, LoadError, NotificationError, RegistryError, StoreError,
};
pub use inflight::{InflightGuard, InflightSites};
pub use monitor::Monitor;
pub use notify::{LogNotifier, Message, WebhookNotifier};
pub use plugins::{LoadReport, PluginRegistry, UnitInfo};
pub use scheduler::{is_due, Scheduler, TickReport};
pub use stores::{MemoryStore, SqliteStore};
pub use traits::{Extractor, Notifier, SiteStore};
pub use types::*;
