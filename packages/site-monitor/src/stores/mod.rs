//! Site store implementations.
//!
//! Available backends:
//! - `MemoryStore` - In-memory storage for tests and dry runs
//! - `SqliteStore` - SQLite file or in-memory database

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::{StoreError, StoreResult};
use crate::types::{CheckCommit, SiteId, TrackingMode};

/// Reject a record write that does not match the site's tracking mode.
pub(crate) fn ensure_mode(site_id: SiteId, actual: TrackingMode, expected: TrackingMode) -> StoreResult<()> {
    if actual == expected {
        Ok(())
    } else {
        Err(StoreError::ModeMismatch {
            site_id,
            expected: expected.as_str(),
        })
    }
}

/// Validate every write in a commit before any of it is applied.
pub(crate) fn validate_commit(mode: TrackingMode, commit: &CheckCommit) -> StoreResult<()> {
    if !commit.new_links.is_empty() || commit.link_count.is_some() {
        ensure_mode(commit.site_id, mode, TrackingMode::Links)?;
    }
    if commit.new_hash.is_some() {
        ensure_mode(commit.site_id, mode, TrackingMode::Hash)?;
    }
    Ok(())
}
