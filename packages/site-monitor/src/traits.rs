use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{FetchResult, NotificationError, StoreResult};
use crate::types::*;

// ============================================================================
// EXTRACTOR: Site-specific knowledge (network + parsing)
// ============================================================================

#[async_trait]
pub trait Extractor: Send + Sync {
    /// Plugin id; sites reference extractors by this value
    fn id(&self) -> &str;

    fn display_name(&self) -> &str;

    /// The page this extractor was written for
    fn source_url(&self) -> &str;

    /// Mode a site created from this extractor should track
    fn tracking_mode(&self) -> TrackingMode {
        TrackingMode::Links
    }

    /// Fetch and summarize a page
    async fn fetch(&self, url: &str) -> FetchResult<ScrapeResult>;
}

// ============================================================================
// SITE STORE: Persistence (each call transactional on its own)
// ============================================================================

#[async_trait]
pub trait SiteStore: Send + Sync {
    // Sites
    async fn list_sites(&self) -> StoreResult<Vec<Site>>;

    async fn list_enabled_sites(&self) -> StoreResult<Vec<Site>>;

    async fn get_site(&self, id: SiteId) -> StoreResult<Option<Site>>;

    async fn create_site(&self, site: Site) -> StoreResult<SiteId>;

    /// Remove a site together with its link and hash records
    async fn delete_site(&self, id: SiteId) -> StoreResult<Option<Site>>;

    async fn update_interval(&self, id: SiteId, interval: Interval) -> StoreResult<()>;

    async fn set_enabled(&self, id: SiteId, enabled: bool) -> StoreResult<()>;

    async fn count_sites(&self) -> StoreResult<usize>;

    // Link records (links mode)
    async fn existing_link_urls(&self, site_id: SiteId) -> StoreResult<HashSet<String>>;

    async fn list_links(&self, site_id: SiteId) -> StoreResult<Vec<LinkRecord>>;

    async fn append_link_records(
        &self,
        site_id: SiteId,
        links: &[ScrapedLink],
        seen_at: DateTime<Utc>,
    ) -> StoreResult<()>;

    // Hash record (hash mode)
    async fn get_hash(&self, site_id: SiteId) -> StoreResult<Option<HashRecord>>;

    async fn upsert_hash_record(
        &self,
        site_id: SiteId,
        hash: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<()>;

    async fn set_last_checked(&self, site_id: SiteId, at: DateTime<Utc>) -> StoreResult<()>;

    /// Apply every write of a successful check atomically: either all of
    /// `last_checked_at`, the new records and the link count land, or none do.
    async fn record_check(&self, commit: CheckCommit) -> StoreResult<()>;
}

// ============================================================================
// NOTIFIER: Operator-facing delivery (failure is never fatal)
// ============================================================================

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, subject: &str, body: &str) -> Result<(), NotificationError>;
}
