//! SQLite site store.
//!
//! Dates are stored as RFC 3339 text, ids as hyphenated UUID text. Composite
//! writes (`record_check`, `delete_site`) run in a single transaction.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnection, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;

use super::{ensure_mode, validate_commit};
use crate::error::{StoreError, StoreResult};
use crate::traits::SiteStore;
use crate::types::*;

/// SQLite-backed site store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect and run migrations.
    ///
    /// # Example URLs
    /// - `sqlite://site-monitor.db?mode=rwc` - File-based, create if missing
    /// - `sqlite::memory:` - Prefer [`SqliteStore::in_memory`]
    pub async fn new(database_url: &str) -> StoreResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Self::from_pool(pool).await
    }

    /// In-memory database (for testing).
    ///
    /// Every connection to `:memory:` is a separate database, so the pool is
    /// pinned to one connection that never expires.
    pub async fn in_memory() -> StoreResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Self::from_pool(pool).await
    }

    async fn from_pool(pool: SqlitePool) -> StoreResult<Self> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sites (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                url TEXT NOT NULL,
                extractor_id TEXT NOT NULL,
                tracking_mode TEXT NOT NULL,
                scrape_interval TEXT NOT NULL DEFAULT 'never',
                last_checked_at TEXT,
                enabled INTEGER NOT NULL DEFAULT 1,
                last_link_count INTEGER
            );

            CREATE TABLE IF NOT EXISTS link_records (
                site_id TEXT NOT NULL REFERENCES sites(id) ON DELETE CASCADE,
                url TEXT NOT NULL,
                description TEXT NOT NULL,
                first_seen_at TEXT NOT NULL,
                PRIMARY KEY (site_id, url)
            );

            CREATE TABLE IF NOT EXISTS hash_records (
                site_id TEXT PRIMARY KEY REFERENCES sites(id) ON DELETE CASCADE,
                hash TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

// Row types for sqlx queries
#[derive(Debug, FromRow)]
struct SiteRow {
    id: String,
    name: String,
    url: String,
    extractor_id: String,
    tracking_mode: String,
    scrape_interval: String,
    last_checked_at: Option<String>,
    enabled: bool,
    last_link_count: Option<i64>,
}

impl SiteRow {
    fn into_site(self) -> StoreResult<Site> {
        Ok(Site {
            id: parse_id(&self.id)?,
            tracking_mode: self
                .tracking_mode
                .parse()
                .map_err(|e: String| StoreError::Corrupt(e))?,
            interval: Interval::from_label(&self.scrape_interval),
            last_checked_at: self.last_checked_at.as_deref().map(parse_date).transpose()?,
            name: self.name,
            url: self.url,
            extractor_id: self.extractor_id,
            enabled: self.enabled,
            last_link_count: self.last_link_count,
        })
    }
}

#[derive(Debug, FromRow)]
struct LinkRow {
    site_id: String,
    url: String,
    description: String,
    first_seen_at: String,
}

impl LinkRow {
    fn into_record(self) -> StoreResult<LinkRecord> {
        Ok(LinkRecord {
            site_id: parse_id(&self.site_id)?,
            first_seen_at: parse_date(&self.first_seen_at)?,
            url: self.url,
            description: self.description,
        })
    }
}

#[derive(Debug, FromRow)]
struct HashRow {
    site_id: String,
    hash: String,
    updated_at: String,
}

impl HashRow {
    fn into_record(self) -> StoreResult<HashRecord> {
        Ok(HashRecord {
            site_id: parse_id(&self.site_id)?,
            updated_at: parse_date(&self.updated_at)?,
            hash: self.hash,
        })
    }
}

fn parse_id(raw: &str) -> StoreResult<SiteId> {
    raw.parse()
        .map_err(|e| StoreError::Corrupt(format!("Invalid site id {}: {}", raw, e)))
}

fn parse_date(raw: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("Invalid date: {}", e)))
}

const SITE_COLUMNS: &str = "id, name, url, extractor_id, tracking_mode, scrape_interval, last_checked_at, enabled, last_link_count";

/// Take the database write lock and read the site's mode.
///
/// Must be the first statement of a write transaction. A leading `SELECT`
/// would hold a read lock that SQLite cannot upgrade while another writer is
/// active, failing with `SQLITE_BUSY` instead of waiting out the busy timeout.
async fn lock_site_mode(
    conn: &mut SqliteConnection,
    site_id: SiteId,
) -> StoreResult<TrackingMode> {
    let mode: Option<String> = sqlx::query_scalar(
        "UPDATE sites SET tracking_mode = tracking_mode WHERE id = ? RETURNING tracking_mode",
    )
    .bind(site_id.to_string())
    .fetch_optional(&mut *conn)
    .await?;

    mode.ok_or(StoreError::SiteNotFound(site_id))?
        .parse()
        .map_err(StoreError::Corrupt)
}

async fn insert_links(
    conn: &mut SqliteConnection,
    site_id: SiteId,
    links: &[ScrapedLink],
    seen_at: DateTime<Utc>,
) -> StoreResult<()> {
    let site_id = site_id.to_string();
    let seen_at = seen_at.to_rfc3339();
    for link in links {
        sqlx::query(
            "INSERT OR IGNORE INTO link_records (site_id, url, description, first_seen_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&site_id)
        .bind(&link.url)
        .bind(&link.description)
        .bind(&seen_at)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

async fn upsert_hash(
    conn: &mut SqliteConnection,
    site_id: SiteId,
    hash: &str,
    at: DateTime<Utc>,
) -> StoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO hash_records (site_id, hash, updated_at)
        VALUES (?, ?, ?)
        ON CONFLICT(site_id) DO UPDATE SET
            hash = excluded.hash,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(site_id.to_string())
    .bind(hash)
    .bind(at.to_rfc3339())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

#[async_trait]
impl SiteStore for SqliteStore {
    async fn list_sites(&self) -> StoreResult<Vec<Site>> {
        let rows = sqlx::query_as::<_, SiteRow>(&format!(
            "SELECT {} FROM sites ORDER BY id",
            SITE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(SiteRow::into_site).collect()
    }

    async fn list_enabled_sites(&self) -> StoreResult<Vec<Site>> {
        let rows = sqlx::query_as::<_, SiteRow>(&format!(
            "SELECT {} FROM sites WHERE enabled = 1 ORDER BY id",
            SITE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(SiteRow::into_site).collect()
    }

    async fn get_site(&self, id: SiteId) -> StoreResult<Option<Site>> {
        let row = sqlx::query_as::<_, SiteRow>(&format!(
            "SELECT {} FROM sites WHERE id = ?",
            SITE_COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(SiteRow::into_site).transpose()
    }

    async fn create_site(&self, site: Site) -> StoreResult<SiteId> {
        sqlx::query(
            r#"
            INSERT INTO sites (id, name, url, extractor_id, tracking_mode, scrape_interval, last_checked_at, enabled, last_link_count)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(site.id.to_string())
        .bind(&site.name)
        .bind(&site.url)
        .bind(&site.extractor_id)
        .bind(site.tracking_mode.as_str())
        .bind(site.interval.label())
        .bind(site.last_checked_at.map(|d| d.to_rfc3339()))
        .bind(site.enabled)
        .bind(site.last_link_count)
        .execute(&self.pool)
        .await?;

        Ok(site.id)
    }

    async fn delete_site(&self, id: SiteId) -> StoreResult<Option<Site>> {
        let Some(site) = self.get_site(id).await? else {
            return Ok(None);
        };

        let mut tx = self.pool.begin().await?;
        for table in ["link_records", "hash_records"] {
            sqlx::query(&format!("DELETE FROM {} WHERE site_id = ?", table))
                .bind(id.to_string())
                .execute(&mut *tx)
                .await?;
        }
        let deleted = sqlx::query("DELETE FROM sites WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;

        Ok((deleted > 0).then_some(site))
    }

    async fn update_interval(&self, id: SiteId, interval: Interval) -> StoreResult<()> {
        let result = sqlx::query("UPDATE sites SET scrape_interval = ? WHERE id = ?")
            .bind(interval.label())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::SiteNotFound(id));
        }
        Ok(())
    }

    async fn set_enabled(&self, id: SiteId, enabled: bool) -> StoreResult<()> {
        let result = sqlx::query("UPDATE sites SET enabled = ? WHERE id = ?")
            .bind(enabled)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::SiteNotFound(id));
        }
        Ok(())
    }

    async fn count_sites(&self) -> StoreResult<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sites")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    async fn existing_link_urls(&self, site_id: SiteId) -> StoreResult<HashSet<String>> {
        let urls: Vec<String> = sqlx::query_scalar("SELECT url FROM link_records WHERE site_id = ?")
            .bind(site_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        Ok(urls.into_iter().collect())
    }

    async fn list_links(&self, site_id: SiteId) -> StoreResult<Vec<LinkRecord>> {
        let rows = sqlx::query_as::<_, LinkRow>(
            "SELECT site_id, url, description, first_seen_at FROM link_records WHERE site_id = ? ORDER BY rowid",
        )
        .bind(site_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(LinkRow::into_record).collect()
    }

    async fn append_link_records(
        &self,
        site_id: SiteId,
        links: &[ScrapedLink],
        seen_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        let mode = lock_site_mode(&mut *tx, site_id).await?;
        ensure_mode(site_id, mode, TrackingMode::Links)?;
        insert_links(&mut *tx, site_id, links, seen_at).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get_hash(&self, site_id: SiteId) -> StoreResult<Option<HashRecord>> {
        let row = sqlx::query_as::<_, HashRow>(
            "SELECT site_id, hash, updated_at FROM hash_records WHERE site_id = ?",
        )
        .bind(site_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(HashRow::into_record).transpose()
    }

    async fn upsert_hash_record(
        &self,
        site_id: SiteId,
        hash: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        let mode = lock_site_mode(&mut *tx, site_id).await?;
        ensure_mode(site_id, mode, TrackingMode::Hash)?;
        upsert_hash(&mut *tx, site_id, hash, at).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn set_last_checked(&self, site_id: SiteId, at: DateTime<Utc>) -> StoreResult<()> {
        let result = sqlx::query("UPDATE sites SET last_checked_at = ? WHERE id = ?")
            .bind(at.to_rfc3339())
            .bind(site_id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::SiteNotFound(site_id));
        }
        Ok(())
    }

    async fn record_check(&self, commit: CheckCommit) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        let mode = lock_site_mode(&mut *tx, commit.site_id).await?;
        validate_commit(mode, &commit)?;

        if !commit.new_links.is_empty() {
            insert_links(&mut *tx, commit.site_id, &commit.new_links, commit.checked_at).await?;
        }
        if let Some(hash) = &commit.new_hash {
            upsert_hash(&mut *tx, commit.site_id, hash, commit.checked_at).await?;
        }

        sqlx::query(
            "UPDATE sites SET last_checked_at = ?, last_link_count = COALESCE(?, last_link_count) WHERE id = ?",
        )
        .bind(commit.checked_at.to_rfc3339())
        .bind(commit.link_count)
        .bind(commit.site_id.to_string())
        .execute(&mut *tx)
        .await?;

        // Dropping `tx` on any early return above rolls everything back.
        tx.commit().await?;
        Ok(())
    }
}
