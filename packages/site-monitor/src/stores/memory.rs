//! In-memory site store for tests and dry runs.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{ensure_mode, validate_commit};
use crate::error::{StoreError, StoreResult};
use crate::traits::SiteStore;
use crate::types::*;

#[derive(Default)]
struct State {
    sites: HashMap<SiteId, Site>,
    links: HashMap<SiteId, Vec<LinkRecord>>,
    hashes: HashMap<SiteId, HashRecord>,
}

impl State {
    fn site(&self, id: SiteId) -> StoreResult<&Site> {
        self.sites.get(&id).ok_or(StoreError::SiteNotFound(id))
    }

    fn site_mut(&mut self, id: SiteId) -> StoreResult<&mut Site> {
        self.sites.get_mut(&id).ok_or(StoreError::SiteNotFound(id))
    }

    /// Append links whose url is not yet recorded for the site.
    fn append_links(&mut self, site_id: SiteId, links: &[ScrapedLink], seen_at: DateTime<Utc>) {
        let records = self.links.entry(site_id).or_default();
        let mut known: HashSet<String> = records.iter().map(|r| r.url.clone()).collect();
        for link in links {
            if known.insert(link.url.clone()) {
                records.push(LinkRecord {
                    site_id,
                    url: link.url.clone(),
                    description: link.description.clone(),
                    first_seen_at: seen_at,
                });
            }
        }
    }

    fn put_hash(&mut self, site_id: SiteId, hash: &str, at: DateTime<Utc>) {
        self.hashes.insert(
            site_id,
            HashRecord {
                site_id,
                hash: hash.to_string(),
                updated_at: at,
            },
        );
    }
}

/// In-memory storage. Every operation holds one lock, so composite writes
/// are atomic with respect to readers.
///
/// Not suitable for production as data is lost on restart.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with sites.
    pub async fn with_sites(sites: impl IntoIterator<Item = Site>) -> Self {
        let store = Self::new();
        {
            let mut state = store.state.write().await;
            for site in sites {
                state.sites.insert(site.id, site);
            }
        }
        store
    }

    /// Number of link records across all sites.
    pub async fn link_record_count(&self) -> usize {
        self.state.read().await.links.values().map(Vec::len).sum()
    }
}

#[async_trait]
impl SiteStore for MemoryStore {
    async fn list_sites(&self) -> StoreResult<Vec<Site>> {
        let state = self.state.read().await;
        let mut sites: Vec<Site> = state.sites.values().cloned().collect();
        sites.sort_by_key(|s| s.id);
        Ok(sites)
    }

    async fn list_enabled_sites(&self) -> StoreResult<Vec<Site>> {
        Ok(self
            .list_sites()
            .await?
            .into_iter()
            .filter(|s| s.enabled)
            .collect())
    }

    async fn get_site(&self, id: SiteId) -> StoreResult<Option<Site>> {
        Ok(self.state.read().await.sites.get(&id).cloned())
    }

    async fn create_site(&self, site: Site) -> StoreResult<SiteId> {
        let id = site.id;
        self.state.write().await.sites.insert(id, site);
        Ok(id)
    }

    async fn delete_site(&self, id: SiteId) -> StoreResult<Option<Site>> {
        let mut state = self.state.write().await;
        let removed = state.sites.remove(&id);
        state.links.remove(&id);
        state.hashes.remove(&id);
        Ok(removed)
    }

    async fn update_interval(&self, id: SiteId, interval: Interval) -> StoreResult<()> {
        self.state.write().await.site_mut(id)?.interval = interval;
        Ok(())
    }

    async fn set_enabled(&self, id: SiteId, enabled: bool) -> StoreResult<()> {
        self.state.write().await.site_mut(id)?.enabled = enabled;
        Ok(())
    }

    async fn count_sites(&self) -> StoreResult<usize> {
        Ok(self.state.read().await.sites.len())
    }

    async fn existing_link_urls(&self, site_id: SiteId) -> StoreResult<HashSet<String>> {
        let state = self.state.read().await;
        Ok(state
            .links
            .get(&site_id)
            .map(|records| records.iter().map(|r| r.url.clone()).collect())
            .unwrap_or_default())
    }

    async fn list_links(&self, site_id: SiteId) -> StoreResult<Vec<LinkRecord>> {
        let state = self.state.read().await;
        Ok(state.links.get(&site_id).cloned().unwrap_or_default())
    }

    async fn append_link_records(
        &self,
        site_id: SiteId,
        links: &[ScrapedLink],
        seen_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut state = self.state.write().await;
        ensure_mode(site_id, state.site(site_id)?.tracking_mode, TrackingMode::Links)?;
        state.append_links(site_id, links, seen_at);
        Ok(())
    }

    async fn get_hash(&self, site_id: SiteId) -> StoreResult<Option<HashRecord>> {
        Ok(self.state.read().await.hashes.get(&site_id).cloned())
    }

    async fn upsert_hash_record(
        &self,
        site_id: SiteId,
        hash: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut state = self.state.write().await;
        ensure_mode(site_id, state.site(site_id)?.tracking_mode, TrackingMode::Hash)?;
        state.put_hash(site_id, hash, at);
        Ok(())
    }

    async fn set_last_checked(&self, site_id: SiteId, at: DateTime<Utc>) -> StoreResult<()> {
        self.state.write().await.site_mut(site_id)?.last_checked_at = Some(at);
        Ok(())
    }

    async fn record_check(&self, commit: CheckCommit) -> StoreResult<()> {
        let mut state = self.state.write().await;
        validate_commit(state.site(commit.site_id)?.tracking_mode, &commit)?;

        if !commit.new_links.is_empty() {
            state.append_links(commit.site_id, &commit.new_links, commit.checked_at);
        }
        if let Some(hash) = &commit.new_hash {
            state.put_hash(commit.site_id, hash, commit.checked_at);
        }

        let site = state.site_mut(commit.site_id)?;
        site.last_checked_at = Some(commit.checked_at);
        if commit.link_count.is_some() {
            site.last_link_count = commit.link_count;
        }
        Ok(())
    }
}
