//! In-flight check tracking.
//!
//! A site is marked when a check is dispatched and unmarked when the guard
//! drops, whether the check finished, failed, panicked or was cancelled.

use std::sync::Arc;

use dashmap::DashSet;

use crate::types::SiteId;

/// Sites with a check currently outstanding.
#[derive(Debug, Clone, Default)]
pub struct InflightSites {
    sites: Arc<DashSet<SiteId>>,
}

impl InflightSites {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a site as in flight. Returns `None` if it already is.
    pub fn try_acquire(&self, site_id: SiteId) -> Option<InflightGuard> {
        if self.sites.insert(site_id) {
            Some(InflightGuard {
                sites: Arc::clone(&self.sites),
                site_id,
            })
        } else {
            None
        }
    }

    pub fn contains(&self, site_id: SiteId) -> bool {
        self.sites.contains(&site_id)
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }
}

/// RAII mark for one in-flight site.
#[derive(Debug)]
pub struct InflightGuard {
    sites: Arc<DashSet<SiteId>>,
    site_id: SiteId,
}

impl InflightGuard {
    pub fn site_id(&self) -> SiteId {
        self.site_id
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.sites.remove(&self.site_id);
    }
}
