//! Operator-facing API.
//!
//! Every operation returns the human-readable result text the dashboard and
//! CLI show; typed results are available through [`Checker`] and the store.

use std::sync::Arc;

use tracing::{info, warn};
use url::Url;

use crate::check::Checker;
use crate::config::MonitorConfig;
use crate::error::{RegistryError, StoreError, StoreResult};
use crate::plugins::{slug, LoadReport, PluginRegistry};
use crate::scheduler::Scheduler;
use crate::traits::{Notifier, SiteStore};
use crate::types::*;

pub struct Monitor<S> {
    checker: Checker<S>,
}

impl<S: SiteStore + 'static> Monitor<S> {
    pub fn new(
        store: Arc<S>,
        registry: Arc<PluginRegistry>,
        notifier: Arc<dyn Notifier>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            checker: Checker::new(store, registry, notifier, config),
        }
    }

    pub fn checker(&self) -> &Checker<S> {
        &self.checker
    }

    /// Scheduler sharing this monitor's in-flight set, so manual and
    /// scheduled checks of one site exclude each other.
    pub fn scheduler(&self) -> Scheduler<S> {
        Scheduler::new(self.checker.clone())
    }

    fn store(&self) -> &S {
        self.checker.store()
    }

    fn registry(&self) -> &PluginRegistry {
        self.checker.registry()
    }

    pub async fn list_sites(&self) -> StoreResult<Vec<Site>> {
        self.store().list_sites().await
    }

    /// Check a site now, regardless of its interval.
    pub async fn trigger_check(&self, site_id: SiteId) -> String {
        match self.checker.check(site_id).await {
            Ok(outcome) => outcome.to_string(),
            Err(e) => e.to_string(),
        }
    }

    pub async fn set_interval(&self, site_id: SiteId, interval: impl Into<Interval>) -> String {
        let interval = interval.into();
        match self.store().update_interval(site_id, interval).await {
            Ok(()) => {
                info!(site_id = %site_id, interval = %interval, "Scrape interval updated");
                format!("Scrape interval updated to {}", interval)
            }
            Err(StoreError::SiteNotFound(_)) => "Site not found".to_string(),
            Err(e) => format!("Database error: {}", e),
        }
    }

    /// Add a site with interval `never`.
    ///
    /// Hash sites get a generated unit. Links sites need site-specific
    /// knowledge, so a unit named after the site must already be loaded.
    pub async fn add_site(&self, name: &str, url: &str, mode: TrackingMode) -> String {
        let name = name.trim();
        let url = url.trim();
        if name.is_empty() || !is_web_url(url) {
            return "Invalid name or URL".to_string();
        }

        let (extractor_id, generated) = match mode {
            TrackingMode::Hash => match self.registry().install_hash_unit(name, url) {
                Ok(id) => (id, true),
                Err(RegistryError::AlreadyExists(id)) => {
                    return format!("Site {} already exists ({})", name, id)
                }
                Err(e) => return format!("Failed to create plugin: {}", e),
            },
            TrackingMode::Links => {
                let id = slug(name);
                match self.registry().resolve(&id) {
                    Ok(extractor) if extractor.tracking_mode() == TrackingMode::Links => (id, false),
                    _ => return format!("No extractor found for {}", name),
                }
            }
        };

        let site = Site::new(name, url, &extractor_id, mode);
        match self.store().create_site(site).await {
            Ok(site_id) => {
                info!(site_id = %site_id, name = %name, extractor = %extractor_id, "Site added");
                format!("Site {} added successfully", name)
            }
            Err(e) => {
                if generated {
                    if let Err(cleanup) = self.registry().remove_generated_unit(&extractor_id) {
                        warn!(unit = %extractor_id, error = %cleanup, "Failed to remove generated unit");
                    }
                }
                format!("Database error: {}", e)
            }
        }
    }

    /// Delete a site, its records, and its generated unit if it has one.
    pub async fn delete_site(&self, site_id: SiteId) -> String {
        let site = match self.store().delete_site(site_id).await {
            Ok(Some(site)) => site,
            Ok(None) => return "Site not found".to_string(),
            Err(e) => return format!("Database error: {}", e),
        };

        if let Err(e) = self.registry().remove_generated_unit(&site.extractor_id) {
            warn!(unit = %site.extractor_id, error = %e, "Failed to remove generated unit");
        }

        info!(site_id = %site_id, name = %site.name, "Site deleted");
        format!("Site {} deleted successfully", site.name)
    }

    /// Admit a unit dropped into the plugin directory and create its site.
    pub async fn import_plugin(&self, plugin_id: &str) -> String {
        let info = match self.registry().load_unit_by_id(plugin_id) {
            Ok(info) => info,
            Err(e) => {
                warn!(unit = %plugin_id, error = %e, "Plugin import rejected");
                return format!("Invalid plugin: {}", e);
            }
        };

        let site = Site::new(&info.name, &info.url, &info.id, info.mode);
        match self.store().create_site(site).await {
            Ok(site_id) => {
                info!(site_id = %site_id, unit = %info.id, "Plugin imported");
                "Scraper uploaded successfully".to_string()
            }
            Err(e) => {
                warn!(unit = %info.id, error = %e, "Failed to add imported plugin's site");
                "Failed to add scraper to database".to_string()
            }
        }
    }

    /// On an empty store, create one site per loaded unit.
    ///
    /// Returns the number of sites created.
    pub async fn seed_sites_from_plugins(&self) -> StoreResult<usize> {
        if self.store().count_sites().await? > 0 {
            return Ok(0);
        }

        let units = self.registry().units();
        for unit in &units {
            self.store()
                .create_site(Site::new(&unit.name, &unit.url, &unit.id, unit.mode))
                .await?;
        }

        info!(sites = units.len(), "Seeded sites from plugin units");
        Ok(units.len())
    }

    pub fn reload_plugins(&self) -> Result<LoadReport, RegistryError> {
        self.registry().load_all()
    }
}

fn is_web_url(raw: &str) -> bool {
    Url::parse(raw)
        .map(|url| matches!(url.scheme(), "http" | "https") && url.host().is_some())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_web_url() {
        assert!(is_web_url("https://example.com/jobs"));
        assert!(is_web_url("http://localhost:8080"));
        assert!(!is_web_url("ftp://example.com"));
        assert!(!is_web_url("example.com"));
        assert!(!is_web_url(""));
    }
}
