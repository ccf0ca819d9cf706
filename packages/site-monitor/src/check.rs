//! The per-site check procedure.
//!
//! resolve extractor → fetch under deadline → detect → commit → notify.
//! State is written in one `record_check` call; notification happens after
//! the commit and its failure is only logged.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::MonitorConfig;
use crate::detector::{detect, Diff, HashTransition, RecordedState};
use crate::error::{CheckError, FetchError, NotificationError};
use crate::inflight::{InflightGuard, InflightSites};
use crate::notify::Message;
use crate::plugins::PluginRegistry;
use crate::traits::{Notifier, SiteStore};
use crate::types::*;

/// Successful result of one check.
///
/// `Display` renders the result text shown to operators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    NewLinks(Vec<ScrapedLink>),
    NoNewLinks,
    HashFirstSeen { hash: String },
    HashChanged { previous: String, current: String },
    HashUnchanged,
}

impl CheckOutcome {
    fn from_diff(diff: Diff) -> Self {
        match diff {
            Diff::NewLinks(links) if links.is_empty() => CheckOutcome::NoNewLinks,
            Diff::NewLinks(links) => CheckOutcome::NewLinks(links),
            Diff::Hash { current, transition } => match transition {
                HashTransition::FirstSeen => CheckOutcome::HashFirstSeen { hash: current },
                HashTransition::Changed { previous } => CheckOutcome::HashChanged { previous, current },
                HashTransition::Unchanged => CheckOutcome::HashUnchanged,
            },
        }
    }

    pub fn is_change(&self) -> bool {
        matches!(self, CheckOutcome::NewLinks(_) | CheckOutcome::HashChanged { .. })
    }

    /// Message to send for this outcome, if any.
    pub fn notification(&self, url: &str, notify_on_first_seen: bool) -> Option<Message> {
        match self {
            CheckOutcome::NewLinks(links) => Some(Message::new_links(url, links)),
            CheckOutcome::HashChanged { current, .. } => Some(Message::hash_changed(url, current)),
            CheckOutcome::HashFirstSeen { hash } if notify_on_first_seen => {
                Some(Message::hash_changed(url, hash))
            }
            _ => None,
        }
    }
}

impl fmt::Display for CheckOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckOutcome::NewLinks(links) => {
                write!(f, "Update detected: {} new links found", links.len())
            }
            CheckOutcome::NoNewLinks => f.write_str("No new links found"),
            CheckOutcome::HashFirstSeen { .. } => f.write_str("New site: hash generated"),
            CheckOutcome::HashChanged { .. } => f.write_str("Update detected: site hash changed"),
            CheckOutcome::HashUnchanged => f.write_str("Same hash as before: no site update"),
        }
    }
}

/// Run one check of `site` to completion.
///
/// Callers are responsible for the at-most-one-in-flight rule; see
/// [`Checker`].
pub async fn run_check<S: SiteStore + ?Sized>(
    site: &Site,
    store: &S,
    registry: &PluginRegistry,
    notifier: &dyn Notifier,
    config: &MonitorConfig,
) -> Result<CheckOutcome, CheckError> {
    let extractor = registry.resolve(&site.extractor_id)?;

    let result = match tokio::time::timeout(config.fetch_timeout, extractor.fetch(&site.url)).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            warn!(site_id = %site.id, url = %site.url, error = %e, "Scrape failed");
            return Err(CheckError::ScrapeFailed(e));
        }
        Err(_) => {
            warn!(site_id = %site.id, url = %site.url, timeout = ?config.fetch_timeout, "Scrape timed out");
            return Err(CheckError::ScrapeFailed(FetchError::Timeout {
                url: site.url.clone(),
            }));
        }
    };

    let diff = match site.tracking_mode {
        TrackingMode::Links => {
            let existing = store.existing_link_urls(site.id).await?;
            detect(site.tracking_mode, &result, RecordedState::Links(&existing))?
        }
        TrackingMode::Hash => {
            let previous = store.get_hash(site.id).await?;
            let previous = previous.as_ref().map(|record| record.hash.as_str());
            detect(site.tracking_mode, &result, RecordedState::Hash(previous))?
        }
    };

    let checked_at = Utc::now();
    let commit = match &diff {
        Diff::NewLinks(links) => CheckCommit {
            site_id: site.id,
            checked_at,
            new_links: links.clone(),
            new_hash: None,
            link_count: Some(result.link_count as i64),
        },
        Diff::Hash {
            transition: HashTransition::Unchanged,
            ..
        } => CheckCommit::touch(site.id, checked_at),
        Diff::Hash { current, .. } => CheckCommit {
            new_hash: Some(current.clone()),
            ..CheckCommit::touch(site.id, checked_at)
        },
    };

    if let Err(e) = store.record_check(commit).await {
        warn!(site_id = %site.id, error = %e, "Failed to record check");
        return Err(e.into());
    }

    let outcome = CheckOutcome::from_diff(diff);
    info!(site_id = %site.id, url = %site.url, result = %outcome, "Site checked");

    if let Some(message) = outcome.notification(&site.url, config.notify_on_first_seen) {
        let sent = tokio::time::timeout(config.notify_timeout, message.send(notifier))
            .await
            .unwrap_or(Err(NotificationError::Timeout(config.notify_timeout)));
        match sent {
            Ok(()) => debug!(site_id = %site.id, subject = %message.subject, "Notification sent"),
            Err(e) => warn!(site_id = %site.id, error = %e, "Notification failed"),
        }
    }

    Ok(outcome)
}

/// Runs checks against shared collaborators while enforcing at most one
/// in-flight check per site.
pub struct Checker<S> {
    store: Arc<S>,
    registry: Arc<PluginRegistry>,
    notifier: Arc<dyn Notifier>,
    config: MonitorConfig,
    inflight: InflightSites,
}

impl<S> Clone for Checker<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            registry: Arc::clone(&self.registry),
            notifier: Arc::clone(&self.notifier),
            config: self.config.clone(),
            inflight: self.inflight.clone(),
        }
    }
}

impl<S: SiteStore + 'static> Checker<S> {
    pub fn new(
        store: Arc<S>,
        registry: Arc<PluginRegistry>,
        notifier: Arc<dyn Notifier>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            store,
            registry,
            notifier,
            config,
            inflight: InflightSites::new(),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn inflight(&self) -> &InflightSites {
        &self.inflight
    }

    /// Check a site by id. Refused if a check of it is already running.
    pub async fn check(&self, site_id: SiteId) -> Result<CheckOutcome, CheckError> {
        let guard = self
            .inflight
            .try_acquire(site_id)
            .ok_or(CheckError::AlreadyRunning(site_id))?;

        let site = self
            .store
            .get_site(site_id)
            .await?
            .ok_or(CheckError::SiteNotFound(site_id))?;

        self.run_guarded(&site, guard).await
    }

    /// Check a site snapshot. Refused if a check of it is already running.
    pub async fn check_site(&self, site: &Site) -> Result<CheckOutcome, CheckError> {
        let guard = self
            .inflight
            .try_acquire(site.id)
            .ok_or(CheckError::AlreadyRunning(site.id))?;
        self.run_guarded(site, guard).await
    }

    /// Run a check for which the in-flight mark is already held.
    pub(crate) async fn run_guarded(
        &self,
        site: &Site,
        guard: InflightGuard,
    ) -> Result<CheckOutcome, CheckError> {
        debug_assert_eq!(guard.site_id(), site.id);
        let result = run_check(
            site,
            self.store.as_ref(),
            &self.registry,
            self.notifier.as_ref(),
            &self.config,
        )
        .await;
        drop(guard);
        result
    }
}
