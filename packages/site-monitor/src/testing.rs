//! Testing utilities including mock implementations.
//!
//! These let applications exercise the check procedure and scheduler
//! without network access.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;

use crate::error::{FetchError, FetchResult, NotificationError, StoreError, StoreResult};
use crate::notify::Message;
use crate::traits::{Extractor, Notifier, SiteStore};
use crate::types::*;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// EXTRACTOR
// ============================================================================

/// One scripted response of a [`ScriptedExtractor`].
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Links(Vec<ScrapedLink>),
    Hash(String),
    /// Return this exact result
    Raw(ScrapeResult),
    /// Fail with a content error carrying this message
    Fail(String),
    /// Never return; only a deadline ends the fetch
    Hang,
}

/// An extractor that replays scripted responses.
///
/// Steps are consumed in order; the last step repeats forever.
pub struct ScriptedExtractor {
    id: String,
    name: String,
    url: String,
    mode: TrackingMode,
    steps: Mutex<VecDeque<ScriptStep>>,
    gate: Option<Arc<Semaphore>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl ScriptedExtractor {
    /// A links-mode extractor with no steps.
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            url: format!("https://example.com/{}", id),
            id,
            mode: TrackingMode::Links,
            steps: Mutex::new(VecDeque::new()),
            gate: None,
            delay: None,
            calls: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
        }
    }

    /// A hash-mode extractor with no steps.
    pub fn hash(id: impl Into<String>) -> Self {
        Self {
            mode: TrackingMode::Hash,
            ..Self::new(id)
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Block every fetch until the gate has a permit.
    pub fn with_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Sleep this long inside every fetch.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn then(self, step: ScriptStep) -> Self {
        self.push(step);
        self
    }

    pub fn then_links(self, links: &[(&str, &str)]) -> Self {
        self.then(ScriptStep::Links(
            links
                .iter()
                .map(|(url, description)| ScrapedLink::new(*url, *description))
                .collect(),
        ))
    }

    pub fn then_hash(self, hash: &str) -> Self {
        self.then(ScriptStep::Hash(hash.to_string()))
    }

    pub fn then_fail(self) -> Self {
        self.then(ScriptStep::Fail("scripted failure".to_string()))
    }

    /// Append a step after construction.
    pub fn push(&self, step: ScriptStep) {
        lock(&self.steps).push_back(step);
    }

    /// Drop pending steps and continue with `step`.
    pub fn replace(&self, step: ScriptStep) {
        let mut steps = lock(&self.steps);
        steps.clear();
        steps.push_back(step);
    }

    /// Number of fetches started.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of fetches that ran at once.
    pub fn max_concurrent(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    fn next_step(&self) -> Option<ScriptStep> {
        let mut steps = lock(&self.steps);
        if steps.len() > 1 {
            steps.pop_front()
        } else {
            steps.front().cloned()
        }
    }
}

struct RunningGuard<'a>(&'a AtomicUsize);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Extractor for ScriptedExtractor {
    fn id(&self) -> &str {
        &self.id
    }

    fn display_name(&self) -> &str {
        &self.name
    }

    fn source_url(&self) -> &str {
        &self.url
    }

    fn tracking_mode(&self) -> TrackingMode {
        self.mode
    }

    async fn fetch(&self, url: &str) -> FetchResult<ScrapeResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now_running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        let _running = RunningGuard(&self.running);
        self.max_running.fetch_max(now_running, Ordering::SeqCst);

        let _permit = match &self.gate {
            Some(gate) => gate.acquire().await.ok(),
            None => None,
        };
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match self.next_step() {
            Some(ScriptStep::Links(links)) => Ok(ScrapeResult::from_links(links)),
            Some(ScriptStep::Hash(hash)) => Ok(ScrapeResult::from_hash(hash)),
            Some(ScriptStep::Raw(result)) => Ok(result),
            Some(ScriptStep::Fail(message)) => Err(FetchError::Content(message)),
            Some(ScriptStep::Hang) => std::future::pending().await,
            None => Err(FetchError::Content(format!("no scripted response for {}", url))),
        }
    }
}

// ============================================================================
// NOTIFIER
// ============================================================================

/// A notifier that records messages, optionally failing every send.
#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<Message>>,
    failing: AtomicBool,
    stalled: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// A notifier whose every send fails (after recording the attempt).
    pub fn failing() -> Self {
        let notifier = Self::default();
        notifier.failing.store(true, Ordering::SeqCst);
        notifier
    }

    /// A notifier whose every send records the attempt and never completes.
    pub fn stalled() -> Self {
        let notifier = Self::default();
        notifier.stalled.store(true, Ordering::SeqCst);
        notifier
    }

    pub fn messages(&self) -> Vec<Message> {
        lock(&self.messages).clone()
    }

    pub fn count(&self) -> usize {
        lock(&self.messages).len()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, subject: &str, body: &str) -> Result<(), NotificationError> {
        lock(&self.messages).push(Message {
            subject: subject.to_string(),
            body: body.to_string(),
        });

        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotificationError::Rejected(503));
        }
        Ok(())
    }
}

// ============================================================================
// STORE
// ============================================================================

/// Wraps a store and fails `record_check` for chosen sites.
pub struct FlakyStore<S> {
    inner: S,
    failing: Mutex<HashSet<SiteId>>,
}

impl<S: SiteStore> FlakyStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            failing: Mutex::new(HashSet::new()),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Make every future `record_check` for `site_id` fail.
    pub fn fail_commits_for(&self, site_id: SiteId) {
        lock(&self.failing).insert(site_id);
    }
}

#[async_trait]
impl<S: SiteStore> SiteStore for FlakyStore<S> {
    async fn list_sites(&self) -> StoreResult<Vec<Site>> {
        self.inner.list_sites().await
    }

    async fn list_enabled_sites(&self) -> StoreResult<Vec<Site>> {
        self.inner.list_enabled_sites().await
    }

    async fn get_site(&self, id: SiteId) -> StoreResult<Option<Site>> {
        self.inner.get_site(id).await
    }

    async fn create_site(&self, site: Site) -> StoreResult<SiteId> {
        self.inner.create_site(site).await
    }

    async fn delete_site(&self, id: SiteId) -> StoreResult<Option<Site>> {
        self.inner.delete_site(id).await
    }

    async fn update_interval(&self, id: SiteId, interval: Interval) -> StoreResult<()> {
        self.inner.update_interval(id, interval).await
    }

    async fn set_enabled(&self, id: SiteId, enabled: bool) -> StoreResult<()> {
        self.inner.set_enabled(id, enabled).await
    }

    async fn count_sites(&self) -> StoreResult<usize> {
        self.inner.count_sites().await
    }

    async fn existing_link_urls(&self, site_id: SiteId) -> StoreResult<HashSet<String>> {
        self.inner.existing_link_urls(site_id).await
    }

    async fn list_links(&self, site_id: SiteId) -> StoreResult<Vec<LinkRecord>> {
        self.inner.list_links(site_id).await
    }

    async fn append_link_records(
        &self,
        site_id: SiteId,
        links: &[ScrapedLink],
        seen_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.inner.append_link_records(site_id, links, seen_at).await
    }

    async fn get_hash(&self, site_id: SiteId) -> StoreResult<Option<HashRecord>> {
        self.inner.get_hash(site_id).await
    }

    async fn upsert_hash_record(
        &self,
        site_id: SiteId,
        hash: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.inner.upsert_hash_record(site_id, hash, at).await
    }

    async fn set_last_checked(&self, site_id: SiteId, at: DateTime<Utc>) -> StoreResult<()> {
        self.inner.set_last_checked(site_id, at).await
    }

    async fn record_check(&self, commit: CheckCommit) -> StoreResult<()> {
        if lock(&self.failing).contains(&commit.site_id) {
            return Err(StoreError::Database(sqlx::Error::Protocol(
                "injected commit failure".to_string(),
            )));
        }
        self.inner.record_check(commit).await
    }
}
