use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use site_monitor::testing::{FlakyStore, RecordingNotifier, ScriptStep, ScriptedExtractor};
use site_monitor::*;
use tempfile::TempDir;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

struct Harness {
    monitor: Arc<Monitor<MemoryStore>>,
    store: Arc<MemoryStore>,
    registry: Arc<PluginRegistry>,
    notifier: Arc<RecordingNotifier>,
    dir: TempDir,
}

fn harness_with(config: MonitorConfig, notifier: RecordingNotifier) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());
    let registry = Arc::new(PluginRegistry::new(dir.path()));
    let notifier = Arc::new(notifier);
    let monitor = Arc::new(Monitor::new(
        store.clone(),
        registry.clone(),
        notifier.clone(),
        config,
    ));
    Harness {
        monitor,
        store,
        registry,
        notifier,
        dir,
    }
}

fn harness() -> Harness {
    harness_with(MonitorConfig::default(), RecordingNotifier::new())
}

async fn add_site(h: &Harness, site: Site) -> SiteId {
    h.store.create_site(site).await.unwrap()
}

// ============================================================================
// LINKS MODE
// ============================================================================

#[tokio::test]
async fn new_links_are_recorded_and_reported() {
    let h = harness();
    h.registry.register(Arc::new(
        ScriptedExtractor::new("jobs").then_links(&[("/a", "A"), ("/b", "B")]),
    ));
    let id = add_site(&h, Site::new("Jobs", "https://example.com/jobs", "jobs", TrackingMode::Links)).await;
    h.store
        .append_link_records(id, &[ScrapedLink::new("/a", "A")], Utc::now())
        .await
        .unwrap();

    let text = h.monitor.trigger_check(id).await;

    assert_eq!(text, "Update detected: 1 new links found");
    let messages = h.notifier.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].subject, "New links detected on https://example.com/jobs");
    assert_eq!(messages[0].body, "The following new links were found:\n\n/b - B");

    let site = h.store.get_site(id).await.unwrap().unwrap();
    assert!(site.last_checked_at.is_some());
    assert_eq!(site.last_link_count, Some(2));
    assert_eq!(h.store.list_links(id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn repeated_links_report_nothing_new() {
    let h = harness();
    h.registry
        .register(Arc::new(ScriptedExtractor::new("jobs").then_links(&[("/a", "A")])));
    let id = add_site(&h, Site::new("Jobs", "https://example.com/jobs", "jobs", TrackingMode::Links)).await;

    assert_eq!(h.monitor.trigger_check(id).await, "Update detected: 1 new links found");
    assert_eq!(h.monitor.trigger_check(id).await, "No new links found");
    assert_eq!(h.notifier.count(), 1);
    assert_eq!(h.store.list_links(id).await.unwrap().len(), 1);
}

// ============================================================================
// HASH MODE
// ============================================================================

#[tokio::test]
async fn hash_first_seen_then_unchanged_then_changed() {
    let h = harness();
    h.registry.register(Arc::new(
        ScriptedExtractor::hash("page")
            .then_hash("H1")
            .then_hash("H1")
            .then_hash("H2"),
    ));
    let id = add_site(&h, Site::new("Page", "https://example.com", "page", TrackingMode::Hash)).await;

    // First hash establishes state without notifying
    assert_eq!(h.monitor.trigger_check(id).await, "New site: hash generated");
    assert_eq!(h.notifier.count(), 0);
    let first = h.store.get_hash(id).await.unwrap().unwrap();
    assert_eq!(first.hash, "H1");

    // Same hash: the record is not rewritten
    assert_eq!(
        h.monitor.trigger_check(id).await,
        "Same hash as before: no site update"
    );
    assert_eq!(h.notifier.count(), 0);
    assert_eq!(h.store.get_hash(id).await.unwrap().unwrap(), first);

    assert_eq!(
        h.monitor.trigger_check(id).await,
        "Update detected: site hash changed"
    );
    let messages = h.notifier.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].subject, "Update from site https://example.com");
    assert!(messages[0].body.contains("H2"));
    assert_eq!(h.store.get_hash(id).await.unwrap().unwrap().hash, "H2");
}

#[tokio::test]
async fn first_seen_notifies_when_configured() {
    let h = harness_with(
        MonitorConfig::default().with_notify_on_first_seen(true),
        RecordingNotifier::new(),
    );
    h.registry
        .register(Arc::new(ScriptedExtractor::hash("page").then_hash("H1")));
    let id = add_site(&h, Site::new("Page", "https://example.com", "page", TrackingMode::Hash)).await;

    assert_eq!(h.monitor.trigger_check(id).await, "New site: hash generated");
    assert_eq!(h.notifier.count(), 1);
}

// ============================================================================
// FAILURES
// ============================================================================

#[tokio::test]
async fn fetch_failure_writes_nothing() {
    let h = harness();
    h.registry
        .register(Arc::new(ScriptedExtractor::new("jobs").then_fail()));
    let id = add_site(&h, Site::new("Jobs", "https://example.com/jobs", "jobs", TrackingMode::Links)).await;

    assert_eq!(h.monitor.trigger_check(id).await, "Scraping failed");

    let site = h.store.get_site(id).await.unwrap().unwrap();
    assert!(site.last_checked_at.is_none());
    assert_eq!(h.store.link_record_count().await, 0);
    assert_eq!(h.notifier.count(), 0);
}

#[tokio::test(start_paused = true)]
async fn fetch_timeout_is_scrape_failure() {
    let h = harness_with(
        MonitorConfig::default().with_fetch_timeout(Duration::from_millis(50)),
        RecordingNotifier::new(),
    );
    h.registry
        .register(Arc::new(ScriptedExtractor::hash("slow").then(ScriptStep::Hang)));
    let id = add_site(&h, Site::new("Slow", "https://slow.example.com", "slow", TrackingMode::Hash)).await;

    let err = h.monitor.checker().check(id).await.unwrap_err();

    assert!(matches!(err, CheckError::ScrapeFailed(FetchError::Timeout { .. })));
    assert!(err.is_retryable());
    assert_eq!(err.to_string(), "Scraping failed");
    assert!(h.store.get_hash(id).await.unwrap().is_none());
    assert!(h.store.get_site(id).await.unwrap().unwrap().last_checked_at.is_none());
}

#[tokio::test]
async fn unknown_extractor_is_permanent() {
    let h = harness();
    let id = add_site(&h, Site::new("Gone", "https://example.com", "missing", TrackingMode::Links)).await;

    let err = h.monitor.checker().check(id).await.unwrap_err();
    assert!(!err.is_retryable());
    assert_eq!(err.to_string(), "Unknown extractor: missing");
}

#[tokio::test]
async fn hash_site_with_link_extractor_is_wrong_plugin_type() {
    let h = harness();
    h.registry
        .register(Arc::new(ScriptedExtractor::new("jobs").then_links(&[("/a", "A")])));
    let id = add_site(&h, Site::new("Jobs", "https://example.com", "jobs", TrackingMode::Hash)).await;

    assert_eq!(h.monitor.trigger_check(id).await, "Wrong plugin type");
    assert!(h.store.get_site(id).await.unwrap().unwrap().last_checked_at.is_none());
}

#[tokio::test]
async fn missing_site_is_reported() {
    let h = harness();
    assert_eq!(h.monitor.trigger_check(SiteId::new()).await, "Site not found");
}

#[tokio::test]
async fn notification_failure_does_not_roll_back() {
    let h = harness_with(MonitorConfig::default(), RecordingNotifier::failing());
    h.registry
        .register(Arc::new(ScriptedExtractor::new("jobs").then_links(&[("/a", "A")])));
    let id = add_site(&h, Site::new("Jobs", "https://example.com/jobs", "jobs", TrackingMode::Links)).await;

    assert_eq!(h.monitor.trigger_check(id).await, "Update detected: 1 new links found");

    assert_eq!(h.notifier.count(), 1);
    assert_eq!(h.store.list_links(id).await.unwrap().len(), 1);
    assert!(h.store.get_site(id).await.unwrap().unwrap().last_checked_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn stalled_notifier_releases_the_site() {
    let h = harness_with(
        MonitorConfig::default().with_notify_timeout(Duration::from_secs(2)),
        RecordingNotifier::stalled(),
    );
    h.registry
        .register(Arc::new(ScriptedExtractor::new("jobs").then_links(&[("/a", "A")])));
    let id = add_site(&h, Site::new("Jobs", "https://example.com/jobs", "jobs", TrackingMode::Links)).await;

    let result = tokio::time::timeout(Duration::from_secs(60), h.monitor.trigger_check(id))
        .await
        .expect("check should finish once the notification deadline passes");

    assert_eq!(result, "Update detected: 1 new links found");
    assert_eq!(h.notifier.count(), 1);
    assert!(h.monitor.checker().inflight().is_empty());
    assert_eq!(h.store.list_links(id).await.unwrap().len(), 1);
}

// ============================================================================
// SCHEDULING
// ============================================================================

#[tokio::test]
async fn tick_dispatches_only_due_sites() {
    let h = harness();
    h.registry
        .register(Arc::new(ScriptedExtractor::hash("page").then_hash("H1")));
    let now = Utc::now();

    let recent = add_site(
        &h,
        Site::new("Recent", "https://a.example.com", "page", TrackingMode::Hash)
            .with_interval(Interval::FiveMinutes)
            .with_last_checked(now - chrono::Duration::minutes(4)),
    )
    .await;
    let stale = add_site(
        &h,
        Site::new("Stale", "https://b.example.com", "page", TrackingMode::Hash)
            .with_interval(Interval::FiveMinutes)
            .with_last_checked(now - chrono::Duration::minutes(6)),
    )
    .await;
    add_site(
        &h,
        Site::new("Manual", "https://c.example.com", "page", TrackingMode::Hash),
    )
    .await;

    let report = h.monitor.scheduler().tick(now).await.unwrap();

    assert_eq!(report.dispatched, 1);
    assert_eq!(report.succeeded, 1);
    assert!(h.store.get_hash(stale).await.unwrap().is_some());
    assert!(h.store.get_hash(recent).await.unwrap().is_none());
}

#[tokio::test]
async fn storage_failure_is_isolated_to_one_site() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FlakyStore::new(MemoryStore::new()));
    let registry = Arc::new(PluginRegistry::new(dir.path()));
    registry.register(Arc::new(ScriptedExtractor::hash("page").then_hash("H1")));
    let monitor = Monitor::new(
        store.clone(),
        registry,
        Arc::new(RecordingNotifier::new()),
        MonitorConfig::default(),
    );

    let broken = store
        .create_site(
            Site::new("Broken", "https://a.example.com", "page", TrackingMode::Hash)
                .with_interval(Interval::OneHour),
        )
        .await
        .unwrap();
    let healthy = store
        .create_site(
            Site::new("Healthy", "https://b.example.com", "page", TrackingMode::Hash)
                .with_interval(Interval::OneHour),
        )
        .await
        .unwrap();
    store.fail_commits_for(broken);

    let report = monitor.scheduler().tick(Utc::now()).await.unwrap();

    assert_eq!(report.dispatched, 2);
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 1);
    assert!(store.get_site(broken).await.unwrap().unwrap().last_checked_at.is_none());
    assert!(store.get_site(healthy).await.unwrap().unwrap().last_checked_at.is_some());

    let err = monitor.checker().check(broken).await.unwrap_err();
    assert!(matches!(err, CheckError::Storage(_)));
    assert!(err.to_string().starts_with("Database error: "));
}

#[tokio::test]
async fn second_check_of_in_flight_site_is_refused() {
    let h = harness();
    let gate = Arc::new(Semaphore::new(0));
    let extractor = Arc::new(
        ScriptedExtractor::hash("page")
            .with_gate(gate.clone())
            .then_hash("H1"),
    );
    h.registry.register(extractor.clone());
    let id = add_site(
        &h,
        Site::new("Page", "https://example.com", "page", TrackingMode::Hash)
            .with_interval(Interval::FiveMinutes),
    )
    .await;

    let monitor = h.monitor.clone();
    let first = tokio::spawn(async move { monitor.trigger_check(id).await });
    while extractor.calls() == 0 {
        tokio::task::yield_now().await;
    }

    assert_eq!(h.monitor.trigger_check(id).await, "Check already in progress");
    let report = h.monitor.scheduler().tick(Utc::now()).await.unwrap();
    assert_eq!(report.dispatched, 0);
    assert_eq!(report.skipped_in_flight, 1);

    gate.add_permits(1);
    assert_eq!(first.await.unwrap(), "New site: hash generated");
    assert_eq!(extractor.calls(), 1);
    assert!(!h.monitor.checker().inflight().contains(id));
}

#[tokio::test(start_paused = true)]
async fn concurrent_checks_are_bounded() {
    let h = harness_with(
        MonitorConfig::default().with_max_concurrent_checks(2),
        RecordingNotifier::new(),
    );
    let extractor = Arc::new(
        ScriptedExtractor::hash("page")
            .with_delay(Duration::from_millis(100))
            .then_hash("H1"),
    );
    h.registry.register(extractor.clone());
    for i in 0..6 {
        add_site(
            &h,
            Site::new(format!("Site {}", i), format!("https://{}.example.com", i), "page", TrackingMode::Hash)
                .with_interval(Interval::OneDay),
        )
        .await;
    }

    let report = h.monitor.scheduler().tick(Utc::now()).await.unwrap();

    assert_eq!(report.succeeded, 6);
    assert_eq!(extractor.calls(), 6);
    assert!(extractor.max_concurrent() <= 2);
}

#[tokio::test(start_paused = true)]
async fn run_stops_on_cancel() {
    let h = harness();
    let extractor = Arc::new(ScriptedExtractor::hash("page").then_hash("H1"));
    h.registry.register(extractor.clone());
    let id = add_site(
        &h,
        Site::new("Page", "https://example.com", "page", TrackingMode::Hash)
            .with_interval(Interval::FiveMinutes),
    )
    .await;

    let shutdown = CancellationToken::new();
    let scheduler = h.monitor.scheduler();
    let token = shutdown.clone();
    let handle = tokio::spawn(async move { scheduler.run(token).await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    shutdown.cancel();
    handle.await.unwrap();

    assert_eq!(extractor.calls(), 1);
    assert!(h.store.get_site(id).await.unwrap().unwrap().last_checked_at.is_some());
}

// ============================================================================
// OPERATOR API
// ============================================================================

#[tokio::test]
async fn add_and_delete_hash_site() {
    let h = harness();

    assert_eq!(
        h.monitor.add_site("My Site", "https://example.com", TrackingMode::Hash).await,
        "Site My Site added successfully"
    );
    let unit_file = h.dir.path().join("hash_my_site.toml");
    assert!(unit_file.exists());

    let sites = h.monitor.list_sites().await.unwrap();
    assert_eq!(sites.len(), 1);
    assert_eq!(sites[0].extractor_id, "hash_my_site");
    assert_eq!(sites[0].interval, Interval::Never);

    assert_eq!(
        h.monitor.delete_site(sites[0].id).await,
        "Site My Site deleted successfully"
    );
    assert!(!unit_file.exists());
    assert!(!h.registry.contains("hash_my_site"));
    assert_eq!(h.monitor.delete_site(sites[0].id).await, "Site not found");
}

#[tokio::test]
async fn add_links_site_needs_existing_unit() {
    let h = harness();

    assert_eq!(
        h.monitor.add_site("Jobs", "https://example.com/jobs", TrackingMode::Links).await,
        "No extractor found for Jobs"
    );

    h.registry.register(Arc::new(ScriptedExtractor::new("jobs")));
    assert_eq!(
        h.monitor.add_site("Jobs", "https://example.com/jobs", TrackingMode::Links).await,
        "Site Jobs added successfully"
    );

    let sites = h.monitor.list_sites().await.unwrap();
    assert_eq!(sites[0].tracking_mode, TrackingMode::Links);
    assert_eq!(sites[0].extractor_id, "jobs");
}

#[tokio::test]
async fn add_site_validates_input() {
    let h = harness();
    assert_eq!(
        h.monitor.add_site("  ", "https://example.com", TrackingMode::Hash).await,
        "Invalid name or URL"
    );
    assert_eq!(
        h.monitor.add_site("Name", "not a url", TrackingMode::Hash).await,
        "Invalid name or URL"
    );
    assert_eq!(h.store.count_sites().await.unwrap(), 0);
}

#[tokio::test]
async fn set_interval_texts() {
    let h = harness();
    let id = add_site(&h, Site::new("Page", "https://example.com", "page", TrackingMode::Hash)).await;

    assert_eq!(
        h.monitor.set_interval(id, "5min").await,
        "Scrape interval updated to 5min"
    );
    assert_eq!(
        h.store.get_site(id).await.unwrap().unwrap().interval,
        Interval::FiveMinutes
    );

    assert_eq!(
        h.monitor.set_interval(id, "fortnightly").await,
        "Scrape interval updated to never"
    );
    assert_eq!(
        h.monitor.set_interval(SiteId::new(), Interval::OneDay).await,
        "Site not found"
    );
}

#[tokio::test]
async fn import_plugin_creates_manual_site() {
    let h = harness();
    std::fs::write(
        h.dir.path().join("oecd.toml"),
        "name = \"OECD\"\nurl = \"https://careers.example.org\"\n\n[extract]\nkind = \"links\"\nitem = \"li\"\nlink = \"a\"\n",
    )
    .unwrap();

    assert_eq!(h.monitor.import_plugin("oecd").await, "Scraper uploaded successfully");
    let sites = h.monitor.list_sites().await.unwrap();
    assert_eq!(sites.len(), 1);
    assert_eq!(sites[0].name, "OECD");
    assert_eq!(sites[0].tracking_mode, TrackingMode::Links);
    assert_eq!(sites[0].interval, Interval::Never);

    assert!(h.monitor.import_plugin("nope").await.starts_with("Invalid plugin: "));
}

#[tokio::test]
async fn import_plugin_rejects_paths_outside_the_plugin_dir() {
    let h = harness();
    let outside = tempfile::tempdir().unwrap();
    std::fs::write(
        outside.path().join("stray.toml"),
        "name = \"Stray\"\nurl = \"https://stray.example.org\"\n\n[extract]\nkind = \"hash\"\n",
    )
    .unwrap();
    let escaping = format!("../{}/stray", outside.path().file_name().unwrap().to_string_lossy());

    let result = h.monitor.import_plugin(&escaping).await;

    assert!(result.starts_with("Invalid plugin: invalid plugin unit id"), "{result}");
    assert!(h.monitor.list_sites().await.unwrap().is_empty());
}

#[tokio::test]
async fn seed_sites_only_on_empty_store() {
    let h = harness();
    std::fs::write(
        h.dir.path().join("wiki.toml"),
        "name = \"Wiki\"\nurl = \"https://en.example.org/wiki\"\n\n[extract]\nkind = \"links\"\n",
    )
    .unwrap();
    std::fs::write(
        h.dir.path().join("page.toml"),
        "name = \"Page\"\nurl = \"https://example.com\"\n\n[extract]\nkind = \"hash\"\n",
    )
    .unwrap();

    let report = h.monitor.reload_plugins().unwrap();
    assert_eq!(report.loaded, vec!["page", "wiki"]);

    assert_eq!(h.monitor.seed_sites_from_plugins().await.unwrap(), 2);
    assert_eq!(h.monitor.seed_sites_from_plugins().await.unwrap(), 0);

    let sites = h.monitor.list_sites().await.unwrap();
    let page = sites.iter().find(|s| s.name == "Page").unwrap();
    assert_eq!(page.tracking_mode, TrackingMode::Hash);
    assert_eq!(page.interval, Interval::Never);
}
