use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Unique identifier for a monitored site
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SiteId(pub Uuid);

impl SiteId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for SiteId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SiteId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ============================================================================
// ENUMS
// ============================================================================

/// Change-detection strategy for a site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingMode {
    /// Track the set of links a page lists; new urls are changes
    Links,
    /// Track a single content hash; any difference is a change
    Hash,
}

impl TrackingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackingMode::Links => "links",
            TrackingMode::Hash => "hash",
        }
    }
}

impl fmt::Display for TrackingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for TrackingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "links" => Ok(TrackingMode::Links),
            "hash" => Ok(TrackingMode::Hash),
            other => Err(format!("unknown tracking mode `{}`", other)),
        }
    }
}

/// How often a site should be re-checked.
///
/// Closed set. Labels that are not recognised parse to [`Interval::Never`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Interval {
    #[default]
    Never,
    FiveMinutes,
    ThirtyMinutes,
    OneHour,
    TwoHours,
    TwelveHours,
    OneDay,
    OneWeek,
}

impl Interval {
    pub const ALL: [Interval; 8] = [
        Interval::Never,
        Interval::FiveMinutes,
        Interval::ThirtyMinutes,
        Interval::OneHour,
        Interval::TwoHours,
        Interval::TwelveHours,
        Interval::OneDay,
        Interval::OneWeek,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Interval::Never => "never",
            Interval::FiveMinutes => "5min",
            Interval::ThirtyMinutes => "30min",
            Interval::OneHour => "1hour",
            Interval::TwoHours => "2hours",
            Interval::TwelveHours => "12hours",
            Interval::OneDay => "1day",
            Interval::OneWeek => "1week",
        }
    }

    /// Parse a label, mapping anything unrecognised to `Never`.
    pub fn from_label(label: &str) -> Self {
        let label = label.trim();
        Self::ALL
            .into_iter()
            .find(|interval| interval.label().eq_ignore_ascii_case(label))
            .unwrap_or(Interval::Never)
    }

    /// Fixed re-check period; `None` means the site is never due.
    pub fn duration(&self) -> Option<Duration> {
        const MINUTE: u64 = 60;
        const HOUR: u64 = 60 * MINUTE;
        const DAY: u64 = 24 * HOUR;

        let secs = match self {
            Interval::Never => return None,
            Interval::FiveMinutes => 5 * MINUTE,
            Interval::ThirtyMinutes => 30 * MINUTE,
            Interval::OneHour => HOUR,
            Interval::TwoHours => 2 * HOUR,
            Interval::TwelveHours => 12 * HOUR,
            Interval::OneDay => DAY,
            Interval::OneWeek => 7 * DAY,
        };
        Some(Duration::from_secs(secs))
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.label())
    }
}

impl From<String> for Interval {
    fn from(label: String) -> Self {
        Interval::from_label(&label)
    }
}

impl From<&str> for Interval {
    fn from(label: &str) -> Self {
        Interval::from_label(label)
    }
}

impl From<Interval> for String {
    fn from(interval: Interval) -> Self {
        interval.label().to_string()
    }
}

// ============================================================================
// PERSISTED STATE
// ============================================================================

/// A monitored target plus its tracking configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    pub id: SiteId,
    pub name: String,
    pub url: String,
    pub extractor_id: String,
    pub tracking_mode: TrackingMode,
    pub interval: Interval,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub enabled: bool,
    /// Link count reported by the most recent successful links-mode check
    pub last_link_count: Option<i64>,
}

impl Site {
    /// Build a new enabled site that has never been checked.
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        extractor_id: impl Into<String>,
        tracking_mode: TrackingMode,
    ) -> Self {
        Self {
            id: SiteId::new(),
            name: name.into(),
            url: url.into(),
            extractor_id: extractor_id.into(),
            tracking_mode,
            interval: Interval::Never,
            last_checked_at: None,
            enabled: true,
            last_link_count: None,
        }
    }

    pub fn with_interval(mut self, interval: Interval) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_last_checked(mut self, at: DateTime<Utc>) -> Self {
        self.last_checked_at = Some(at);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// A link recorded for a links-mode site. Never removed once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRecord {
    pub site_id: SiteId,
    pub url: String,
    pub description: String,
    pub first_seen_at: DateTime<Utc>,
}

/// The latest content hash for a hash-mode site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashRecord {
    pub site_id: SiteId,
    pub hash: String,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// EXTRACTOR OUTPUT
// ============================================================================

/// One (url, description) pair produced by an extractor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScrapedLink {
    pub url: String,
    pub description: String,
}

impl ScrapedLink {
    pub fn new(url: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            description: description.into(),
        }
    }
}

/// Output of a single extractor fetch. Consumed by the change detector, never
/// persisted as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeResult {
    pub fetched_at: DateTime<Utc>,
    pub link_count: usize,
    pub links: Vec<ScrapedLink>,
    pub content_hash: Option<String>,
}

impl ScrapeResult {
    /// Result for a link-listing extractor.
    pub fn from_links(links: Vec<ScrapedLink>) -> Self {
        Self {
            fetched_at: Utc::now(),
            link_count: links.len(),
            links,
            content_hash: None,
        }
    }

    /// Result for a content-hash extractor.
    pub fn from_hash(hash: impl Into<String>) -> Self {
        Self {
            fetched_at: Utc::now(),
            link_count: 0,
            links: Vec::new(),
            content_hash: Some(hash.into()),
        }
    }
}

/// SHA-256 of raw bytes as lowercase hex.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

// ============================================================================
// WRITES
// ============================================================================

/// Everything a successful check writes, applied by the store in one
/// transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckCommit {
    pub site_id: SiteId,
    pub checked_at: DateTime<Utc>,
    pub new_links: Vec<ScrapedLink>,
    pub new_hash: Option<String>,
    pub link_count: Option<i64>,
}

impl CheckCommit {
    /// Commit that only advances `last_checked_at`.
    pub fn touch(site_id: SiteId, checked_at: DateTime<Utc>) -> Self {
        Self {
            site_id,
            checked_at,
            new_links: Vec::new(),
            new_hash: None,
            link_count: None,
        }
    }
}
