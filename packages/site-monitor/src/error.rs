//! Typed errors for the monitoring core.
//!
//! Every failure is attributed to a single plugin unit or a single site check,
//! so callers can tell retry-worthy failures (fetch, timeout, storage) apart
//! from permanent ones (unknown extractor, wrong result shape).

use std::path::PathBuf;

use thiserror::Error;

use crate::types::SiteId;

/// Errors returned by an extractor's `fetch`.
#[derive(Debug, Error)]
pub enum FetchError {
    /// HTTP request failed before a response arrived
    #[error("HTTP error: {0}")]
    Http(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Remote host answered with a non-success status
    #[error("HTTP {status} for {url}")]
    Status { status: u16, url: String },

    /// Fetch exceeded the configured deadline
    #[error("timeout fetching: {url}")]
    Timeout { url: String },

    /// URL could not be parsed
    #[error("invalid URL: {url}")]
    InvalidUrl { url: String },

    /// Response body could not be interpreted by the extractor
    #[error("unexpected page content: {0}")]
    Content(String),
}

/// Reasons a plugin unit is rejected at load time.
#[derive(Debug, Error)]
pub enum LoadError {
    /// Unit file could not be read
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Unit is not valid TOML or has mistyped fields
    #[error("invalid manifest {path}: {source}")]
    Manifest {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// Unit does not expose one of `name`, `url`, `extract`
    #[error("plugin {unit} is missing required capability `{capability}`")]
    MissingCapability { unit: String, capability: &'static str },

    /// `[extract] kind` is not one the registry knows how to build
    #[error("plugin {unit} declares unknown extract kind `{kind}`")]
    UnknownKind { unit: String, kind: String },

    /// A CSS selector in the unit does not parse
    #[error("plugin {unit} has invalid selector `{selector}`")]
    InvalidSelector { unit: String, selector: String },

    /// Unit id is already taken by a compiled-in extractor
    #[error("plugin {unit} collides with a registered extractor")]
    DuplicateId { unit: String },
}

/// Errors from the plugin registry outside of loading.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown extractor: {0}")]
    UnknownExtractor(String),

    #[error("plugin unit {0} already exists")]
    AlreadyExists(String),

    #[error("invalid plugin unit id: {0:?}")]
    InvalidId(String),

    #[error("plugin directory error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to write manifest: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error(transparent)]
    Load(#[from] LoadError),
}

/// Errors from the change detector.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DetectError {
    /// Hash-mode site received a result without a content hash
    #[error("scrape result has no content hash")]
    WrongResultShape,
}

/// Errors from a site store implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("site not found: {0}")]
    SiteNotFound(SiteId),

    /// Write of the record kind that does not match the site's tracking mode
    #[error("site {site_id} does not track {expected}")]
    ModeMismatch { site_id: SiteId, expected: &'static str },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Errors from a notification sink.
#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("notification transport failed: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("notification rejected with HTTP {0}")]
    Rejected(u16),

    #[error("notification timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Terminal failure of a single site check.
///
/// `Display` renders the result text shown to operators.
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("Site not found")]
    SiteNotFound(SiteId),

    #[error("Unknown extractor: {0}")]
    UnknownExtractor(String),

    #[error("Scraping failed")]
    ScrapeFailed(#[source] FetchError),

    #[error("Wrong plugin type")]
    WrongResultShape,

    #[error("Database error: {0}")]
    Storage(#[source] StoreError),

    #[error("Check already in progress")]
    AlreadyRunning(SiteId),

    #[error("Plugin registry error: {0}")]
    Registry(#[source] RegistryError),
}

impl CheckError {
    /// Whether the next tick should expect a different result.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CheckError::ScrapeFailed(_) | CheckError::Storage(_) | CheckError::AlreadyRunning(_)
        )
    }
}

impl From<StoreError> for CheckError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::SiteNotFound(id) => CheckError::SiteNotFound(id),
            other => CheckError::Storage(other),
        }
    }
}

impl From<DetectError> for CheckError {
    fn from(err: DetectError) -> Self {
        match err {
            DetectError::WrongResultShape => CheckError::WrongResultShape,
        }
    }
}

impl From<RegistryError> for CheckError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::UnknownExtractor(id) => CheckError::UnknownExtractor(id),
            other => CheckError::Registry(other),
        }
    }
}

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result type alias for extractor fetches.
pub type FetchResult<T> = std::result::Result<T, FetchError>;
