use async_trait::async_trait;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};

use super::{fetch_body, parse_selector};
use crate::error::{FetchError, FetchResult};
use crate::traits::Extractor;
use crate::types::{content_hash, ScrapeResult, TrackingMode};

/// `[extract] kind = "hash"` section of a plugin manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HashSpec {
    /// Only hash the HTML of matching elements; whole body when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
}

/// Summarizes a page as a single content hash.
pub struct PageHashExtractor {
    id: String,
    name: String,
    source_url: String,
    client: reqwest::Client,
    selector: Option<Selector>,
}

impl PageHashExtractor {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        source_url: impl Into<String>,
        spec: &HashSpec,
        client: reqwest::Client,
    ) -> Result<Self, String> {
        Ok(Self {
            id: id.into(),
            name: name.into(),
            source_url: source_url.into(),
            client,
            selector: spec.selector.as_deref().map(parse_selector).transpose()?,
        })
    }

    /// Hash a response body according to the configured region.
    pub fn hash_body(&self, body: &[u8]) -> FetchResult<String> {
        let Some(selector) = &self.selector else {
            return Ok(content_hash(body));
        };

        let document = Html::parse_document(&String::from_utf8_lossy(body));
        let region: String = document.select(selector).map(|el| el.html()).collect();
        if region.is_empty() {
            return Err(FetchError::Content(format!(
                "selector matched nothing on {}",
                self.source_url
            )));
        }

        Ok(content_hash(region.as_bytes()))
    }
}

#[async_trait]
impl Extractor for PageHashExtractor {
    fn id(&self) -> &str {
        &self.id
    }

    fn display_name(&self) -> &str {
        &self.name
    }

    fn source_url(&self) -> &str {
        &self.source_url
    }

    fn tracking_mode(&self) -> TrackingMode {
        TrackingMode::Hash
    }

    async fn fetch(&self, url: &str) -> FetchResult<ScrapeResult> {
        let body = fetch_body(&self.client, url).await?;
        let hash = self.hash_body(&body)?;

        tracing::debug!(extractor = %self.id, url = %url, hash = %hash, "Page hashed");
        Ok(ScrapeResult::from_hash(hash))
    }
}
