//! Manifest-driven extractor implementations.
//!
//! HTML parsing lives here and only here; the rest of the crate sees
//! [`ScrapeResult`](crate::types::ScrapeResult) values.
//!
//! - [`LinkListExtractor`] - lists (url, description) pairs selected by CSS
//! - [`PageHashExtractor`] - SHA-256 of the page, or of a selected region

mod links;
mod page_hash;

pub use links::{LinkListExtractor, LinksSpec};
pub use page_hash::{HashSpec, PageHashExtractor};

use std::time::Duration;

use scraper::Selector;
use tracing::{debug, warn};
use url::Url;

use crate::error::{FetchError, FetchResult};

const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Shared HTTP client for every manifest extractor.
///
/// Deadlines are enforced by the check procedure; the client only bounds
/// connection setup.
pub fn http_client() -> reqwest::Client {
    let mut headers = reqwest::header::HeaderMap::new();
    headers.insert(
        reqwest::header::ACCEPT,
        reqwest::header::HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
        ),
    );

    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .default_headers(headers)
        .connect_timeout(Duration::from_secs(10))
        .redirect(reqwest::redirect::Policy::limited(5))
        .build()
        .unwrap_or_else(|e| {
            warn!(error = %e, "Failed to build configured HTTP client, using defaults");
            reqwest::Client::new()
        })
}

/// GET a page and return its body; non-success statuses are errors.
pub(crate) async fn fetch_body(client: &reqwest::Client, url: &str) -> FetchResult<Vec<u8>> {
    Url::parse(url).map_err(|_| FetchError::InvalidUrl {
        url: url.to_string(),
    })?;

    debug!(url = %url, "HTTP fetch starting");
    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
            }
        } else {
            FetchError::Http(Box::new(e))
        }
    })?;

    let status = response.status();
    if !status.is_success() {
        warn!(url = %url, status = %status, "HTTP error");
        return Err(FetchError::Status {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }

    let body = response
        .bytes()
        .await
        .map_err(|e| FetchError::Http(Box::new(e)))?;

    Ok(body.to_vec())
}

/// Parse a CSS selector from a manifest, reporting the offending text.
pub(crate) fn parse_selector(selector: &str) -> Result<Selector, String> {
    Selector::parse(selector).map_err(|_| selector.to_string())
}

/// Collapse runs of whitespace in element text into single spaces.
pub(crate) fn collapse_text<'a>(parts: impl Iterator<Item = &'a str>) -> String {
    parts
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collapse_text() {
        let parts = ["  Data\n", "Analyst ", "", "  Paris  "];
        assert_eq!(collapse_text(parts.into_iter()), "Data Analyst Paris");
    }

    #[test]
    fn test_parse_selector_reports_input() {
        assert!(parse_selector("li.job > a").is_ok());
        assert_eq!(parse_selector("li[[").unwrap_err(), "li[[");
    }

    #[tokio::test]
    async fn test_fetch_body_rejects_invalid_url() {
        let err = fetch_body(&http_client(), "not a url").await.unwrap_err();
        assert!(matches!(err, FetchError::InvalidUrl { .. }));
    }
}
