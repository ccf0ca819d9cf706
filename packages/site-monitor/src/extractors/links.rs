use std::collections::HashSet;

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use url::Url;

use super::{collapse_text, fetch_body, parse_selector};
use crate::error::FetchResult;
use crate::traits::Extractor;
use crate::types::{ScrapeResult, ScrapedLink, TrackingMode};

/// `[extract] kind = "links"` section of a plugin manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinksSpec {
    /// Elements that each yield one link (default `a[href]`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item: Option<String>,
    /// Element inside an item that carries the link (default: the item)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    /// Elements inside an item whose text forms the description, one line each
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub description: Vec<String>,
    /// Attribute holding the url (default `href`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
    /// Resolve relative urls against the page url
    pub absolute: bool,
    /// Keep fragment-only links such as `#top`
    pub keep_fragments: bool,
}

/// Lists links on a page using CSS selectors.
pub struct LinkListExtractor {
    id: String,
    name: String,
    source_url: String,
    client: reqwest::Client,
    item: Selector,
    link: Option<Selector>,
    description: Vec<Selector>,
    attribute: String,
    absolute: bool,
    keep_fragments: bool,
}

impl LinkListExtractor {
    /// Compile a spec. On failure returns the selector text that did not parse.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        source_url: impl Into<String>,
        spec: &LinksSpec,
        client: reqwest::Client,
    ) -> Result<Self, String> {
        let item = parse_selector(spec.item.as_deref().unwrap_or("a[href]"))?;
        let link = spec.link.as_deref().map(parse_selector).transpose()?;
        let description = spec
            .description
            .iter()
            .map(|s| parse_selector(s))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            id: id.into(),
            name: name.into(),
            source_url: source_url.into(),
            client,
            item,
            link,
            description,
            attribute: spec.attribute.clone().unwrap_or_else(|| "href".to_string()),
            absolute: spec.absolute,
            keep_fragments: spec.keep_fragments,
        })
    }

    /// Extract unique (url, description) pairs from a document, in page order.
    pub fn extract_links(&self, html: &str, page_url: &str) -> Vec<ScrapedLink> {
        let document = Html::parse_document(html);
        let base = if self.absolute {
            Url::parse(page_url).ok()
        } else {
            None
        };

        let mut seen = HashSet::new();
        let mut links = Vec::new();

        for item in document.select(&self.item) {
            let anchor = match &self.link {
                Some(selector) => match item.select(selector).next() {
                    Some(el) => el,
                    None => continue,
                },
                None => item,
            };

            let Some(href) = anchor.value().attr(&self.attribute) else {
                continue;
            };
            let href = href.trim();
            if href.is_empty() || (!self.keep_fragments && href.starts_with('#')) {
                continue;
            }

            let url = match &base {
                Some(base) => match base.join(href) {
                    Ok(resolved) => resolved.to_string(),
                    Err(_) => continue,
                },
                None => href.to_string(),
            };

            let link = ScrapedLink::new(url, self.describe(item));
            if seen.insert(link.clone()) {
                links.push(link);
            }
        }

        links
    }

    fn describe(&self, item: ElementRef<'_>) -> String {
        if self.description.is_empty() {
            return collapse_text(item.text());
        }

        self.description
            .iter()
            .filter_map(|selector| item.select(selector).next())
            .map(|el| collapse_text(el.text()))
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[async_trait]
impl Extractor for LinkListExtractor {
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
        TrackingMode::Links
    }

    async fn fetch(&self, url: &str) -> FetchResult<ScrapeResult> {
        let body = fetch_body(&self.client, url).await?;
        let html = String::from_utf8_lossy(&body);
        let links = self.extract_links(&html, url);

        tracing::debug!(extractor = %self.id, url = %url, links = links.len(), "Links extracted");
        Ok(ScrapeResult::from_links(links))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const JOBS_PAGE: &str = r#"
        <html><body>
          <ul class="jobs">
            <li class="job">
              <h4 class="title"> Data Analyst </h4>
              <p class="place">Paris</p>
              <a class="details" href="/OECD/123-data-analyst">Details</a>
            </li>
            <li class="job">
              <h4 class="title">Statistician</h4>
              <a class="details" href="/OECD/456-statistician">Details</a>
            </li>
            <li class="job"><h4 class="title">No link here</h4></li>
          </ul>
        </body></html>
    "#;

    fn extractor(spec: LinksSpec) -> LinkListExtractor {
        LinkListExtractor::new(
            "test",
            "Test",
            "https://example.com/jobs",
            &spec,
            reqwest::Client::new(),
        )
        .unwrap()
    }

    #[test]
    fn test_default_spec_lists_anchors_and_skips_fragments() {
        let html = r##"
            <a href="/a">First   link</a>
            <a href="#top">Top</a>
            <a>no href</a>
            <a href="/b">B</a>
            <a href="/a">First link</a>
        "##;
        let links = extractor(LinksSpec::default()).extract_links(html, "https://example.com");
        assert_eq!(
            links,
            vec![ScrapedLink::new("/a", "First link"), ScrapedLink::new("/b", "B")]
        );
    }

    #[test]
    fn test_same_url_with_different_text_is_kept_for_the_detector() {
        let html = r#"<a href="/a">one</a><a href="/a">two</a>"#;
        let links = extractor(LinksSpec::default()).extract_links(html, "https://example.com");
        assert_eq!(links.len(), 2);
    }

    #[test]
    fn test_item_link_and_description_selectors() {
        let spec = LinksSpec {
            item: Some("li.job".to_string()),
            link: Some("a.details".to_string()),
            description: vec!["h4.title".to_string(), "p.place".to_string()],
            absolute: true,
            ..Default::default()
        };
        let links = extractor(spec).extract_links(JOBS_PAGE, "https://careers.example.com/OECD/list");
        assert_eq!(
            links,
            vec![
                ScrapedLink::new(
                    "https://careers.example.com/OECD/123-data-analyst",
                    "Data Analyst\nParis"
                ),
                ScrapedLink::new(
                    "https://careers.example.com/OECD/456-statistician",
                    "Statistician"
                ),
            ]
        );
    }

    #[test]
    fn test_invalid_selector_is_reported() {
        let spec = LinksSpec {
            item: Some("li[[".to_string()),
            ..Default::default()
        };
        let err = LinkListExtractor::new("x", "X", "https://x", &spec, reqwest::Client::new())
            .err()
            .unwrap();
        assert_eq!(err, "li[[");
    }
}
