//! Change detection.
//!
//! Pure comparisons between a fresh [`ScrapeResult`] and the state recorded
//! for a site. Nothing here touches storage or the network.

use std::collections::HashSet;

use crate::error::DetectError;
use crate::types::*;

/// Transition of a hash-mode site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashTransition {
    /// No hash was stored yet
    FirstSeen,
    Changed { previous: String },
    Unchanged,
}

/// Recorded state the detector compares against.
#[derive(Debug, Clone, Copy)]
pub enum RecordedState<'a> {
    Links(&'a HashSet<String>),
    Hash(Option<&'a str>),
}

/// Delta produced by one comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diff {
    /// Links to append, in page order. Empty means nothing new.
    NewLinks(Vec<ScrapedLink>),
    Hash {
        current: String,
        transition: HashTransition,
    },
}

impl Diff {
    /// Whether this diff represents a change operators care about.
    pub fn is_change(&self) -> bool {
        match self {
            Diff::NewLinks(links) => !links.is_empty(),
            Diff::Hash { transition, .. } => matches!(transition, HashTransition::Changed { .. }),
        }
    }
}

/// Links whose url is not already recorded, in input order.
///
/// Duplicate urls within `links` collapse to their first occurrence, so the
/// first description seen for a url wins.
pub fn link_diff(links: &[ScrapedLink], existing: &HashSet<String>) -> Vec<ScrapedLink> {
    let mut seen: HashSet<&str> = HashSet::with_capacity(links.len());
    links
        .iter()
        .filter(|link| !existing.contains(&link.url))
        .filter(|link| seen.insert(link.url.as_str()))
        .cloned()
        .collect()
}

/// Classify a freshly fetched hash against the stored one.
pub fn classify_hash(previous: Option<&str>, current: &str) -> HashTransition {
    match previous {
        None => HashTransition::FirstSeen,
        Some(prev) if prev == current => HashTransition::Unchanged,
        Some(prev) => HashTransition::Changed {
            previous: prev.to_string(),
        },
    }
}

/// Compare a scrape result against recorded state in the site's mode.
pub fn detect(
    mode: TrackingMode,
    result: &ScrapeResult,
    state: RecordedState<'_>,
) -> Result<Diff, DetectError> {
    match (mode, state) {
        (TrackingMode::Links, RecordedState::Links(existing)) => {
            let new_links = link_diff(&result.links, existing);
            tracing::debug!(
                fetched = result.links.len(),
                known = existing.len(),
                new = new_links.len(),
                "Link diff computed"
            );
            Ok(Diff::NewLinks(new_links))
        }
        (TrackingMode::Hash, RecordedState::Hash(previous)) => {
            let current = result
                .content_hash
                .as_deref()
                .ok_or(DetectError::WrongResultShape)?;
            Ok(Diff::Hash {
                current: current.to_string(),
                transition: classify_hash(previous, current),
            })
        }
        // State loaded for the other mode; the result cannot be interpreted.
        _ => Err(DetectError::WrongResultShape),
    }
}
