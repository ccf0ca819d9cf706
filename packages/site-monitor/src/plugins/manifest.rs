use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::LoadError;
use crate::extractors::{HashSpec, LinkListExtractor, LinksSpec, PageHashExtractor};
use crate::traits::Extractor;
use crate::types::TrackingMode;

const KINDS: [&str; 2] = ["links", "hash"];

/// A plugin unit as written on disk.
///
/// ```toml
/// name = "OECD careers"
/// url = "https://careers.example.org/jobs"
///
/// [extract]
/// kind = "links"
/// item = "li.job"
/// link = "a.details"
/// description = ["h4.job-title", "p.job-desc"]
/// absolute = true
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginManifest {
    pub name: String,
    pub url: String,
    /// Written by the registry for an operator-added site
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub generated: bool,
    pub extract: ExtractSpec,
}

/// The unit's fetch capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExtractSpec {
    Links(LinksSpec),
    Hash(HashSpec),
}

impl ExtractSpec {
    pub fn tracking_mode(&self) -> TrackingMode {
        match self {
            ExtractSpec::Links(_) => TrackingMode::Links,
            ExtractSpec::Hash(_) => TrackingMode::Hash,
        }
    }
}

impl PluginManifest {
    /// Manifest for a whole-page hash unit.
    pub fn hash_page(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            generated: true,
            extract: ExtractSpec::Hash(HashSpec::default()),
        }
    }

    /// Parse and validate a unit's text.
    ///
    /// Capabilities are checked before the typed decode so a unit that lacks
    /// one is reported as such rather than as a generic TOML error.
    pub fn parse(unit: &str, path: &Path, text: &str) -> Result<Self, LoadError> {
        let manifest_err = |source| LoadError::Manifest {
            path: path.to_path_buf(),
            source,
        };
        let missing = |capability| LoadError::MissingCapability {
            unit: unit.to_string(),
            capability,
        };

        let raw: toml::Table = text.parse().map_err(manifest_err)?;

        if !raw.get("name").is_some_and(toml::Value::is_str) {
            return Err(missing("name"));
        }
        if !raw.get("url").is_some_and(toml::Value::is_str) {
            return Err(missing("url"));
        }
        let extract = raw
            .get("extract")
            .and_then(toml::Value::as_table)
            .ok_or_else(|| missing("extract"))?;
        let kind = extract
            .get("kind")
            .and_then(toml::Value::as_str)
            .ok_or_else(|| missing("extract.kind"))?;
        if !KINDS.contains(&kind) {
            return Err(LoadError::UnknownKind {
                unit: unit.to_string(),
                kind: kind.to_string(),
            });
        }

        toml::Value::Table(raw).try_into().map_err(manifest_err)
    }

    /// Compile the manifest into an extractor.
    pub fn build(&self, unit: &str, client: reqwest::Client) -> Result<Arc<dyn Extractor>, LoadError> {
        let invalid = |selector: String| LoadError::InvalidSelector {
            unit: unit.to_string(),
            selector,
        };

        let extractor: Arc<dyn Extractor> = match &self.extract {
            ExtractSpec::Links(spec) => Arc::new(
                LinkListExtractor::new(unit, &self.name, &self.url, spec, client).map_err(invalid)?,
            ),
            ExtractSpec::Hash(spec) => Arc::new(
                PageHashExtractor::new(unit, &self.name, &self.url, spec, client).map_err(invalid)?,
            ),
        };
        Ok(extractor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<PluginManifest, LoadError> {
        PluginManifest::parse("unit", Path::new("unit.toml"), text)
    }

    #[test]
    fn test_parse_links_manifest() {
        let manifest = parse(
            r#"
            name = "Jobs"
            url = "https://example.com/jobs"

            [extract]
            kind = "links"
            item = "li.job"
            description = ["h4", "p"]
            absolute = true
            "#,
        )
        .unwrap();

        assert_eq!(manifest.name, "Jobs");
        assert!(!manifest.generated);
        match manifest.extract {
            ExtractSpec::Links(spec) => {
                assert_eq!(spec.item.as_deref(), Some("li.job"));
                assert_eq!(spec.description, vec!["h4", "p"]);
                assert!(spec.absolute);
                assert!(!spec.keep_fragments);
            }
            other => panic!("expected links spec, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_capabilities() {
        let err = parse("url = \"https://x\"\n[extract]\nkind = \"hash\"").unwrap_err();
        assert!(matches!(err, LoadError::MissingCapability { capability: "name", .. }));

        let err = parse("name = \"X\"\nurl = \"https://x\"").unwrap_err();
        assert!(matches!(err, LoadError::MissingCapability { capability: "extract", .. }));

        let err = parse("name = \"X\"\nurl = \"https://x\"\n[extract]\nselector = \"p\"").unwrap_err();
        assert!(matches!(
            err,
            LoadError::MissingCapability { capability: "extract.kind", .. }
        ));
    }

    #[test]
    fn test_unknown_kind_and_bad_toml() {
        let err = parse("name = \"X\"\nurl = \"https://x\"\n[extract]\nkind = \"rss\"").unwrap_err();
        assert!(matches!(err, LoadError::UnknownKind { ref kind, .. } if kind == "rss"));

        let err = parse("name = ").unwrap_err();
        assert!(matches!(err, LoadError::Manifest { .. }));

        // Wrong field type surfaces from the typed decode
        let err = parse("name = \"X\"\nurl = \"https://x\"\n[extract]\nkind = \"links\"\nabsolute = \"yes\"")
            .unwrap_err();
        assert!(matches!(err, LoadError::Manifest { .. }));
    }

    #[test]
    fn test_build_rejects_invalid_selector() {
        let manifest = parse("name = \"X\"\nurl = \"https://x\"\n[extract]\nkind = \"hash\"\nselector = \"div[[\"")
            .unwrap();
        let err = manifest.build("unit", reqwest::Client::new()).err().unwrap();
        assert!(matches!(err, LoadError::InvalidSelector { ref selector, .. } if selector == "div[["));
    }

    #[test]
    fn test_generated_hash_manifest_serializes_back() {
        let manifest = PluginManifest::hash_page("My Site", "https://example.com");
        let text = toml::to_string(&manifest).unwrap();
        assert!(text.contains("generated = true"));
        assert!(text.contains("kind = \"hash\""));

        let parsed = parse(&text).unwrap();
        assert_eq!(parsed, manifest);
        assert_eq!(parsed.extract.tracking_mode(), TrackingMode::Hash);
    }
}
