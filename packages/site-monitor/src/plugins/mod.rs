//! Plugin registry.
//!
//! A plugin unit is a TOML manifest `<id>.toml` in the registry directory.
//! Units are validated when loaded; a broken unit is skipped and reported,
//! never fatal to the rest. Compiled-in extractors can be registered
//! alongside and survive reloads.

mod manifest;

pub use manifest::{ExtractSpec, PluginManifest};

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::error::{LoadError, RegistryError};
use crate::extractors::http_client;
use crate::traits::Extractor;
use crate::types::TrackingMode;

const UNIT_EXTENSION: &str = "toml";

/// Outcome of a directory scan.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: Vec<String>,
    pub rejected: Vec<(PathBuf, LoadError)>,
}

/// Where a registered extractor came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOrigin {
    Builtin,
    Manifest { path: PathBuf, generated: bool },
}

/// Summary of a registered unit for listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitInfo {
    pub id: String,
    pub name: String,
    pub url: String,
    pub mode: TrackingMode,
    pub generated: bool,
}

struct LoadedUnit {
    extractor: Arc<dyn Extractor>,
    origin: UnitOrigin,
}

impl LoadedUnit {
    fn info(&self, id: &str) -> UnitInfo {
        UnitInfo {
            id: id.to_string(),
            name: self.extractor.display_name().to_string(),
            url: self.extractor.source_url().to_string(),
            mode: self.extractor.tracking_mode(),
            generated: matches!(self.origin, UnitOrigin::Manifest { generated: true, .. }),
        }
    }
}

/// Maps extractor ids to extractors.
pub struct PluginRegistry {
    dir: PathBuf,
    client: reqwest::Client,
    units: DashMap<String, LoadedUnit>,
}

impl PluginRegistry {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_client(dir, http_client())
    }

    /// Registry whose manifest extractors share the given HTTP client.
    pub fn with_client(dir: impl Into<PathBuf>, client: reqwest::Client) -> Self {
        Self {
            dir: dir.into(),
            client,
            units: DashMap::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Scan the registry directory and replace every manifest unit with what
    /// is on disk now. Compiled-in extractors are kept.
    pub fn load_all(&self) -> Result<LoadReport, RegistryError> {
        let mut report = LoadReport::default();
        let mut fresh = Vec::new();

        for path in unit_files(&self.dir)? {
            let Some(id) = unit_id(&path) else {
                continue;
            };
            match self.load_unit(&id, &path) {
                Ok(unit) => fresh.push((id, unit)),
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "Rejected plugin unit");
                    report.rejected.push((path, err));
                }
            }
        }

        // Insert first, then drop stale units, so resolve never sees a gap.
        let mut keep = std::collections::HashSet::new();
        for (id, unit) in fresh {
            keep.insert(id.clone());
            report.loaded.push(id.clone());
            self.units.insert(id, unit);
        }
        self.units.retain(|id, unit| {
            matches!(unit.origin, UnitOrigin::Builtin) || keep.contains(id)
        });

        report.loaded.sort();
        info!(
            dir = %self.dir.display(),
            loaded = report.loaded.len(),
            rejected = report.rejected.len(),
            "Plugin units loaded"
        );
        Ok(report)
    }

    /// Load (or reload) a single unit by id from the registry directory.
    pub fn load_unit_by_id(&self, id: &str) -> Result<UnitInfo, RegistryError> {
        if !is_unit_id(id) {
            return Err(RegistryError::InvalidId(id.to_string()));
        }
        let path = self.unit_path(id);
        let unit = self.load_unit(id, &path)?;
        let info = unit.info(id);
        self.units.insert(id.to_string(), unit);
        debug!(unit = %id, "Plugin unit loaded");
        Ok(info)
    }

    pub fn resolve(&self, id: &str) -> Result<Arc<dyn Extractor>, RegistryError> {
        self.units
            .get(id)
            .map(|unit| Arc::clone(&unit.extractor))
            .ok_or_else(|| RegistryError::UnknownExtractor(id.to_string()))
    }

    /// Admit a compiled-in extractor under its own id.
    pub fn register(&self, extractor: Arc<dyn Extractor>) {
        let id = extractor.id().to_string();
        self.units.insert(
            id,
            LoadedUnit {
                extractor,
                origin: UnitOrigin::Builtin,
            },
        );
    }

    pub fn contains(&self, id: &str) -> bool {
        self.units.contains_key(id)
    }

    /// Registered units, sorted by id.
    pub fn units(&self) -> Vec<UnitInfo> {
        let mut units: Vec<UnitInfo> = self
            .units
            .iter()
            .map(|entry| entry.value().info(entry.key()))
            .collect();
        units.sort_by(|a, b| a.id.cmp(&b.id));
        units
    }

    /// Write and register a whole-page hash unit for an operator-added site.
    ///
    /// Returns the new unit id, `hash_<slug of name>`.
    pub fn install_hash_unit(&self, name: &str, url: &str) -> Result<String, RegistryError> {
        let id = format!("hash_{}", slug(name));
        let path = self.unit_path(&id);
        if self.units.contains_key(&id) || path.exists() {
            return Err(RegistryError::AlreadyExists(id));
        }

        fs::create_dir_all(&self.dir)?;
        let text = toml::to_string(&PluginManifest::hash_page(name, url))?;
        fs::write(&path, text)?;

        let unit = match self.load_unit(&id, &path) {
            Ok(unit) => unit,
            Err(err) => {
                discard_unit_file(&path);
                return Err(err.into());
            }
        };
        self.units.insert(id.clone(), unit);

        info!(unit = %id, url = %url, "Generated hash unit installed");
        Ok(id)
    }

    /// Delete a generated unit's file and mapping.
    ///
    /// Hand-authored and compiled-in units are left alone; returns whether
    /// anything was removed.
    pub fn remove_generated_unit(&self, id: &str) -> Result<bool, RegistryError> {
        let path = match self.units.get(id).map(|unit| unit.origin.clone()) {
            Some(UnitOrigin::Manifest {
                path,
                generated: true,
            }) => path,
            _ => return Ok(false),
        };

        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.units.remove(id);

        info!(unit = %id, "Generated unit removed");
        Ok(true)
    }

    /// Copy the default units into the registry directory when it has none.
    ///
    /// Returns the number of units copied.
    pub fn seed_defaults(&self, default_dir: &Path) -> Result<usize, RegistryError> {
        if !unit_files(&self.dir)?.is_empty() {
            return Ok(0);
        }
        if !default_dir.is_dir() {
            warn!(dir = %default_dir.display(), "Default plugin directory missing, nothing seeded");
            return Ok(0);
        }

        fs::create_dir_all(&self.dir)?;
        let mut copied = 0;
        for source in unit_files(default_dir)? {
            if let Some(file_name) = source.file_name() {
                fs::copy(&source, self.dir.join(file_name))?;
                copied += 1;
            }
        }

        info!(from = %default_dir.display(), to = %self.dir.display(), copied, "Seeded default plugin units");
        Ok(copied)
    }

    fn unit_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", id, UNIT_EXTENSION))
    }

    fn load_unit(&self, id: &str, path: &Path) -> Result<LoadedUnit, LoadError> {
        if self
            .units
            .get(id)
            .is_some_and(|unit| matches!(unit.origin, UnitOrigin::Builtin))
        {
            return Err(LoadError::DuplicateId {
                unit: id.to_string(),
            });
        }

        let text = fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let manifest = PluginManifest::parse(id, path, &text)?;
        let extractor = manifest.build(id, self.client.clone())?;

        Ok(LoadedUnit {
            extractor,
            origin: UnitOrigin::Manifest {
                path: path.to_path_buf(),
                generated: manifest.generated,
            },
        })
    }
}

/// Unit id for a site name: lowercase ASCII alphanumerics, everything else `_`.
pub fn slug(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// A unit id names a file directly inside the registry directory.
fn is_unit_id(id: &str) -> bool {
    !id.is_empty()
        && !id.starts_with('.')
        && !id.contains(['/', '\\'])
        && !id.contains("..")
}

/// Best-effort removal of a unit file that failed to load.
fn discard_unit_file(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove rejected unit file"),
    }
}

fn unit_id(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::to_string)
}

/// `*.toml` files directly in `dir`, sorted. A missing directory has none.
fn unit_files(dir: &Path) -> Result<Vec<PathBuf>, RegistryError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == UNIT_EXTENSION) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
