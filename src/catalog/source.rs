//! Technique lookup across the local, custom and bundled catalog tiers.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use super::technique::LoadedTechnique;
use super::CatalogError;

/// Which tier a definition was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    /// Operator-supplied directory overlay.
    Local,
    Custom,
    Bundled,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Custom => "custom",
            Self::Bundled => "bundled",
        }
    }
}

/// Raw definition bytes plus where they came from.
#[derive(Debug, Clone)]
pub struct TechniqueBytes {
    pub bytes: Vec<u8>,
    pub provenance: Provenance,
    /// Tier root, substituted for `PathToAtomicsFolder`.
    pub base_dir: PathBuf,
}

/// Anything that can hand out technique definitions by ID.
pub trait TechniqueSource: Send + Sync {
    /// Fetch raw bytes for a technique.
    fn fetch(&self, technique_id: &str) -> Result<TechniqueBytes, CatalogError>;

    /// Fetch and parse a technique.
    fn load(&self, technique_id: &str) -> Result<LoadedTechnique, CatalogError> {
        let raw = self.fetch(technique_id)?;
        LoadedTechnique::parse(&raw.bytes, raw.provenance, &raw.base_dir)
    }

    /// Write the technique into `<target>/<TID>/` and return that directory.
    ///
    /// The default writes the definition alone as `<TID>.yaml`.
    fn dump(&self, technique_id: &str, target: &Path) -> Result<PathBuf, CatalogError> {
        let raw = self.fetch(technique_id)?;
        let dir = target.join(technique_id);
        std::fs::create_dir_all(&dir).map_err(|e| io_error(&dir, e))?;
        let path = dir.join(format!("{}.yaml", technique_id));
        std::fs::write(&path, &raw.bytes).map_err(|e| io_error(&path, e))?;
        Ok(dir)
    }
}

fn io_error(path: &Path, err: impl std::fmt::Display) -> CatalogError {
    CatalogError::Io(format!("{}: {}", path.display(), err))
}

/// Directory-backed catalog with three tiers.
#[derive(Debug, Clone)]
pub struct FileCatalog {
    bundled: PathBuf,
    custom: Option<PathBuf>,
    local: Option<PathBuf>,
}

const EXTENSIONS: &[&str] = &["yaml", "yml"];

impl FileCatalog {
    pub fn new(bundled: PathBuf, custom: Option<PathBuf>, local: Option<PathBuf>) -> Self {
        Self { bundled, custom, local }
    }

    /// Whether the bundled tier exists on disk.
    pub fn has_bundled(&self) -> bool {
        self.bundled.is_dir()
    }

    /// Tiers in lookup order. Missing directories are skipped.
    fn tiers(&self) -> Vec<(Provenance, &Path)> {
        let mut tiers = Vec::with_capacity(3);
        if let Some(local) = &self.local {
            tiers.push((Provenance::Local, local.as_path()));
        }
        if let Some(custom) = &self.custom {
            tiers.push((Provenance::Custom, custom.as_path()));
        }
        tiers.push((Provenance::Bundled, self.bundled.as_path()));
        tiers
    }

    /// All technique IDs across tiers, sorted and de-duplicated.
    pub fn list(&self) -> Result<Vec<String>, CatalogError> {
        let mut ids = BTreeSet::new();
        for (provenance, root) in self.tiers() {
            if !root.is_dir() {
                if provenance == Provenance::Local {
                    return Err(CatalogError::Io(format!(
                        "local atomics path {} is not a directory",
                        root.display()
                    )));
                }
                continue;
            }
            let entries = std::fs::read_dir(root)
                .map_err(|e| CatalogError::Io(format!("{}: {}", root.display(), e)))?;
            for entry in entries.flatten() {
                let name = entry.file_name().to_string_lossy().into_owned();
                if entry.path().is_dir() && name.starts_with('T') {
                    ids.insert(name);
                }
            }
        }
        Ok(ids.into_iter().collect())
    }
}

/// Reject IDs that could escape the tier root.
fn validate_id(technique_id: &str) -> Result<(), CatalogError> {
    let valid = technique_id.starts_with('T')
        && technique_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.');
    if valid {
        Ok(())
    } else {
        Err(CatalogError::NotFound(technique_id.to_string()))
    }
}

impl TechniqueSource for FileCatalog {
    fn fetch(&self, technique_id: &str) -> Result<TechniqueBytes, CatalogError> {
        validate_id(technique_id)?;

        for (provenance, root) in self.tiers() {
            for ext in EXTENSIONS {
                let path = root
                    .join(technique_id)
                    .join(format!("{}.{}", technique_id, ext));
                match std::fs::read(&path) {
                    Ok(bytes) => {
                        tracing::debug!(
                            technique = technique_id,
                            tier = provenance.as_str(),
                            path = %path.display(),
                            "technique definition found"
                        );
                        return Ok(TechniqueBytes {
                            bytes,
                            provenance,
                            base_dir: root.to_path_buf(),
                        });
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                    Err(e) => {
                        return Err(CatalogError::Io(format!("{}: {}", path.display(), e)));
                    }
                }
            }
        }

        if self.local.is_none() && self.custom.is_none() && !self.has_bundled() {
            return Err(CatalogError::NoBundledCatalog);
        }
        Err(CatalogError::NotFound(technique_id.to_string()))
    }

    /// Copy the whole `<TID>/` directory of the tier that resolves the
    /// technique, including payloads shipped beside the definition.
    fn dump(&self, technique_id: &str, target: &Path) -> Result<PathBuf, CatalogError> {
        let raw = self.fetch(technique_id)?;
        let source = raw.base_dir.join(technique_id);
        let dest = target.join(technique_id);
        let mut copied = 0usize;
        for entry in WalkDir::new(&source) {
            let entry = entry.map_err(|e| io_error(&source, e))?;
            let Ok(relative) = entry.path().strip_prefix(&source) else {
                continue;
            };
            let out = dest.join(relative);
            if entry.file_type().is_dir() {
                std::fs::create_dir_all(&out).map_err(|e| io_error(&out, e))?;
            } else if entry.file_type().is_file() {
                std::fs::copy(entry.path(), &out).map_err(|e| io_error(&out, e))?;
                copied += 1;
            }
        }
        tracing::info!(
            technique = technique_id,
            tier = raw.provenance.as_str(),
            files = copied,
            dest = %dest.display(),
            "technique dumped"
        );
        Ok(dest)
    }
}
