//! Lock file handling for kcjpm.
//!
//! `kcjpm.lock` pins the exact state of every transitive dependency. The
//! serialisation is deterministic: packages are sorted by name and no
//! timestamps live inside package entries, so generating a lock from the
//! same resolved set always produces identical bytes (metadata aside).

mod diff;
mod source;
mod validate;

pub use diff::LockfileDiff;
pub use source::{format_source, parse_source, LockedSource};
pub use validate::{LockValidation, LockValidator};

use chrono::{DateTime, Utc};
use kcjpm_types::{ResolvedDependency, ResolvedSource};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// The lock file name next to the manifest.
pub const LOCK_FILE_NAME: &str = "kcjpm.lock";

/// Current lock schema version.
pub const LOCK_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum LockError {
    #[error("lock file not found at {0}")]
    NotFound(PathBuf),
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid lock file at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("cannot serialize lock file: {source}")]
    Serialize { source: toml::ser::Error },
    #[error("cannot write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed source string `{0}`")]
    MalformedSource(String),
    #[error("lock validation failed: {0}")]
    Validation(String),
}

/// Lock file metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockMetadata {
    /// When the lock was generated
    #[serde(rename = "generated-at")]
    pub generated_at: DateTime<Utc>,
    /// Tool version that wrote the lock
    #[serde(rename = "kcjpm-version")]
    pub tool_version: String,
}

impl Default for LockMetadata {
    fn default() -> Self {
        Self {
            generated_at: Utc::now(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// One pinned package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockedPackage {
    pub name: String,
    pub version: String,
    /// Source string, see [`format_source`] for the grammar
    pub source: String,
    /// `sha256:<hex>` for registry entries, the resolved commit for git,
    /// absent for path entries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    /// Direct dependency names from the package's own manifest
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
}

/// The `kcjpm.lock` document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockFile {
    pub version: u32,
    pub metadata: LockMetadata,
    #[serde(default, rename = "package", skip_serializing_if = "Vec::is_empty")]
    pub packages: Vec<LockedPackage>,
}

impl Default for LockFile {
    fn default() -> Self {
        Self {
            version: LOCK_VERSION,
            metadata: LockMetadata::default(),
            packages: Vec::new(),
        }
    }
}

impl LockFile {
    /// Read and parse a lock file.
    pub fn load(path: &Path) -> Result<Self, LockError> {
        if !path.exists() {
            return Err(LockError::NotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path).map_err(|source| LockError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| LockError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Serialize to deterministic TOML.
    pub fn to_toml(&self) -> Result<String, LockError> {
        toml::to_string_pretty(self).map_err(|source| LockError::Serialize { source })
    }

    /// Write the lock file to disk.
    ///
    /// Uses a write-to-temp-then-rename pattern so readers never observe a
    /// partially written lock.
    pub fn save(&self, path: &Path) -> Result<(), LockError> {
        let content = self.to_toml()?;
        let tmp_path = path.with_extension("lock.tmp");
        std::fs::write(&tmp_path, &content).map_err(|source| LockError::Write {
            path: tmp_path.clone(),
            source,
        })?;
        std::fs::rename(&tmp_path, path).map_err(|source| LockError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write the lock file from async contexts.
    pub async fn save_async(&self, path: PathBuf) -> Result<(), LockError> {
        let lock = self.clone();
        tokio::task::spawn_blocking(move || lock.save(&path))
            .await
            .map_err(|e| LockError::Write {
                path: PathBuf::new(),
                source: std::io::Error::other(e.to_string()),
            })?
    }

    /// Find a package entry by name.
    pub fn get(&self, name: &str) -> Option<&LockedPackage> {
        self.packages.iter().find(|p| p.name == name)
    }
}

/// Produces lock files from resolved dependency sets.
pub struct LockGenerator {
    tool_version: String,
}

impl Default for LockGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl LockGenerator {
    pub fn new() -> Self {
        Self {
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn with_tool_version(mut self, version: impl Into<String>) -> Self {
        self.tool_version = version.into();
        self
    }

    /// Generate a lock from a resolved dependency set.
    ///
    /// Packages are sorted by name; each entry records the dependency names
    /// from the package's own manifest (direct only).
    pub fn generate(&self, deps: &[ResolvedDependency]) -> LockFile {
        let mut packages: Vec<LockedPackage> = deps.iter().map(|d| self.lock_entry(d)).collect();
        packages.sort_by(|a, b| a.name.cmp(&b.name));

        LockFile {
            version: LOCK_VERSION,
            metadata: LockMetadata {
                generated_at: Utc::now(),
                tool_version: self.tool_version.clone(),
            },
            packages,
        }
    }

    /// Update an existing lock against a freshly resolved set.
    ///
    /// An existing entry is kept only when the source identity still matches
    /// (path: always; git: same URL and reference; registry: same version);
    /// everything else is regenerated. Metadata is always regenerated.
    pub fn update(&self, existing: &LockFile, deps: &[ResolvedDependency]) -> LockFile {
        let mut packages: Vec<LockedPackage> = deps
            .iter()
            .map(|dep| {
                existing
                    .get(&dep.name)
                    .filter(|entry| source_identity_matches(entry, dep))
                    .cloned()
                    .unwrap_or_else(|| self.lock_entry(dep))
            })
            .collect();
        packages.sort_by(|a, b| a.name.cmp(&b.name));

        LockFile {
            version: LOCK_VERSION,
            metadata: LockMetadata {
                generated_at: Utc::now(),
                tool_version: self.tool_version.clone(),
            },
            packages,
        }
    }

    fn lock_entry(&self, dep: &ResolvedDependency) -> LockedPackage {
        let checksum = match &dep.source {
            ResolvedSource::Registry { .. } => kcjpm_cache::sha256_dir(&dep.local_path)
                .ok()
                .map(|h| format!("sha256:{}", h)),
            ResolvedSource::Git { commit, .. } => commit.clone(),
            ResolvedSource::Path { .. } => None,
        };

        LockedPackage {
            name: dep.name.clone(),
            version: dep
                .version
                .clone()
                .unwrap_or_else(|| "unknown".to_string()),
            source: format_source(&dep.source),
            checksum,
            dependencies: direct_dependency_names(&dep.local_path),
        }
    }
}

/// Direct dependency names from a fetched package's own manifest.
///
/// Packages without a manifest (native or opaque dependencies) lock with an
/// empty list.
fn direct_dependency_names(local_path: &Path) -> Vec<String> {
    match kcjpm_manifest::find_manifest(local_path) {
        Ok(manifest) => manifest.dependencies.keys().cloned().collect(),
        Err(_) => Vec::new(),
    }
}

fn source_identity_matches(entry: &LockedPackage, dep: &ResolvedDependency) -> bool {
    let Ok(locked) = parse_source(&entry.source) else {
        return false;
    };
    match (&locked, &dep.source) {
        (LockedSource::Path { .. }, ResolvedSource::Path { .. }) => true,
        (
            LockedSource::Git {
                url: locked_url,
                reference: locked_ref,
                ..
            },
            ResolvedSource::Git { url, reference, .. },
        ) => locked_url == url && locked_ref == reference,
        (LockedSource::Registry { .. }, ResolvedSource::Registry { version, .. }) => {
            entry.version == *version
        }
        _ => false,
    }
}
