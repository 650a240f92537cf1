//! Cache layout and incremental compilation cache for kcjpm.
//!
//! Two distinct caches live here:
//!
//! - [`HomeCache`]: the per-user dependency cache under `~/.kcjpm/cache`,
//!   holding shallow git clones (`git/<name>`) and extracted registry
//!   packages (`registry/<name>/<version>`).
//! - [`CompilationCache`]: per-project incremental build state persisted as
//!   JSON under `<output>/.kcjpm-cache/`, used to skip recompilation of
//!   unchanged packages.

mod hash;
mod incremental;

pub use hash::{sha256_bytes, sha256_dir, sha256_file, sha256_hex};
pub use incremental::{
    detect_changes, ChangeDetection, CompilationCache, PackageCacheEntry, SourceFileState,
    CACHE_DIR_NAME, CACHE_FILE_NAME,
};

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cannot determine a home directory for the dependency cache")]
    NoHomeDir,
    #[error("failed to create cache directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// The per-user dependency cache.
#[derive(Debug, Clone)]
pub struct HomeCache {
    root: PathBuf,
}

impl HomeCache {
    /// Open the cache at its default location (`~/.kcjpm/cache`).
    pub fn open() -> Result<Self, CacheError> {
        let home = directories::UserDirs::new()
            .map(|d| d.home_dir().to_path_buf())
            .ok_or(CacheError::NoHomeDir)?;
        Self::open_at(home.join(".kcjpm").join("cache"))
    }

    /// Open a cache rooted at a specific directory.
    pub fn open_at(root: PathBuf) -> Result<Self, CacheError> {
        let cache = Self { root };
        cache.ensure_dirs()?;
        Ok(cache)
    }

    fn ensure_dirs(&self) -> Result<(), CacheError> {
        for dir in [self.git_dir(), self.registry_dir()] {
            std::fs::create_dir_all(&dir).map_err(|source| CacheError::CreateDir {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(())
    }

    /// Cache root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding shallow git clones.
    pub fn git_dir(&self) -> PathBuf {
        self.root.join("git")
    }

    /// Directory holding extracted registry packages.
    pub fn registry_dir(&self) -> PathBuf {
        self.root.join("registry")
    }

    /// Checkout directory for a git dependency.
    pub fn git_checkout(&self, name: &str) -> PathBuf {
        self.git_dir().join(sanitize_name(name))
    }

    /// Extraction directory for a registry package version.
    pub fn registry_package(&self, name: &str, version: &str) -> PathBuf {
        self.registry_dir().join(name).join(version)
    }
}

/// Sanitize a package name for use as a directory name.
///
/// Everything outside `[A-Za-z0-9_-]` becomes `_`.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
