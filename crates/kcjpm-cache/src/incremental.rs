//! Incremental compilation cache.
//!
//! One JSON file per project output directory records, for every compiled
//! package, the metadata of its source files, the artifact it produced, and
//! the hash of the build configuration that produced it. On the next build
//! [`detect_changes`] decides per package whether the artifact can be reused.

use crate::hash::sha256_file;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Directory under the project output dir holding the cache file.
pub const CACHE_DIR_NAME: &str = ".kcjpm-cache";
/// The cache file itself.
pub const CACHE_FILE_NAME: &str = "kcjpm-cache.json";

const CACHE_VERSION: u32 = 1;

/// Recorded state of one source file at compile time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFileState {
    /// Modification time, milliseconds since the epoch
    pub last_modified: u64,
    /// File size in bytes
    pub size: u64,
    /// SHA-256 of the file contents
    pub content_hash: String,
}

impl SourceFileState {
    /// Capture the current on-disk state of a file.
    pub fn capture(path: &Path) -> std::io::Result<Self> {
        let meta = std::fs::metadata(path)?;
        Ok(Self {
            last_modified: mtime_millis(&meta),
            size: meta.len(),
            content_hash: sha256_file(path)?,
        })
    }
}

/// Cached compile result for one package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageCacheEntry {
    pub package_name: String,
    pub package_root: PathBuf,
    /// Artifact produced by the last compile
    pub output_path: PathBuf,
    /// Absolute source path → recorded state
    pub source_files: BTreeMap<PathBuf, SourceFileState>,
    /// Seconds since the epoch
    pub compile_timestamp: u64,
    /// SHA-256 of the build configuration at compile time
    pub build_config_hash: String,
}

impl PackageCacheEntry {
    /// Capture a fresh entry after a successful compile.
    pub fn capture(
        package_name: &str,
        package_root: &Path,
        source_files: &[PathBuf],
        output_path: &Path,
        build_config_hash: &str,
    ) -> std::io::Result<Self> {
        let mut files = BTreeMap::new();
        for file in source_files {
            files.insert(file.clone(), SourceFileState::capture(file)?);
        }
        Ok(Self {
            package_name: package_name.to_string(),
            package_root: package_root.to_path_buf(),
            output_path: output_path.to_path_buf(),
            source_files: files,
            compile_timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            build_config_hash: build_config_hash.to_string(),
        })
    }
}

/// The persisted cache: schema version plus one entry per package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilationCache {
    pub version: u32,
    #[serde(default)]
    pub packages: BTreeMap<String, PackageCacheEntry>,
}

impl Default for CompilationCache {
    fn default() -> Self {
        Self {
            version: CACHE_VERSION,
            packages: BTreeMap::new(),
        }
    }
}

impl CompilationCache {
    fn cache_file(output_dir: &Path) -> PathBuf {
        output_dir.join(CACHE_DIR_NAME).join(CACHE_FILE_NAME)
    }

    /// Load the cache for an output directory.
    ///
    /// Absent, corrupt, or version-mismatched files yield an empty cache;
    /// cache read failures are never fatal.
    pub fn load(output_dir: &Path) -> Self {
        let path = Self::cache_file(output_dir);
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(_) => return Self::default(),
        };
        match serde_json::from_str::<Self>(&content) {
            Ok(cache) if cache.version == CACHE_VERSION => cache,
            Ok(cache) => {
                tracing::debug!(
                    "ignoring incremental cache with schema version {}",
                    cache.version
                );
                Self::default()
            }
            Err(e) => {
                tracing::debug!("ignoring corrupt incremental cache: {}", e);
                Self::default()
            }
        }
    }

    /// Persist the cache into an output directory.
    pub fn save(&self, output_dir: &Path) -> std::io::Result<()> {
        let path = Self::cache_file(output_dir);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(&path, content)
    }
}

/// Outcome of comparing a package against its cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeDetection {
    /// No entry recorded for this package
    NoCacheFound,
    /// The build configuration hash changed
    BuildConfigChanged,
    /// The source set or file contents changed
    FilesChanged {
        added: Vec<PathBuf>,
        removed: Vec<PathBuf>,
        modified: Vec<PathBuf>,
    },
    /// Sources unchanged but the recorded artifact is gone
    OutputMissing,
    /// Artifact can be reused as-is
    NoChanges,
}

impl ChangeDetection {
    /// Short label used in events and logs.
    pub fn label(&self) -> &'static str {
        match self {
            ChangeDetection::NoCacheFound => "NoCacheFound",
            ChangeDetection::BuildConfigChanged => "BuildConfigChanged",
            ChangeDetection::FilesChanged { .. } => "FilesChanged",
            ChangeDetection::OutputMissing => "OutputMissing",
            ChangeDetection::NoChanges => "NoChanges",
        }
    }
}

/// Decide whether a package needs recompilation.
///
/// Size is checked before mtime, and the content hash is only computed when
/// the mtime differs, so an untouched tree costs one `stat` per file.
pub fn detect_changes(
    entry: Option<&PackageCacheEntry>,
    source_files: &[PathBuf],
    build_config_hash: &str,
) -> ChangeDetection {
    let Some(entry) = entry else {
        return ChangeDetection::NoCacheFound;
    };

    if entry.build_config_hash != build_config_hash {
        return ChangeDetection::BuildConfigChanged;
    }

    let added: Vec<PathBuf> = source_files
        .iter()
        .filter(|f| !entry.source_files.contains_key(*f))
        .cloned()
        .collect();
    let removed: Vec<PathBuf> = entry
        .source_files
        .keys()
        .filter(|f| !source_files.contains(f))
        .cloned()
        .collect();

    if !added.is_empty() || !removed.is_empty() {
        return ChangeDetection::FilesChanged {
            added,
            removed,
            modified: Vec::new(),
        };
    }

    let mut modified = Vec::new();
    for (path, recorded) in &entry.source_files {
        if file_modified(path, recorded) {
            modified.push(path.clone());
        }
    }

    if !modified.is_empty() {
        return ChangeDetection::FilesChanged {
            added: Vec::new(),
            removed: Vec::new(),
            modified,
        };
    }

    if !entry.output_path.exists() {
        return ChangeDetection::OutputMissing;
    }

    ChangeDetection::NoChanges
}

fn file_modified(path: &Path, recorded: &SourceFileState) -> bool {
    let Ok(meta) = std::fs::metadata(path) else {
        return true;
    };
    if meta.len() != recorded.size {
        return true;
    }
    if mtime_millis(&meta) == recorded.last_modified {
        return false;
    }
    // mtime moved but size held; only a content hash settles it
    match sha256_file(path) {
        Ok(hash) => hash != recorded.content_hash,
        Err(_) => true,
    }
}

fn mtime_millis(meta: &std::fs::Metadata) -> u64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn fixture() -> (tempfile::TempDir, Vec<PathBuf>, PackageCacheEntry) {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        fs::create_dir_all(&src).unwrap();
        let a = src.join("a.cj");
        let b = src.join("b.cj");
        fs::write(&a, "package demo\nfunc one() {}\n").unwrap();
        fs::write(&b, "package demo\nfunc two() {}\n").unwrap();

        let output = tmp.path().join("libdemo.a");
        fs::write(&output, "artifact").unwrap();

        let sources = vec![a, b];
        let entry =
            PackageCacheEntry::capture("demo", tmp.path(), &sources, &output, "cfg-hash").unwrap();
        (tmp, sources, entry)
    }

    #[test]
    fn no_entry_means_no_cache_found() {
        let (_tmp, sources, _entry) = fixture();
        assert_eq!(
            detect_changes(None, &sources, "cfg-hash"),
            ChangeDetection::NoCacheFound
        );
    }

    #[test]
    fn build_config_change_detected_first() {
        let (_tmp, sources, entry) = fixture();
        assert_eq!(
            detect_changes(Some(&entry), &sources, "other-hash"),
            ChangeDetection::BuildConfigChanged
        );
    }

    #[test]
    fn unchanged_package_reports_no_changes() {
        let (_tmp, sources, entry) = fixture();
        assert_eq!(
            detect_changes(Some(&entry), &sources, "cfg-hash"),
            ChangeDetection::NoChanges
        );
    }

    #[test]
    fn added_and_removed_files_detected() {
        let (tmp, mut sources, entry) = fixture();
        let extra = tmp.path().join("src").join("c.cj");
        fs::write(&extra, "package demo\n").unwrap();
        sources.push(extra.clone());

        match detect_changes(Some(&entry), &sources, "cfg-hash") {
            ChangeDetection::FilesChanged { added, removed, .. } => {
                assert_eq!(added, vec![extra]);
                assert!(removed.is_empty());
            }
            other => panic!("expected FilesChanged, got {:?}", other),
        }

        let fewer = &sources[..1];
        match detect_changes(Some(&entry), fewer, "cfg-hash") {
            ChangeDetection::FilesChanged { added, removed, .. } => {
                assert!(added.is_empty());
                assert_eq!(removed.len(), 2);
            }
            other => panic!("expected FilesChanged, got {:?}", other),
        }
    }

    #[test]
    fn content_change_detected_as_modified() {
        let (_tmp, sources, mut entry) = fixture();
        // same length, different bytes; shift the recorded mtime so the
        // comparison falls through to the content hash
        fs::write(&sources[0], "package demo\nfunc ONE() {}\n").unwrap();
        if let Some(state) = entry.source_files.get_mut(&sources[0]) {
            state.last_modified = state.last_modified.saturating_sub(10_000);
        }
        match detect_changes(Some(&entry), &sources, "cfg-hash") {
            ChangeDetection::FilesChanged { modified, .. } => {
                assert_eq!(modified, vec![sources[0].clone()])
            }
            other => panic!("expected FilesChanged, got {:?}", other),
        }
    }

    #[test]
    fn touched_but_identical_file_is_unchanged() {
        let (_tmp, sources, mut entry) = fixture();
        // simulate an mtime-only difference in the recorded state
        if let Some(state) = entry.source_files.get_mut(&sources[0]) {
            state.last_modified = state.last_modified.saturating_sub(10_000);
        }
        assert_eq!(
            detect_changes(Some(&entry), &sources, "cfg-hash"),
            ChangeDetection::NoChanges
        );
    }

    #[test]
    fn missing_output_detected_last() {
        let (_tmp, sources, entry) = fixture();
        fs::remove_file(&entry.output_path).unwrap();
        assert_eq!(
            detect_changes(Some(&entry), &sources, "cfg-hash"),
            ChangeDetection::OutputMissing
        );
    }

    #[test]
    fn cache_round_trip_and_corruption_fallback() {
        let (tmp, _sources, entry) = fixture();
        let out = tmp.path().join("target");

        let mut cache = CompilationCache::default();
        cache.packages.insert("demo".to_string(), entry);
        cache.save(&out).unwrap();

        let loaded = CompilationCache::load(&out);
        assert_eq!(loaded.packages.len(), 1);
        assert_eq!(loaded, cache);

        // corrupt file falls back to empty
        fs::write(out.join(CACHE_DIR_NAME).join(CACHE_FILE_NAME), "{oops").unwrap();
        assert!(CompilationCache::load(&out).packages.is_empty());

        // absent file too
        assert!(CompilationCache::load(tmp.path()).packages.is_empty());
    }
}
