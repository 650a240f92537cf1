//! Lock file validation.
//!
//! Errors abort an install; warnings are surfaced and ignored.

use crate::{LockFile, LockedSource, LOCK_VERSION};
use kcjpm_cache::HomeCache;
use kcjpm_types::Manifest;
use std::collections::HashSet;
use std::process::Command;

/// Result of validating a lock against a manifest.
#[derive(Debug, Default)]
pub struct LockValidation {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl LockValidation {
    /// True when no errors were recorded (warnings do not count).
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Validates lock files against the declaring manifest and, optionally, the
/// on-disk dependency cache.
#[derive(Default)]
pub struct LockValidator {
    cache: Option<HomeCache>,
}

impl LockValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable on-disk checksum verification against the dependency cache.
    pub fn with_cache(mut self, cache: HomeCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn validate(&self, lock: &LockFile, manifest: &Manifest) -> LockValidation {
        let mut result = LockValidation::default();

        if lock.version != LOCK_VERSION {
            result.errors.push(format!(
                "unsupported lock schema version {} (expected {})",
                lock.version, LOCK_VERSION
            ));
        }

        if lock.metadata.tool_version.is_empty() {
            result
                .warnings
                .push("lock metadata has an empty kcjpm-version".to_string());
        }

        let mut seen = HashSet::new();
        for pkg in &lock.packages {
            if pkg.name.is_empty() {
                result.errors.push("lock entry with empty name".to_string());
            }
            if pkg.version.is_empty() {
                result
                    .errors
                    .push(format!("lock entry `{}` has an empty version", pkg.name));
            }
            if !seen.insert(pkg.name.clone()) {
                result
                    .errors
                    .push(format!("duplicate lock entry `{}`", pkg.name));
            }
        }

        self.check_manifest_drift(lock, manifest, &mut result);

        if let Some(cache) = &self.cache {
            self.check_disk_state(lock, cache, &mut result);
        }

        result
    }

    fn check_manifest_drift(
        &self,
        lock: &LockFile,
        manifest: &Manifest,
        result: &mut LockValidation,
    ) {
        for (name, spec) in &manifest.dependencies {
            if spec.optional {
                continue;
            }
            match lock.get(name) {
                None => result
                    .warnings
                    .push(format!("dependency `{}` is not in the lock file", name)),
                Some(entry) => {
                    if let Some(declared) = &spec.version {
                        if entry.version != "unknown" && &entry.version != declared {
                            result.warnings.push(format!(
                                "version mismatch for `{}`: manifest declares {}, lock pins {}",
                                name, declared, entry.version
                            ));
                        }
                    }
                }
            }
        }

        // An entry is reachable if the manifest names it directly or another
        // entry lists it as a dependency.
        let referenced: HashSet<&str> = lock
            .packages
            .iter()
            .flat_map(|p| p.dependencies.iter().map(String::as_str))
            .collect();
        for pkg in &lock.packages {
            let direct = manifest.dependencies.contains_key(&pkg.name);
            if !direct && !referenced.contains(pkg.name.as_str()) {
                result.warnings.push(format!(
                    "lock entry `{}` has no matching manifest dependency",
                    pkg.name
                ));
            }
        }
    }

    fn check_disk_state(&self, lock: &LockFile, cache: &HomeCache, result: &mut LockValidation) {
        for pkg in &lock.packages {
            let Ok(source) = crate::parse_source(&pkg.source) else {
                result.warnings.push(format!(
                    "lock entry `{}` has an unreadable source `{}`",
                    pkg.name, pkg.source
                ));
                continue;
            };

            match source {
                LockedSource::Git { commit, .. } => {
                    let checkout = cache.git_checkout(&pkg.name);
                    if !checkout.is_dir() {
                        continue;
                    }
                    if let Some(head) = git_head(&checkout) {
                        if head != commit {
                            result.warnings.push(format!(
                                "checksum mismatch for `{}`: cached checkout is at {}, lock records {}",
                                pkg.name, head, commit
                            ));
                        }
                    }
                }
                LockedSource::Registry { .. } => {
                    let Some(expected) = pkg
                        .checksum
                        .as_deref()
                        .and_then(|c| c.strip_prefix("sha256:"))
                    else {
                        continue;
                    };
                    let dir = cache.registry_package(&pkg.name, &pkg.version);
                    if !dir.is_dir() {
                        continue;
                    }
                    match kcjpm_cache::sha256_dir(&dir) {
                        Ok(actual) if actual != expected => {
                            result.warnings.push(format!(
                                "checksum mismatch for `{}`: cached content differs from lock",
                                pkg.name
                            ));
                        }
                        _ => {}
                    }
                }
                LockedSource::Path { .. } => {}
            }
        }
    }
}

fn git_head(dir: &std::path::Path) -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(dir)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
