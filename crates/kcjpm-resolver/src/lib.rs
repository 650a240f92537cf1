//! Dependency resolution and installation for kcjpm.
//!
//! [`DependencyResolver`] turns a manifest's dependency map into the
//! transitive set of [`ResolvedDependency`] values, detecting version
//! conflicts along the way. [`DependencyManager`] composes the resolver with
//! the lock file: depending on the [`LockPolicy`] it reuses pinned sources,
//! refreshes the lock, or bypasses it entirely.

use futures::future::BoxFuture;
use futures::FutureExt;
use kcjpm_cache::HomeCache;
use kcjpm_fetch::{FetchError, FetcherSet};
use kcjpm_lockfile::{
    LockError, LockFile, LockGenerator, LockValidator, LockedSource, LOCK_FILE_NAME,
};
use kcjpm_manifest::{find_manifest, ManifestError};
use kcjpm_registry::DependencyHttpClient;
use kcjpm_types::{
    DepSpec, GitReference, Manifest, RegistryConfig, ResolvedDependency, SpecError,
};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DependencyError {
    #[error("version conflict for `{name}`: {}", versions.join(", "))]
    VersionConflict { name: String, versions: Vec<String> },
    #[error("invalid spec for dependency `{name}`: {source}")]
    InvalidSpec { name: String, source: SpecError },
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error("lock file validation failed:\n{0}")]
    LockInvalid(String),
}

/// How an install interacts with the lock file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockPolicy {
    /// Validate and reuse an existing lock; generate one when absent.
    #[default]
    UseExisting,
    /// Resolve freshly and regenerate the lock, merging unchanged entries.
    Refresh,
    /// Resolve without reading or writing the lock.
    Ignore,
}

/// Options for [`DependencyManager::install`].
#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    pub lock_policy: LockPolicy,
}

/// Resolves a manifest's dependencies transitively.
pub struct DependencyResolver {
    fetchers: FetcherSet,
}

/// Internal accumulator for one resolution run.
#[derive(Default)]
struct WalkState {
    visited: HashSet<String>,
    /// Every version declared for a name anywhere in the closure.
    declared: BTreeMap<String, BTreeSet<String>>,
    resolved: Vec<ResolvedDependency>,
}

impl DependencyResolver {
    pub fn new(cache: HomeCache, client: Arc<dyn DependencyHttpClient>) -> Self {
        Self {
            fetchers: FetcherSet::new(cache, client),
        }
    }

    /// Resolve the transitive dependency set of a manifest.
    ///
    /// The walk is depth-first with a visited set, so cyclic graphs
    /// terminate; each dependency is appended after its own subtree, so
    /// children precede parents in the returned list. Optional dependencies
    /// are skipped. A name declared with more than one distinct version
    /// anywhere in the closure fails with
    /// [`DependencyError::VersionConflict`].
    pub async fn resolve(
        &self,
        manifest: &Manifest,
        project_root: &Path,
    ) -> Result<Vec<ResolvedDependency>, DependencyError> {
        let mut state = WalkState::default();
        self.walk(
            &manifest.dependencies,
            project_root.to_path_buf(),
            manifest.registry.clone(),
            &mut state,
        )
        .await?;

        for (name, versions) in &state.declared {
            if versions.len() > 1 {
                return Err(DependencyError::VersionConflict {
                    name: name.clone(),
                    versions: versions.iter().cloned().collect(),
                });
            }
        }

        Ok(state.resolved)
    }

    fn walk<'a>(
        &'a self,
        deps: &'a BTreeMap<String, DepSpec>,
        base_dir: PathBuf,
        registry_cfg: RegistryConfig,
        state: &'a mut WalkState,
    ) -> BoxFuture<'a, Result<(), DependencyError>> {
        async move {
            for (name, spec) in deps {
                if spec.optional {
                    tracing::debug!("skipping optional dependency {}", name);
                    continue;
                }

                spec.kind().map_err(|source| DependencyError::InvalidSpec {
                    name: name.clone(),
                    source,
                })?;

                if let Some(version) = &spec.version {
                    state
                        .declared
                        .entry(name.clone())
                        .or_default()
                        .insert(version.clone());
                }

                if !state.visited.insert(name.clone()) {
                    continue;
                }

                let resolved = self.fetchers.fetch(spec, &base_dir, &registry_cfg).await?;

                // Recurse into the dependency's own manifest when it has one;
                // native or opaque dependencies ship without a manifest.
                match find_manifest(&resolved.local_path) {
                    Ok(dep_manifest) => {
                        self.walk(
                            &dep_manifest.dependencies,
                            resolved.local_path.clone(),
                            dep_manifest.registry.clone(),
                            state,
                        )
                        .await?;
                    }
                    Err(ManifestError::NotFound(_)) => {}
                    Err(e) => return Err(e.into()),
                }

                state.resolved.push(resolved);
            }
            Ok(())
        }
        .boxed()
    }
}

/// Installs dependencies, keeping the lock file in sync.
pub struct DependencyManager {
    resolver: DependencyResolver,
    cache: HomeCache,
    generator: LockGenerator,
}

impl DependencyManager {
    pub fn new(cache: HomeCache, client: Arc<dyn DependencyHttpClient>) -> Self {
        Self {
            resolver: DependencyResolver::new(cache.clone(), client),
            cache,
            generator: LockGenerator::new(),
        }
    }

    /// Install a manifest's dependencies according to the lock policy.
    ///
    /// Whenever the lock participates it is written back atomically.
    pub async fn install(
        &self,
        manifest: &Manifest,
        project_root: &Path,
        options: &InstallOptions,
    ) -> Result<Vec<ResolvedDependency>, DependencyError> {
        let lock_path = project_root.join(LOCK_FILE_NAME);

        match options.lock_policy {
            LockPolicy::Ignore => self.resolver.resolve(manifest, project_root).await,
            LockPolicy::Refresh => {
                let deps = self.resolver.resolve(manifest, project_root).await?;
                let lock = match LockFile::load(&lock_path) {
                    Ok(existing) => self.generator.update(&existing, &deps),
                    Err(LockError::NotFound(_)) => self.generator.generate(&deps),
                    Err(e) => return Err(e.into()),
                };
                lock.save_async(lock_path).await?;
                Ok(deps)
            }
            LockPolicy::UseExisting => {
                if lock_path.exists() {
                    let lock = LockFile::load(&lock_path)?;
                    let validation = LockValidator::new()
                        .with_cache(self.cache.clone())
                        .validate(&lock, manifest);
                    for warning in &validation.warnings {
                        tracing::warn!("lock: {}", warning);
                    }
                    if !validation.is_ok() {
                        return Err(DependencyError::LockInvalid(
                            validation.errors.join("\n"),
                        ));
                    }

                    let deps = self
                        .install_from_lock(&lock, manifest, project_root)
                        .await?;
                    lock.save_async(lock_path).await?;
                    Ok(deps)
                } else {
                    let deps = self.resolver.resolve(manifest, project_root).await?;
                    let lock = self.generator.generate(&deps);
                    lock.save_async(lock_path).await?;
                    Ok(deps)
                }
            }
        }
    }

    /// Re-install the exact sources a lock records.
    ///
    /// The lock already holds the transitive closure, so no recursion
    /// happens here; each entry is turned back into a spec and fetched.
    async fn install_from_lock(
        &self,
        lock: &LockFile,
        manifest: &Manifest,
        project_root: &Path,
    ) -> Result<Vec<ResolvedDependency>, DependencyError> {
        let mut resolved = Vec::with_capacity(lock.packages.len());

        for pkg in &lock.packages {
            let spec = spec_from_lock_entry(pkg.name.clone(), &pkg.version, &pkg.source)?;
            let dep = self
                .resolver
                .fetchers
                .fetch(&spec, project_root, &manifest.registry)
                .await?;
            resolved.push(dep);
        }

        Ok(resolved)
    }
}

fn spec_from_lock_entry(
    name: String,
    version: &str,
    source: &str,
) -> Result<DepSpec, DependencyError> {
    let spec = match kcjpm_lockfile::parse_source(source)? {
        LockedSource::Path { path } => {
            let mut spec = DepSpec::path(name, path);
            if version != "unknown" {
                spec.version = Some(version.to_string());
            }
            spec
        }
        LockedSource::Git { url, reference, .. } => {
            let spec = DepSpec::git(name, url);
            match reference {
                GitReference::Tag(t) => spec.with_tag(t),
                GitReference::Branch(b) => spec.with_branch(b),
                GitReference::Commit(c) => spec.with_commit(c),
                GitReference::DefaultBranch => spec,
            }
        }
        LockedSource::Registry { url } => {
            let mut spec = DepSpec::registry(name, version);
            spec.registry = Some(url);
            spec
        }
    };
    Ok(spec)
}
