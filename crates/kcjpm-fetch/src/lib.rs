//! Dependency fetchers for kcjpm.
//!
//! A fetcher materialises one class of dependency into the local cache:
//!
//! - [`PathFetcher`] resolves a relative path against the project root.
//! - [`GitFetcher`] maintains shallow clones under `<cache>/git/<name>`.
//! - [`RegistryFetcher`] downloads and extracts ZIP archives into
//!   `<cache>/registry/<name>/<version>`.
//!
//! Fetching is deterministic: with stable network inputs a repeated fetch
//! yields the same `local_path` without re-downloading or re-cloning.

use kcjpm_cache::HomeCache;
use kcjpm_registry::DependencyHttpClient;
use kcjpm_types::{
    DepSpec, DependencyKind, GitReference, RegistryConfig, ResolvedDependency, ResolvedSource,
    SpecError, DEFAULT_REGISTRY_URL,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::process::Command;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("dependency `{name}` not found: {detail}")]
    DependencyNotFound { name: String, detail: String },
    #[error("git operation failed for `{name}`: {output}")]
    GitFailure { name: String, output: String },
    #[error("download failed for `{name}`: {detail}")]
    DownloadFailure { name: String, detail: String },
    #[error("failed to unpack `{name}`: {detail}")]
    UnpackFailure { name: String, detail: String },
    #[error("registry configuration error: {0}")]
    ConfigError(String),
    #[error("invalid dependency spec: {0}")]
    InvalidSpec(#[from] SpecError),
    #[error(transparent)]
    Registry(#[from] kcjpm_registry::RegistryError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Resolve a `registry` field into a concrete registry URL.
///
/// - `None` or `"default"`: the configured default, else the hard default.
/// - `"private"`: the configured private URL, else a configuration error.
/// - anything else is treated as a literal URL.
pub fn resolve_registry_url(
    name: Option<&str>,
    cfg: &RegistryConfig,
) -> Result<String, FetchError> {
    match name {
        None | Some("default") => Ok(cfg
            .default
            .clone()
            .unwrap_or_else(|| DEFAULT_REGISTRY_URL.to_string())),
        Some("private") => cfg.private_url.clone().ok_or_else(|| {
            FetchError::ConfigError(
                "dependency requests the private registry but [registry] private-url is unset"
                    .to_string(),
            )
        }),
        Some(url) => Ok(url.to_string()),
    }
}

/// Resolves path dependencies against the declaring project root.
#[derive(Default)]
pub struct PathFetcher;

impl PathFetcher {
    pub async fn fetch(
        &self,
        spec: &DepSpec,
        project_root: &Path,
    ) -> Result<ResolvedDependency, FetchError> {
        let declared = spec.path.as_ref().ok_or_else(|| SpecError::MissingSource)?;
        let joined = if declared.is_absolute() {
            declared.clone()
        } else {
            project_root.join(declared)
        };

        let local_path = joined
            .canonicalize()
            .map_err(|e| FetchError::DependencyNotFound {
                name: spec.name.clone(),
                detail: format!("{}: {}", joined.display(), e),
            })?;

        if !local_path.is_dir() {
            return Err(FetchError::DependencyNotFound {
                name: spec.name.clone(),
                detail: format!("{} is not a directory", local_path.display()),
            });
        }

        Ok(ResolvedDependency {
            name: spec.name.clone(),
            version: spec.version.clone(),
            source: ResolvedSource::Path {
                path: declared.clone(),
            },
            local_path,
        })
    }
}

/// Maintains shallow git checkouts in the dependency cache.
pub struct GitFetcher {
    cache: HomeCache,
}

impl GitFetcher {
    pub fn new(cache: HomeCache) -> Self {
        Self { cache }
    }

    pub async fn fetch(&self, spec: &DepSpec) -> Result<ResolvedDependency, FetchError> {
        let url = spec.git.as_ref().ok_or(SpecError::MissingSource)?;
        let reference = spec.git_reference();
        let checkout = self.cache.git_checkout(&spec.name);

        if checkout.is_dir() {
            self.update_checkout(&spec.name, &checkout, &reference).await?;
        } else {
            self.clone_checkout(&spec.name, url, &checkout, &reference)
                .await?;
        }

        let commit = self.rev_parse_head(&spec.name, &checkout).await?;

        Ok(ResolvedDependency {
            name: spec.name.clone(),
            version: spec.version.clone(),
            source: ResolvedSource::Git {
                url: url.clone(),
                reference,
                commit: Some(commit),
            },
            local_path: checkout,
        })
    }

    async fn clone_checkout(
        &self,
        name: &str,
        url: &str,
        dest: &Path,
        reference: &GitReference,
    ) -> Result<(), FetchError> {
        tracing::info!("cloning {} from {}", name, url);

        match reference {
            GitReference::Commit(hash) => {
                // A shallow clone cannot reach an arbitrary commit; clone the
                // default branch in full, then check the hash out.
                self.git(name, None, &["clone", url, &dest.display().to_string()])
                    .await?;
                self.git(name, Some(dest), &["checkout", hash]).await?;
            }
            _ => {
                let mut args = vec!["clone", "--depth", "1"];
                let clone_ref = reference.clone_ref();
                if let Some(r) = clone_ref {
                    args.push("--branch");
                    args.push(r);
                }
                let dest_str = dest.display().to_string();
                args.push(url);
                args.push(&dest_str);
                self.git(name, None, &args).await?;
            }
        }
        Ok(())
    }

    async fn update_checkout(
        &self,
        name: &str,
        checkout: &Path,
        reference: &GitReference,
    ) -> Result<(), FetchError> {
        tracing::debug!("updating cached checkout for {}", name);

        match reference {
            GitReference::Commit(hash) => {
                self.git(name, Some(checkout), &["fetch", "origin"]).await?;
                self.git(name, Some(checkout), &["checkout", hash]).await?;
            }
            _ => {
                let r = reference.clone_ref().unwrap_or("main");
                self.git(name, Some(checkout), &["fetch", "--depth", "1", "origin", r])
                    .await?;
                self.git(name, Some(checkout), &["checkout", "FETCH_HEAD"])
                    .await?;
            }
        }
        Ok(())
    }

    async fn rev_parse_head(&self, name: &str, checkout: &Path) -> Result<String, FetchError> {
        let output = self
            .git(name, Some(checkout), &["rev-parse", "HEAD"])
            .await?;
        Ok(output.trim().to_string())
    }

    /// Run a git command, surfacing captured output on failure.
    async fn git(
        &self,
        name: &str,
        cwd: Option<&Path>,
        args: &[&str],
    ) -> Result<String, FetchError> {
        let mut cmd = Command::new("git");
        cmd.args(args);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        let output = cmd.output().await.map_err(|e| FetchError::GitFailure {
            name: name.to_string(),
            output: format!("failed to run git: {}", e),
        })?;

        if !output.status.success() {
            let mut combined = String::from_utf8_lossy(&output.stderr).into_owned();
            if combined.is_empty() {
                combined = String::from_utf8_lossy(&output.stdout).into_owned();
            }
            return Err(FetchError::GitFailure {
                name: name.to_string(),
                output: format!("git {} failed: {}", args.join(" "), combined.trim()),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Downloads and extracts registry packages.
pub struct RegistryFetcher {
    cache: HomeCache,
    client: Arc<dyn DependencyHttpClient>,
}

impl RegistryFetcher {
    pub fn new(cache: HomeCache, client: Arc<dyn DependencyHttpClient>) -> Self {
        Self { cache, client }
    }

    pub async fn fetch(
        &self,
        spec: &DepSpec,
        registry_cfg: &RegistryConfig,
    ) -> Result<ResolvedDependency, FetchError> {
        let version = spec.version.as_ref().ok_or(SpecError::MissingSource)?;
        let url = resolve_registry_url(spec.registry.as_deref(), registry_cfg)?;
        let dest = self.cache.registry_package(&spec.name, version);

        if dest.is_dir() {
            tracing::debug!("reusing cached {}@{}", spec.name, version);
        } else {
            self.download_and_extract(&spec.name, version, &url, &dest)
                .await?;
        }

        Ok(ResolvedDependency {
            name: spec.name.clone(),
            version: Some(version.clone()),
            source: ResolvedSource::Registry {
                url,
                version: version.clone(),
            },
            local_path: dest,
        })
    }

    async fn download_and_extract(
        &self,
        name: &str,
        version: &str,
        url: &str,
        dest: &Path,
    ) -> Result<(), FetchError> {
        tracing::info!("downloading {}@{} from {}", name, version, url);

        let bytes = self.client.download_package(url, name, version).await?;

        let tmp_path = self
            .cache
            .registry_dir()
            .join(format!("{}-{}.zip.part", kcjpm_cache::sanitize_name(name), version));
        tokio::fs::write(&tmp_path, &bytes).await?;

        let extract_tmp = tmp_path.clone();
        let extract_dest = dest.to_path_buf();
        let extract_name = name.to_string();
        let result = tokio::task::spawn_blocking(move || {
            extract_zip(&extract_tmp, &extract_dest).map_err(|detail| FetchError::UnpackFailure {
                name: extract_name,
                detail,
            })
        })
        .await
        .map_err(|e| FetchError::DownloadFailure {
            name: name.to_string(),
            detail: format!("extraction task failed: {}", e),
        })?;

        let _ = tokio::fs::remove_file(&tmp_path).await;
        result
    }
}

/// Extract a ZIP archive, preserving directory structure and overwriting
/// existing entries.
fn extract_zip(archive_path: &Path, dest: &Path) -> Result<(), String> {
    let file = std::fs::File::open(archive_path).map_err(|e| e.to_string())?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| e.to_string())?;
    std::fs::create_dir_all(dest).map_err(|e| e.to_string())?;
    archive.extract(dest).map_err(|e| e.to_string())
}

/// The full set of fetchers, dispatched by dependency kind.
pub struct FetcherSet {
    path: PathFetcher,
    git: GitFetcher,
    registry: RegistryFetcher,
}

impl FetcherSet {
    pub fn new(cache: HomeCache, client: Arc<dyn DependencyHttpClient>) -> Self {
        Self {
            path: PathFetcher,
            git: GitFetcher::new(cache.clone()),
            registry: RegistryFetcher::new(cache, client),
        }
    }

    /// Classify a spec and dispatch to the matching fetcher.
    pub async fn fetch(
        &self,
        spec: &DepSpec,
        project_root: &Path,
        registry_cfg: &RegistryConfig,
    ) -> Result<ResolvedDependency, FetchError> {
        match spec.kind()? {
            DependencyKind::Path => self.path.fetch(spec, project_root).await,
            DependencyKind::Git => self.git.fetch(spec).await,
            DependencyKind::Registry => self.registry.fetch(spec, registry_cfg).await,
        }
    }
}
