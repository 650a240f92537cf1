//! Core types for the kcjpm package manager.
//!
//! This crate defines the fundamental data structures used throughout kcjpm,
//! including manifests, dependency specifications, profiles, and resolved
//! dependencies.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

pub use semver::Version;

/// The default public registry.
pub const DEFAULT_REGISTRY_URL: &str = "https://repo.cangjie-lang.cn";

/// Package metadata from the `[package]` section of a manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageMeta {
    /// Package name
    pub name: String,
    /// Package version
    pub version: Version,
    /// Minimum cjc compiler version required
    #[serde(default)]
    pub cjc_version: Option<String>,
    /// What kind of artifact this package produces
    #[serde(default)]
    pub output_type: OutputType,
    /// Package authors
    #[serde(default)]
    pub authors: Vec<String>,
    /// Package description
    #[serde(default)]
    pub description: Option<String>,
    /// License identifier
    #[serde(default)]
    pub license: Option<String>,
    /// Repository URL
    #[serde(default)]
    pub repository: Option<String>,
}

impl Default for PackageMeta {
    fn default() -> Self {
        Self {
            name: String::new(),
            version: Version::new(0, 1, 0),
            cjc_version: None,
            output_type: OutputType::default(),
            authors: Vec::new(),
            description: None,
            license: None,
            repository: None,
        }
    }
}

/// The kind of artifact a package build produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputType {
    /// A native executable
    #[default]
    Executable,
    /// A library (static by default)
    Library,
    /// A static library archive
    StaticLibrary,
    /// A dynamic library
    DynamicLibrary,
}

impl std::fmt::Display for OutputType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OutputType::Executable => "executable",
            OutputType::Library => "library",
            OutputType::StaticLibrary => "static-library",
            OutputType::DynamicLibrary => "dynamic-library",
        };
        f.write_str(s)
    }
}

/// Errors produced while classifying a dependency specification.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SpecError {
    #[error("dependency must declare one of `path`, `git`, or `version`")]
    MissingSource,
    #[error("git dependency may set at most one of `tag`, `branch`, `commit`")]
    AmbiguousGitReference,
}

/// A dependency specification from the `[dependencies]` section.
///
/// Exactly one of `path`, `git`, or `version` determines the kind; the
/// classification order is path, then git, then version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepSpec {
    /// Dependency name
    pub name: String,
    /// Exact version (registry deps; optional overlay for path deps)
    pub version: Option<String>,
    /// Local path relative to the declaring manifest
    pub path: Option<PathBuf>,
    /// Git repository URL
    pub git: Option<String>,
    /// Git tag
    pub tag: Option<String>,
    /// Git branch
    pub branch: Option<String>,
    /// Git commit hash
    pub commit: Option<String>,
    /// Registry name or URL (`default`, `private`, or a literal URL)
    pub registry: Option<String>,
    /// Optional dependencies are skipped by the resolver
    #[serde(default)]
    pub optional: bool,
}

impl DepSpec {
    /// Create a new registry dependency pinned to a version.
    pub fn registry(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: Some(version.into()),
            path: None,
            git: None,
            tag: None,
            branch: None,
            commit: None,
            registry: None,
            optional: false,
        }
    }

    /// Create a new git dependency.
    pub fn git(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            path: None,
            git: Some(url.into()),
            tag: None,
            branch: None,
            commit: None,
            registry: None,
            optional: false,
        }
    }

    /// Create a new path dependency.
    pub fn path(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            version: None,
            path: Some(path.into()),
            git: None,
            tag: None,
            branch: None,
            commit: None,
            registry: None,
            optional: false,
        }
    }

    /// Set the git tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Set the git branch.
    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    /// Set the git commit.
    pub fn with_commit(mut self, commit: impl Into<String>) -> Self {
        self.commit = Some(commit.into());
        self
    }

    /// Classify this spec into its dependency kind.
    ///
    /// Classification order: `path`, then `git`, then `version`. A spec with
    /// none of the three is invalid, as is a git spec with more than one of
    /// tag/branch/commit.
    pub fn kind(&self) -> Result<DependencyKind, SpecError> {
        if self.path.is_some() {
            Ok(DependencyKind::Path)
        } else if self.git.is_some() {
            let refs = [&self.tag, &self.branch, &self.commit]
                .iter()
                .filter(|r| r.is_some())
                .count();
            if refs > 1 {
                Err(SpecError::AmbiguousGitReference)
            } else {
                Ok(DependencyKind::Git)
            }
        } else if self.version.is_some() {
            Ok(DependencyKind::Registry)
        } else {
            Err(SpecError::MissingSource)
        }
    }

    /// The git reference this spec selects. Meaningful only for git specs.
    pub fn git_reference(&self) -> GitReference {
        if let Some(tag) = &self.tag {
            GitReference::Tag(tag.clone())
        } else if let Some(branch) = &self.branch {
            GitReference::Branch(branch.clone())
        } else if let Some(commit) = &self.commit {
            GitReference::Commit(commit.clone())
        } else {
            GitReference::DefaultBranch
        }
    }
}

/// The source kind of a dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyKind {
    /// From a local path
    Path,
    /// From a git repository
    Git,
    /// From a package registry
    Registry,
}

/// A reference into a git repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "value")]
pub enum GitReference {
    Tag(String),
    Branch(String),
    Commit(String),
    /// No explicit reference; resolves to branch `main`.
    DefaultBranch,
}

impl GitReference {
    /// The branch or tag name usable with `git clone --branch`, if any.
    pub fn clone_ref(&self) -> Option<&str> {
        match self {
            GitReference::Tag(t) => Some(t),
            GitReference::Branch(b) => Some(b),
            GitReference::DefaultBranch => Some("main"),
            GitReference::Commit(_) => None,
        }
    }

    /// The commit hash, when this reference pins one.
    pub fn commit(&self) -> Option<&str> {
        match self {
            GitReference::Commit(c) => Some(c),
            _ => None,
        }
    }
}

/// Registry configuration from the `[registry]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Default registry URL; falls back to [`DEFAULT_REGISTRY_URL`]
    #[serde(default)]
    pub default: Option<String>,
    /// Mirror URLs
    #[serde(default)]
    pub mirrors: Vec<String>,
    /// Private registry URL
    #[serde(default)]
    pub private_url: Option<String>,
    /// Private registry credentials
    #[serde(default)]
    pub private_username: Option<String>,
    #[serde(default)]
    pub private_token: Option<String>,
}

/// A named compile-option bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Optimization level, 0 through 3
    #[serde(default)]
    pub optimization_level: u8,
    /// Emit debug info
    #[serde(default)]
    pub debug_info: bool,
    /// Enable link-time optimization
    #[serde(default)]
    pub lto: bool,
}

impl Profile {
    pub fn debug() -> Self {
        Self {
            optimization_level: 0,
            debug_info: true,
            lto: false,
        }
    }

    pub fn release() -> Self {
        Self {
            optimization_level: 2,
            debug_info: false,
            lto: false,
        }
    }

    pub fn release_lto() -> Self {
        Self {
            optimization_level: 3,
            debug_info: false,
            lto: true,
        }
    }

    /// Look up a well-known profile by name.
    pub fn well_known(name: &str) -> Option<Self> {
        match name {
            "debug" => Some(Self::debug()),
            "release" => Some(Self::release()),
            "release-lto" => Some(Self::release_lto()),
            _ => None,
        }
    }
}

/// Per-target compiler and linker flags from `[build.target.<triple>]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetFlags {
    #[serde(default)]
    pub compiler_flags: Vec<String>,
    #[serde(default)]
    pub linker_flags: Vec<String>,
}

/// FFI settings from `[build.ffi]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FfiSettings {
    #[serde(default)]
    pub include_dirs: Vec<PathBuf>,
    #[serde(default)]
    pub link_libs: Vec<String>,
}

/// Build settings from the `[build]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildSettings {
    /// Directory holding sources, relative to the project root
    pub source_dir: PathBuf,
    /// Directory receiving build output
    pub output_dir: PathBuf,
    /// Directory holding tests
    #[serde(default)]
    pub test_dir: Option<PathBuf>,
    /// Compile packages in parallel
    pub parallel: bool,
    /// Explicit job count; defaults to available parallelism
    #[serde(default)]
    pub jobs: Option<usize>,
    /// Reuse unchanged package artifacts
    pub incremental: bool,
    /// Echo raw compiler output
    #[serde(default)]
    pub verbose: bool,
    /// Commands run before the build
    #[serde(default)]
    pub pre_build: Vec<String>,
    /// Commands run after the build
    #[serde(default)]
    pub post_build: Vec<String>,
    /// Per-target flag lists
    #[serde(default)]
    pub target: BTreeMap<String, TargetFlags>,
    /// FFI configuration
    #[serde(default)]
    pub ffi: Option<FfiSettings>,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("src"),
            output_dir: PathBuf::from("target"),
            test_dir: None,
            parallel: true,
            jobs: None,
            incremental: true,
            verbose: false,
            pre_build: Vec::new(),
            post_build: Vec::new(),
            target: BTreeMap::new(),
            ffi: None,
        }
    }
}

/// Workspace configuration from the `[workspace]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Member path patterns: `"."`, a literal relative path, or `"dir/*"`
    #[serde(default)]
    pub members: Vec<String>,
    /// Member names built by default; all members when empty
    #[serde(default)]
    pub default_members: Vec<String>,
}

/// A complete parsed manifest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    /// Package metadata; absent for pure workspace manifests
    pub package: Option<PackageMeta>,
    /// Declared dependencies, keyed by name
    #[serde(default)]
    pub dependencies: BTreeMap<String, DepSpec>,
    /// Registry configuration
    #[serde(default)]
    pub registry: RegistryConfig,
    /// Build settings
    #[serde(default)]
    pub build: BuildSettings,
    /// Workspace configuration, when this manifest roots one
    #[serde(default)]
    pub workspace: Option<WorkspaceConfig>,
    /// Named profiles; well-known profiles are synthesised when absent
    #[serde(default)]
    pub profiles: BTreeMap<String, Profile>,
}

impl Manifest {
    /// A workspace manifest with no package of its own.
    pub fn is_virtual_workspace(&self) -> bool {
        self.workspace.is_some() && self.package.is_none()
    }

    /// A manifest that is both a package and a workspace root.
    pub fn is_mixed_workspace(&self) -> bool {
        self.workspace.is_some() && self.package.is_some()
    }

    /// Look up a profile, synthesising well-known ones.
    pub fn profile(&self, name: &str) -> Option<Profile> {
        self.profiles
            .get(name)
            .cloned()
            .or_else(|| Profile::well_known(name))
    }
}

/// A dependency materialised on the local filesystem.
///
/// Produced by fetchers, consumed by the compilation pipeline and the lock
/// generator. Never mutated after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDependency {
    /// Package name
    pub name: String,
    /// Declared or inferred version
    pub version: Option<String>,
    /// Where the dependency came from
    pub source: ResolvedSource,
    /// Directory holding the fetched content
    pub local_path: PathBuf,
}

/// The concrete source a dependency was resolved from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedSource {
    Path {
        /// Path as declared in the manifest
        path: PathBuf,
    },
    Git {
        url: String,
        reference: GitReference,
        /// Commit hash the checkout resolved to
        commit: Option<String>,
    },
    Registry {
        url: String,
        version: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depspec_classification_order() {
        let mut spec = DepSpec::path("core", "../core");
        spec.git = Some("https://example.org/core.git".to_string());
        spec.version = Some("1.0.0".to_string());
        // path wins over git and version
        assert_eq!(spec.kind().unwrap(), DependencyKind::Path);

        let spec = DepSpec::git("http", "https://ex.org/h.git").with_tag("v1.0.0");
        assert_eq!(spec.kind().unwrap(), DependencyKind::Git);

        let spec = DepSpec::registry("utils", "0.3.0");
        assert_eq!(spec.kind().unwrap(), DependencyKind::Registry);
    }

    #[test]
    fn depspec_without_source_is_invalid() {
        let spec = DepSpec {
            name: "broken".to_string(),
            version: None,
            path: None,
            git: None,
            tag: None,
            branch: None,
            commit: None,
            registry: None,
            optional: false,
        };
        assert_eq!(spec.kind().unwrap_err(), SpecError::MissingSource);
    }

    #[test]
    fn git_spec_with_two_refs_is_invalid() {
        let spec = DepSpec::git("h", "https://ex.org/h.git")
            .with_tag("v1")
            .with_branch("main");
        assert_eq!(spec.kind().unwrap_err(), SpecError::AmbiguousGitReference);
    }

    #[test]
    fn git_reference_defaults_to_main() {
        let spec = DepSpec::git("h", "https://ex.org/h.git");
        assert_eq!(spec.git_reference(), GitReference::DefaultBranch);
        assert_eq!(spec.git_reference().clone_ref(), Some("main"));
    }

    #[test]
    fn well_known_profiles() {
        assert_eq!(Profile::well_known("debug").unwrap().optimization_level, 0);
        assert_eq!(
            Profile::well_known("release").unwrap().optimization_level,
            2
        );
        let lto = Profile::well_known("release-lto").unwrap();
        assert!(lto.lto);
        assert_eq!(lto.optimization_level, 3);
        assert!(Profile::well_known("bench").is_none());
    }

    #[test]
    fn workspace_flavours() {
        let mut m = Manifest {
            workspace: Some(WorkspaceConfig::default()),
            ..Default::default()
        };
        assert!(m.is_virtual_workspace());
        assert!(!m.is_mixed_workspace());

        m.package = Some(PackageMeta {
            name: "root".to_string(),
            ..Default::default()
        });
        assert!(m.is_mixed_workspace());
        assert!(!m.is_virtual_workspace());
    }

    #[test]
    fn build_settings_defaults() {
        let b = BuildSettings::default();
        assert_eq!(b.source_dir, PathBuf::from("src"));
        assert_eq!(b.output_dir, PathBuf::from("target"));
        assert!(b.parallel);
        assert!(b.incremental);
    }
}
