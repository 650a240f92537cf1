//! Manifest parsing for kcjpm.
//!
//! Reads `cjpm.toml` into the typed [`Manifest`] model, handling the
//! `foo = "1.2.0"` dependency shorthand and per-section validation.

use kcjpm_types::{
    BuildSettings, DepSpec, FfiSettings, Manifest, OutputType, PackageMeta, Profile,
    RegistryConfig, TargetFlags, Version, WorkspaceConfig,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// The manifest file name looked up in every project directory.
pub const MANIFEST_FILE_NAME: &str = "cjpm.toml";

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("manifest not found in {0}")]
    NotFound(PathBuf),
    #[error("failed to read manifest: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("failed to parse TOML: {0}")]
    TomlError(#[from] toml::de::Error),
    #[error("invalid manifest: {0}")]
    ValidationError(String),
}

/// Locate and load the manifest of a project directory.
pub fn find_manifest(dir: &Path) -> Result<Manifest, ManifestError> {
    let path = dir.join(MANIFEST_FILE_NAME);
    if !path.exists() {
        return Err(ManifestError::NotFound(dir.to_path_buf()));
    }
    load_manifest(&path)
}

/// Load and parse a manifest file.
pub fn load_manifest(path: &Path) -> Result<Manifest, ManifestError> {
    let content = std::fs::read_to_string(path)?;
    parse_manifest_str(&content)
}

/// Raw TOML structure for cjpm.toml
#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawManifest {
    #[serde(default)]
    package: Option<RawPackage>,
    #[serde(default)]
    registry: Option<RawRegistry>,
    #[serde(default)]
    dependencies: BTreeMap<String, RawDependency>,
    #[serde(default)]
    build: Option<RawBuild>,
    #[serde(default)]
    workspace: Option<RawWorkspace>,
    #[serde(default, rename = "profile")]
    profiles: BTreeMap<String, RawProfile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawPackage {
    name: String,
    version: String,
    #[serde(default)]
    cjc_version: Option<String>,
    #[serde(default)]
    output_type: Option<String>,
    #[serde(default)]
    authors: Vec<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    license: Option<String>,
    #[serde(default)]
    repository: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawRegistry {
    #[serde(default)]
    default: Option<String>,
    #[serde(default)]
    mirrors: Vec<String>,
    #[serde(default)]
    private_url: Option<String>,
    #[serde(default)]
    private_username: Option<String>,
    #[serde(default)]
    private_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawDependency {
    /// Shorthand version string: `foo = "1.2.0"`
    Version(String),
    /// Full dependency specification
    Full {
        #[serde(default)]
        version: Option<String>,
        #[serde(default)]
        path: Option<PathBuf>,
        #[serde(default)]
        git: Option<String>,
        #[serde(default)]
        tag: Option<String>,
        #[serde(default)]
        branch: Option<String>,
        #[serde(default)]
        commit: Option<String>,
        #[serde(default)]
        registry: Option<String>,
        #[serde(default)]
        optional: bool,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawBuild {
    #[serde(default)]
    source_dir: Option<PathBuf>,
    #[serde(default)]
    output_dir: Option<PathBuf>,
    #[serde(default)]
    test_dir: Option<PathBuf>,
    #[serde(default)]
    parallel: Option<bool>,
    #[serde(default)]
    jobs: Option<usize>,
    #[serde(default)]
    incremental: Option<bool>,
    #[serde(default)]
    verbose: Option<bool>,
    #[serde(default)]
    pre_build: Vec<String>,
    #[serde(default)]
    post_build: Vec<String>,
    #[serde(default)]
    target: BTreeMap<String, RawTargetFlags>,
    #[serde(default)]
    ffi: Option<RawFfi>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawTargetFlags {
    #[serde(default)]
    compiler_flags: Vec<String>,
    #[serde(default)]
    linker_flags: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawFfi {
    #[serde(default)]
    include_dirs: Vec<PathBuf>,
    #[serde(default)]
    link_libs: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawWorkspace {
    #[serde(default)]
    members: Vec<String>,
    #[serde(default)]
    default_members: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawProfile {
    #[serde(default)]
    optimization_level: Option<u8>,
    #[serde(default)]
    debug_info: Option<bool>,
    #[serde(default)]
    lto: Option<bool>,
}

/// Parse manifest TOML content.
pub fn parse_manifest_str(content: &str) -> Result<Manifest, ManifestError> {
    let raw: RawManifest = toml::from_str(content)?;

    if raw.package.is_none() && raw.workspace.is_none() {
        return Err(ManifestError::ValidationError(
            "manifest declares neither [package] nor [workspace]".to_string(),
        ));
    }

    let package = raw.package.map(convert_package).transpose()?;

    let dependencies = raw
        .dependencies
        .into_iter()
        .map(|(name, raw_dep)| {
            let dep = convert_dependency(&name, raw_dep)?;
            Ok((name, dep))
        })
        .collect::<Result<BTreeMap<_, _>, ManifestError>>()?;

    let registry = raw
        .registry
        .map(|r| RegistryConfig {
            default: r.default,
            mirrors: r.mirrors,
            private_url: r.private_url,
            private_username: r.private_username,
            private_token: r.private_token,
        })
        .unwrap_or_default();

    let build = raw.build.map(convert_build).unwrap_or_default();

    let workspace = raw.workspace.map(|w| WorkspaceConfig {
        members: w.members,
        default_members: w.default_members,
    });

    let profiles = raw
        .profiles
        .into_iter()
        .map(|(name, raw_profile)| {
            let profile = convert_profile(&name, raw_profile)?;
            Ok((name, profile))
        })
        .collect::<Result<BTreeMap<_, _>, ManifestError>>()?;

    Ok(Manifest {
        package,
        dependencies,
        registry,
        build,
        workspace,
        profiles,
    })
}

fn convert_package(raw: RawPackage) -> Result<PackageMeta, ManifestError> {
    let version = Version::parse(&raw.version).map_err(|e| {
        ManifestError::ValidationError(format!("invalid version `{}`: {}", raw.version, e))
    })?;

    let output_type = match raw.output_type.as_deref() {
        None => OutputType::default(),
        Some("executable") => OutputType::Executable,
        Some("library") => OutputType::Library,
        Some("static-library") => OutputType::StaticLibrary,
        Some("dynamic-library") => OutputType::DynamicLibrary,
        Some(other) => {
            return Err(ManifestError::ValidationError(format!(
                "unknown output-type: {}",
                other
            )))
        }
    };

    Ok(PackageMeta {
        name: raw.name,
        version,
        cjc_version: raw.cjc_version,
        output_type,
        authors: raw.authors,
        description: raw.description,
        license: raw.license,
        repository: raw.repository,
    })
}

fn convert_dependency(name: &str, raw: RawDependency) -> Result<DepSpec, ManifestError> {
    let spec = match raw {
        RawDependency::Version(v) => DepSpec::registry(name, v),
        RawDependency::Full {
            version,
            path,
            git,
            tag,
            branch,
            commit,
            registry,
            optional,
        } => DepSpec {
            name: name.to_string(),
            version,
            path,
            git,
            tag,
            branch,
            commit,
            registry,
            optional,
        },
    };

    // Surface malformed specs at parse time rather than mid-resolve.
    spec.kind().map_err(|e| {
        ManifestError::ValidationError(format!("dependency `{}`: {}", name, e))
    })?;

    Ok(spec)
}

fn convert_build(raw: RawBuild) -> BuildSettings {
    let defaults = BuildSettings::default();
    BuildSettings {
        source_dir: raw.source_dir.unwrap_or(defaults.source_dir),
        output_dir: raw.output_dir.unwrap_or(defaults.output_dir),
        test_dir: raw.test_dir,
        parallel: raw.parallel.unwrap_or(defaults.parallel),
        jobs: raw.jobs,
        incremental: raw.incremental.unwrap_or(defaults.incremental),
        verbose: raw.verbose.unwrap_or(false),
        pre_build: raw.pre_build,
        post_build: raw.post_build,
        target: raw
            .target
            .into_iter()
            .map(|(triple, flags)| {
                (
                    triple,
                    TargetFlags {
                        compiler_flags: flags.compiler_flags,
                        linker_flags: flags.linker_flags,
                    },
                )
            })
            .collect(),
        ffi: raw.ffi.map(|f| FfiSettings {
            include_dirs: f.include_dirs,
            link_libs: f.link_libs,
        }),
    }
}

fn convert_profile(name: &str, raw: RawProfile) -> Result<Profile, ManifestError> {
    let base = Profile::well_known(name).unwrap_or_else(Profile::debug);
    let optimization_level = raw.optimization_level.unwrap_or(base.optimization_level);
    if optimization_level > 3 {
        return Err(ManifestError::ValidationError(format!(
            "profile `{}`: optimization-level must be 0..3, got {}",
            name, optimization_level
        )));
    }
    Ok(Profile {
        optimization_level,
        debug_info: raw.debug_info.unwrap_or(base.debug_info),
        lto: raw.lto.unwrap_or(base.lto),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kcjpm_types::DependencyKind;

    #[test]
    fn parse_minimal_package() {
        let manifest = parse_manifest_str(
            r#"
[package]
name = "demo"
version = "0.1.0"
"#,
        )
        .unwrap();
        let pkg = manifest.package.unwrap();
        assert_eq!(pkg.name, "demo");
        assert_eq!(pkg.version, Version::new(0, 1, 0));
        assert_eq!(pkg.output_type, OutputType::Executable);
    }

    #[test]
    fn parse_dependency_shorthand() {
        let manifest = parse_manifest_str(
            r#"
[package]
name = "demo"
version = "0.1.0"

[dependencies]
utils = "0.3.0"
"#,
        )
        .unwrap();
        let dep = &manifest.dependencies["utils"];
        assert_eq!(dep.version.as_deref(), Some("0.3.0"));
        assert_eq!(dep.kind().unwrap(), DependencyKind::Registry);
    }

    #[test]
    fn parse_full_dependencies() {
        let manifest = parse_manifest_str(
            r#"
[package]
name = "demo"
version = "0.1.0"

[dependencies]
core = { path = "../core" }
http = { git = "https://ex.org/h.git", tag = "v1.0.0" }
hidden = { version = "1.0.0", optional = true }
"#,
        )
        .unwrap();
        assert_eq!(
            manifest.dependencies["core"].kind().unwrap(),
            DependencyKind::Path
        );
        assert_eq!(
            manifest.dependencies["http"].kind().unwrap(),
            DependencyKind::Git
        );
        assert_eq!(
            manifest.dependencies["http"].tag.as_deref(),
            Some("v1.0.0")
        );
        assert!(manifest.dependencies["hidden"].optional);
    }

    #[test]
    fn dependency_without_source_rejected() {
        let err = parse_manifest_str(
            r#"
[package]
name = "demo"
version = "0.1.0"

[dependencies]
broken = { optional = true }
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ManifestError::ValidationError(_)));
    }

    #[test]
    fn git_dependency_with_two_refs_rejected() {
        let err = parse_manifest_str(
            r#"
[package]
name = "demo"
version = "0.1.0"

[dependencies]
h = { git = "https://ex.org/h.git", tag = "v1", branch = "main" }
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ManifestError::ValidationError(_)));
    }

    #[test]
    fn parse_build_section() {
        let manifest = parse_manifest_str(
            r#"
[package]
name = "demo"
version = "0.1.0"

[build]
source-dir = "sources"
parallel = false
jobs = 4
incremental = false

[build.target.x86_64-unknown-linux-gnu]
compiler-flags = ["--fast-math"]
linker-flags = ["-lm"]

[build.ffi]
link-libs = ["ssl"]
"#,
        )
        .unwrap();
        let build = &manifest.build;
        assert_eq!(build.source_dir, PathBuf::from("sources"));
        assert!(!build.parallel);
        assert_eq!(build.jobs, Some(4));
        assert!(!build.incremental);
        assert_eq!(
            build.target["x86_64-unknown-linux-gnu"].compiler_flags,
            vec!["--fast-math"]
        );
        assert_eq!(build.ffi.as_ref().unwrap().link_libs, vec!["ssl"]);
    }

    #[test]
    fn parse_registry_section() {
        let manifest = parse_manifest_str(
            r#"
[package]
name = "demo"
version = "0.1.0"

[registry]
default = "https://mirror.example.org"
mirrors = ["https://m1.example.org"]
private-url = "https://private.example.org"
private-token = "secret"
"#,
        )
        .unwrap();
        let reg = &manifest.registry;
        assert_eq!(reg.default.as_deref(), Some("https://mirror.example.org"));
        assert_eq!(reg.mirrors.len(), 1);
        assert_eq!(reg.private_token.as_deref(), Some("secret"));
    }

    #[test]
    fn parse_profiles() {
        let manifest = parse_manifest_str(
            r#"
[package]
name = "demo"
version = "0.1.0"

[profile.release]
lto = true

[profile.bench]
optimization-level = 3
"#,
        )
        .unwrap();
        // explicit release keeps its O2 base and gains lto
        let release = &manifest.profiles["release"];
        assert_eq!(release.optimization_level, 2);
        assert!(release.lto);
        assert_eq!(manifest.profiles["bench"].optimization_level, 3);
        // well-known debug is still reachable without being declared
        assert_eq!(manifest.profile("debug").unwrap().optimization_level, 0);
    }

    #[test]
    fn profile_level_out_of_range_rejected() {
        let err = parse_manifest_str(
            r#"
[package]
name = "demo"
version = "0.1.0"

[profile.hot]
optimization-level = 9
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ManifestError::ValidationError(_)));
    }

    #[test]
    fn parse_virtual_workspace() {
        let manifest = parse_manifest_str(
            r#"
[workspace]
members = [".", "crates/*", "tools/gen"]
default-members = ["core"]
"#,
        )
        .unwrap();
        assert!(manifest.is_virtual_workspace());
        let ws = manifest.workspace.unwrap();
        assert_eq!(ws.members, vec![".", "crates/*", "tools/gen"]);
        assert_eq!(ws.default_members, vec!["core"]);
    }

    #[test]
    fn manifest_without_package_or_workspace_rejected() {
        let err = parse_manifest_str("[dependencies]\nfoo = \"1.0.0\"\n").unwrap_err();
        assert!(matches!(err, ManifestError::ValidationError(_)));
    }

    #[test]
    fn find_manifest_in_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(MANIFEST_FILE_NAME),
            "[package]\nname = \"x\"\nversion = \"1.0.0\"\n",
        )
        .unwrap();
        let manifest = find_manifest(dir.path()).unwrap();
        assert_eq!(manifest.package.unwrap().name, "x");

        let missing = tempfile::tempdir().unwrap();
        assert!(matches!(
            find_manifest(missing.path()),
            Err(ManifestError::NotFound(_))
        ));
    }
}
