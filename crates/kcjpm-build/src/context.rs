//! The compilation context threaded through pipeline stages.

use crate::events::{CompilationEvent, EventBus};
use kcjpm_types::{BuildSettings, OutputType, Profile, ResolvedDependency};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Compiler-facing build configuration, derived from the manifest's build
/// settings and the selected profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildConfig {
    /// Target triple; host when unset
    pub target_triple: Option<String>,
    /// Optimization level 0..=3
    pub optimization_level: u8,
    pub debug_info: bool,
    pub lto: bool,
    pub parallel: bool,
    /// Upper bound on concurrently compiling packages
    pub max_parallel: usize,
    pub incremental: bool,
    pub verbose: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            target_triple: None,
            optimization_level: 0,
            debug_info: true,
            lto: false,
            parallel: true,
            max_parallel: default_jobs(),
            incremental: true,
            verbose: false,
        }
    }
}

fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

impl BuildConfig {
    /// Derive a config from manifest build settings and a profile.
    pub fn from_settings(
        settings: &BuildSettings,
        profile: &Profile,
        target_triple: Option<String>,
    ) -> Self {
        let max_parallel = if settings.parallel {
            settings.jobs.filter(|j| *j > 0).unwrap_or_else(default_jobs)
        } else {
            1
        };
        Self {
            target_triple,
            optimization_level: profile.optimization_level,
            debug_info: profile.debug_info,
            lto: profile.lto,
            parallel: settings.parallel,
            max_parallel,
            incremental: settings.incremental,
            verbose: settings.verbose,
        }
    }

    /// SHA-256 over a canonical representation of every field.
    ///
    /// Incremental cache entries are keyed on this, so any config change
    /// invalidates them.
    pub fn hash(&self) -> String {
        let repr = format!(
            "target={:?};opt={};debug={};lto={};parallel={};max={};incremental={};verbose={}",
            self.target_triple,
            self.optimization_level,
            self.debug_info,
            self.lto,
            self.parallel,
            self.max_parallel,
            self.incremental,
            self.verbose,
        );
        kcjpm_cache::sha256_bytes(repr.as_bytes())
    }
}

/// The object threaded through pipeline stages.
///
/// Contexts are immutable by convention: each stage returns a new context or
/// the same one, never mutating shared state.
#[derive(Clone)]
pub struct CompilationContext {
    pub project_root: PathBuf,
    pub build_config: BuildConfig,
    pub output_type: OutputType,
    pub dependencies: Vec<ResolvedDependency>,
    /// `.cj` files to compile; may be empty before discovery
    pub source_files: Vec<PathBuf>,
    pub output_path: PathBuf,
    /// Libraries requested by the build script
    pub link_libraries: Vec<String>,
    /// Include directories requested by the build script
    pub include_dirs: Vec<PathBuf>,
    pub event_sink: Option<Arc<EventBus>>,
}

impl std::fmt::Debug for CompilationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompilationContext")
            .field("project_root", &self.project_root)
            .field("build_config", &self.build_config)
            .field("output_type", &self.output_type)
            .field("dependencies", &self.dependencies.len())
            .field("source_files", &self.source_files.len())
            .field("output_path", &self.output_path)
            .finish()
    }
}

impl CompilationContext {
    pub fn builder(project_root: impl Into<PathBuf>) -> CompilationContextBuilder {
        CompilationContextBuilder::new(project_root)
    }

    /// Emit an event through the sink, when one is attached.
    pub fn emit(&self, event: CompilationEvent) {
        if let Some(bus) = &self.event_sink {
            bus.emit(event);
        }
    }

    /// Directory receiving library artifacts.
    pub fn libs_dir(&self) -> PathBuf {
        self.output_path.join("libs")
    }
}

/// Builder for [`CompilationContext`].
pub struct CompilationContextBuilder {
    project_root: PathBuf,
    build_config: BuildConfig,
    output_type: OutputType,
    dependencies: Vec<ResolvedDependency>,
    source_files: Vec<PathBuf>,
    output_path: Option<PathBuf>,
    link_libraries: Vec<String>,
    include_dirs: Vec<PathBuf>,
    event_sink: Option<Arc<EventBus>>,
}

impl CompilationContextBuilder {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            build_config: BuildConfig::default(),
            output_type: OutputType::default(),
            dependencies: Vec::new(),
            source_files: Vec::new(),
            output_path: None,
            link_libraries: Vec::new(),
            include_dirs: Vec::new(),
            event_sink: None,
        }
    }

    pub fn build_config(mut self, config: BuildConfig) -> Self {
        self.build_config = config;
        self
    }

    pub fn output_type(mut self, output_type: OutputType) -> Self {
        self.output_type = output_type;
        self
    }

    pub fn dependencies(mut self, deps: Vec<ResolvedDependency>) -> Self {
        self.dependencies = deps;
        self
    }

    pub fn source_files(mut self, files: Vec<PathBuf>) -> Self {
        self.source_files = files;
        self
    }

    /// Collect every `.cj` file under a directory, sorted for determinism.
    pub fn source_dir(mut self, dir: &Path) -> Self {
        let mut files: Vec<PathBuf> = walkdir::WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "cj"))
            .collect();
        files.sort();
        self.source_files = files;
        self
    }

    pub fn output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = Some(path.into());
        self
    }

    pub fn link_libraries(mut self, libs: Vec<String>) -> Self {
        self.link_libraries = libs;
        self
    }

    pub fn include_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.include_dirs = dirs;
        self
    }

    pub fn event_sink(mut self, bus: Arc<EventBus>) -> Self {
        self.event_sink = Some(bus);
        self
    }

    pub fn build(self) -> CompilationContext {
        let output_path = self
            .output_path
            .unwrap_or_else(|| self.project_root.join("target"));
        CompilationContext {
            project_root: self.project_root,
            build_config: self.build_config,
            output_type: self.output_type,
            dependencies: self.dependencies,
            source_files: self.source_files,
            output_path,
            link_libraries: self.link_libraries,
            include_dirs: self.include_dirs,
            event_sink: self.event_sink,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kcjpm_types::BuildSettings;

    #[test]
    fn builder_defaults_output_path() {
        let ctx = CompilationContext::builder("/proj").build();
        assert_eq!(ctx.output_path, PathBuf::from("/proj/target"));
        assert_eq!(ctx.libs_dir(), PathBuf::from("/proj/target/libs"));
    }

    #[test]
    fn config_hash_changes_with_fields() {
        let a = BuildConfig::default();
        let mut b = a.clone();
        assert_eq!(a.hash(), b.hash());

        b.optimization_level = 2;
        assert_ne!(a.hash(), b.hash());

        let mut c = a.clone();
        c.target_triple = Some("x86_64-unknown-linux-gnu".to_string());
        assert_ne!(a.hash(), c.hash());
    }

    #[test]
    fn from_settings_honours_parallelism() {
        let mut settings = BuildSettings::default();
        settings.jobs = Some(3);
        let config = BuildConfig::from_settings(&settings, &Profile::release(), None);
        assert_eq!(config.max_parallel, 3);
        assert_eq!(config.optimization_level, 2);

        settings.parallel = false;
        let config = BuildConfig::from_settings(&settings, &Profile::debug(), None);
        assert_eq!(config.max_parallel, 1);
        assert!(config.debug_info);
    }

    #[test]
    fn source_dir_collects_only_cj_files() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        std::fs::create_dir_all(src.join("nested")).unwrap();
        std::fs::write(src.join("b.cj"), "package x").unwrap();
        std::fs::write(src.join("a.cj"), "package x").unwrap();
        std::fs::write(src.join("notes.md"), "ignored").unwrap();
        std::fs::write(src.join("nested").join("c.cj"), "package x.nested").unwrap();

        let ctx = CompilationContext::builder(tmp.path())
            .source_dir(&src)
            .build();
        let names: Vec<_> = ctx
            .source_files
            .iter()
            .map(|p| p.strip_prefix(&src).unwrap().display().to_string())
            .collect();
        assert_eq!(names, vec!["a.cj", "b.cj", "nested/c.cj"]);
    }
}
