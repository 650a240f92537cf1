//! Compilation pipeline for kcjpm.
//!
//! A build is an ordered list of stages threaded through an immutable
//! [`CompilationContext`]: validation, dependency resolution, and package
//! compilation. The reference compiler links executables itself, so there is
//! no separate linking stage.
//!
//! Supporting subsystems live alongside the pipeline: source package
//! discovery, the compiler diagnostic parser, the event bus, the build
//! script runner, and the project cleaner.

mod build_script;
mod clean;
mod compiler;
mod context;
mod diagnostics;
mod discovery;
mod events;
mod pipeline;
mod report;

pub use build_script::{
    BuildScriptDirectives, BuildScriptRunner, Directive, BUILD_SCRIPT_NAME,
};
pub use clean::{clean_project, CleanOptions, CleanReport};
pub use compiler::{execute_compiler, ArtifactKind, CjcCommand, CompileOutcome};
pub use context::{BuildConfig, CompilationContext, CompilationContextBuilder};
pub use diagnostics::{Diagnostic, DiagnosticParser, ParseEvent, Severity};
pub use discovery::{discover_packages, extract_package_name, package_has_main, PackageInfo};
pub use events::{CollectingObserver, CompilationEvent, EventBus, EventObserver};
pub use pipeline::{
    CompilationPipeline, DependencyResolutionStage, PackageCompilationStage, Stage,
    ValidationStage,
};
pub use report::{CompilationReport, PackageBuildReport};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("compilation of package `{package}` failed:\n{message}")]
    PackageCompileFailed {
        package: String,
        message: String,
        diagnostics: Vec<Diagnostic>,
    },
    #[error("build script failed: {0}")]
    BuildScript(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
