//! Rich error rendering for the kcjpm CLI.
//!
//! Wraps the per-subsystem errors into one miette-aware enum so failures
//! carry codes and actionable help text.

pub use miette::{Diagnostic, Report, Result};
use thiserror::Error;

/// A kcjpm error with rich diagnostics.
#[derive(Error, Diagnostic, Debug)]
pub enum KcjpmError {
    #[error("manifest not found")]
    #[diagnostic(
        code(kcjpm::manifest::not_found),
        help("Create a cjpm.toml in your project root, or run `kcjpm init`")
    )]
    ManifestNotFound,

    #[error("failed to parse manifest: {message}")]
    #[diagnostic(code(kcjpm::manifest::parse_error))]
    ManifestParseError { message: String },

    #[error("dependency `{name}` not found")]
    #[diagnostic(
        code(kcjpm::resolve::not_found),
        help("Check the dependency's path, git URL, or registry version")
    )]
    DependencyNotFound { name: String },

    #[error("version conflict for `{package}`")]
    #[diagnostic(
        code(kcjpm::resolve::version_conflict),
        help("Conflicting versions: {}", versions.join(", "))
    )]
    VersionConflict {
        package: String,
        versions: Vec<String>,
    },

    #[error("lock file is invalid")]
    #[diagnostic(
        code(kcjpm::lock::invalid),
        help("Run `kcjpm update` to regenerate kcjpm.lock")
    )]
    LockInvalid { details: String },

    #[error("compilation failed for package `{package}`")]
    #[diagnostic(code(kcjpm::build::compile_failed))]
    CompileFailed { package: String, details: String },

    #[error("build script failed")]
    #[diagnostic(code(kcjpm::build::script_failed))]
    BuildScriptFailed { details: String },

    #[error("workspace dependency cycle")]
    #[diagnostic(
        code(kcjpm::workspace::cycle),
        help("Break the cycle between: {}", cycle.join(" -> "))
    )]
    WorkspaceCycle { cycle: Vec<String> },

    #[error("Cangjie SDK not found")]
    #[diagnostic(
        code(kcjpm::platform::no_sdk),
        help("Set CANGJIE_HOME or add cjc to your PATH")
    )]
    SdkNotFound,

    #[error("network error: {message}")]
    #[diagnostic(
        code(kcjpm::network::error),
        help("Check your internet connection and registry configuration")
    )]
    NetworkError { message: String },

    #[error("{0}")]
    #[diagnostic(code(kcjpm::generic))]
    Generic(String),
}

impl KcjpmError {
    pub fn manifest_parse(message: impl Into<String>) -> Self {
        Self::ManifestParseError {
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError {
            message: message.into(),
        }
    }
}

/// Install the miette handler used for pretty terminal output.
pub fn setup() {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(2)
                .tab_width(4)
                .build(),
        )
    }))
    .ok();
}
