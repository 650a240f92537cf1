//! Accumulated per-package build results.

use crate::diagnostics::Diagnostic;
use std::path::PathBuf;

/// Result of building (or reusing) one package.
#[derive(Debug, Clone)]
pub struct PackageBuildReport {
    pub name: String,
    pub success: bool,
    pub artifact: Option<PathBuf>,
    pub diagnostics: Vec<Diagnostic>,
    /// Artifact came from the incremental cache
    pub reused: bool,
}

/// Everything a pipeline run produced, keyed by package.
#[derive(Debug, Clone, Default)]
pub struct CompilationReport {
    pub packages: Vec<PackageBuildReport>,
}

impl CompilationReport {
    pub fn record(&mut self, package: PackageBuildReport) {
        self.packages.push(package);
    }

    /// All packages succeeded.
    pub fn is_success(&self) -> bool {
        self.packages.iter().all(|p| p.success)
    }

    /// Paths of every produced or reused artifact.
    pub fn artifacts(&self) -> Vec<PathBuf> {
        self.packages
            .iter()
            .filter_map(|p| p.artifact.clone())
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<&PackageBuildReport> {
        self.packages.iter().find(|p| p.name == name)
    }
}
