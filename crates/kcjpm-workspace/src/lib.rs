//! Workspace coordination for kcjpm.
//!
//! A workspace groups sibling packages (members) under one root manifest.
//! Loading expands member patterns, the graph derives build edges from
//! path dependencies between members, and the coordinator schedules member
//! builds in topological order with dependency-respecting parallelism.

mod coordinator;
mod graph;
mod loader;

pub use coordinator::{MemberBuildResult, WorkspaceBuildReport, WorkspaceCoordinator};
pub use graph::WorkspaceGraph;
pub use loader::WorkspaceManager;

use kcjpm_manifest::ManifestError;
use kcjpm_types::Manifest;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkspaceError {
    #[error("no [workspace] section in the manifest at {0}")]
    NotAWorkspace(PathBuf),
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error("workspace member path does not exist: {0}")]
    MemberNotFound(PathBuf),
    #[error("member manifest at {0} has no [package] section")]
    MemberNotAPackage(PathBuf),
    #[error("duplicate workspace member name `{0}`")]
    DuplicateMember(String),
    #[error("member `{0}` is not part of this workspace")]
    UnknownMember(String),
    #[error("cycle detected in workspace dependencies: {}", render_cycles(cycles))]
    Cycle { cycles: Vec<Vec<String>> },
    #[error("invalid member pattern: {0}")]
    Pattern(#[from] glob::PatternError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn render_cycles(cycles: &[Vec<String>]) -> String {
    cycles
        .iter()
        .map(|c| c.join(" -> "))
        .collect::<Vec<_>>()
        .join("; ")
}

/// A single package participating in a workspace.
#[derive(Debug, Clone)]
pub struct WorkspaceMember {
    /// Package name from the member's manifest
    pub name: String,
    /// Canonical member directory
    pub path: PathBuf,
    /// The member's parsed manifest
    pub manifest: Manifest,
}

/// A loaded workspace.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub root: PathBuf,
    pub root_manifest: Manifest,
    pub members: Vec<WorkspaceMember>,
}

impl Workspace {
    /// Workspace whose root is not itself a package.
    pub fn is_virtual(&self) -> bool {
        self.root_manifest.package.is_none()
    }

    /// Workspace whose root is also a member package.
    pub fn is_mixed(&self) -> bool {
        self.root_manifest.package.is_some()
    }

    pub fn get_member(&self, name: &str) -> Option<&WorkspaceMember> {
        self.members.iter().find(|m| m.name == name)
    }

    pub fn member_names(&self) -> Vec<&str> {
        self.members.iter().map(|m| m.name.as_str()).collect()
    }

    /// Members selected by `default-members`, or all when unset.
    pub fn default_members(&self) -> Vec<&WorkspaceMember> {
        let defaults = self
            .root_manifest
            .workspace
            .as_ref()
            .map(|w| w.default_members.as_slice())
            .unwrap_or(&[]);
        if defaults.is_empty() {
            self.members.iter().collect()
        } else {
            self.members
                .iter()
                .filter(|m| defaults.iter().any(|d| d == &m.name))
                .collect()
        }
    }
}
