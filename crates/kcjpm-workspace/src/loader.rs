//! Workspace loading and member pattern expansion.

use crate::{Workspace, WorkspaceError, WorkspaceMember};
use kcjpm_manifest::{find_manifest, ManifestError, MANIFEST_FILE_NAME};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Loads workspaces from disk.
#[derive(Default)]
pub struct WorkspaceManager;

impl WorkspaceManager {
    pub fn new() -> Self {
        Self
    }

    /// Load the workspace rooted at `root_path`.
    ///
    /// Member patterns come in three shapes:
    /// - `"."`: the root itself, when it also has a `[package]` section;
    /// - a literal relative path, which must hold a loadable manifest;
    /// - `"dir/*"`: every subdirectory of `dir` with a manifest;
    ///   subdirectories without one are silently skipped.
    pub fn load(&self, root_path: &Path) -> Result<Workspace, WorkspaceError> {
        let root = root_path.canonicalize()?;
        let root_manifest = find_manifest(&root)?;

        let config = root_manifest
            .workspace
            .clone()
            .ok_or_else(|| WorkspaceError::NotAWorkspace(root.join(MANIFEST_FILE_NAME)))?;

        let mut members = Vec::new();
        let mut seen = HashSet::new();

        for pattern in &config.members {
            for dir in self.expand_pattern(&root, &root_manifest, pattern)? {
                let member = self.load_member(&dir)?;
                if !seen.insert(member.name.clone()) {
                    return Err(WorkspaceError::DuplicateMember(member.name));
                }
                members.push(member);
            }
        }

        Ok(Workspace {
            root,
            root_manifest,
            members,
        })
    }

    fn expand_pattern(
        &self,
        root: &Path,
        root_manifest: &kcjpm_types::Manifest,
        pattern: &str,
    ) -> Result<Vec<PathBuf>, WorkspaceError> {
        if pattern == "." {
            if root_manifest.package.is_some() {
                return Ok(vec![root.to_path_buf()]);
            }
            tracing::warn!("member pattern \".\" ignored: the root has no [package] section");
            return Ok(Vec::new());
        }

        if pattern.ends_with("/*") {
            let full_pattern = root.join(pattern).display().to_string();
            let mut dirs: Vec<PathBuf> = glob::glob(&full_pattern)?
                .filter_map(|entry| entry.ok())
                .filter(|p| p.is_dir())
                .filter(|p| p.join(MANIFEST_FILE_NAME).is_file())
                .collect();
            dirs.sort();
            return Ok(dirs);
        }

        let dir = root.join(pattern);
        if !dir.is_dir() {
            return Err(WorkspaceError::MemberNotFound(dir));
        }
        if !dir.join(MANIFEST_FILE_NAME).is_file() {
            return Err(WorkspaceError::Manifest(ManifestError::NotFound(dir)));
        }
        Ok(vec![dir])
    }

    fn load_member(&self, dir: &Path) -> Result<WorkspaceMember, WorkspaceError> {
        let path = dir.canonicalize()?;
        let manifest = find_manifest(&path)?;
        let name = manifest
            .package
            .as_ref()
            .map(|p| p.name.clone())
            .ok_or_else(|| WorkspaceError::MemberNotAPackage(path.join(MANIFEST_FILE_NAME)))?;

        Ok(WorkspaceMember {
            name,
            path,
            manifest,
        })
    }
}
