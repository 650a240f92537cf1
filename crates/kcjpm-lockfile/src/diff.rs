//! Change summaries between two lock files.

use crate::{LockFile, LockedPackage};

/// What changed between an old and a new lock.
#[derive(Debug, Clone, Default)]
pub struct LockfileDiff {
    pub added: Vec<LockedPackage>,
    pub removed: Vec<LockedPackage>,
    pub updated: Vec<LockedPackage>,
    pub unchanged: Vec<LockedPackage>,
}

impl LockfileDiff {
    /// Compare two locks entry by entry.
    pub fn between(old: &LockFile, new: &LockFile) -> Self {
        let mut diff = Self::default();

        for pkg in &new.packages {
            match old.get(&pkg.name) {
                None => diff.added.push(pkg.clone()),
                Some(previous) if previous != pkg => diff.updated.push(pkg.clone()),
                Some(_) => diff.unchanged.push(pkg.clone()),
            }
        }
        for pkg in &old.packages {
            if new.get(&pkg.name).is_none() {
                diff.removed.push(pkg.clone());
            }
        }

        diff
    }

    pub fn has_changes(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty() || !self.updated.is_empty()
    }

    /// Short human summary, e.g. `2 added, 1 updated`.
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if !self.added.is_empty() {
            parts.push(format!("{} added", self.added.len()));
        }
        if !self.updated.is_empty() {
            parts.push(format!("{} updated", self.updated.len()));
        }
        if !self.removed.is_empty() {
            parts.push(format!("{} removed", self.removed.len()));
        }
        if parts.is_empty() {
            "no changes".to_string()
        } else {
            parts.join(", ")
        }
    }
}
