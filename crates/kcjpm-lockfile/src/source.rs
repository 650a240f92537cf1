//! The lock file source-string grammar.
//!
//! ```text
//! registry+<url>
//! path+<relative-path>
//! git+<url>[?tag=<t>|branch=<b>|commit=<h>]#<resolved-commit>
//! ```

use crate::LockError;
use kcjpm_types::{GitReference, ResolvedSource};
use std::path::PathBuf;

/// A parsed lock source string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockedSource {
    Registry {
        url: String,
    },
    Path {
        path: PathBuf,
    },
    Git {
        url: String,
        reference: GitReference,
        commit: String,
    },
}

/// Format a resolved source into its lock string.
pub fn format_source(source: &ResolvedSource) -> String {
    match source {
        ResolvedSource::Registry { url, .. } => format!("registry+{}", url),
        ResolvedSource::Path { path } => format!("path+{}", path.display()),
        ResolvedSource::Git {
            url,
            reference,
            commit,
        } => {
            let query = match reference {
                GitReference::Tag(t) => format!("?tag={}", t),
                GitReference::Branch(b) => format!("?branch={}", b),
                GitReference::Commit(c) => format!("?commit={}", c),
                GitReference::DefaultBranch => String::new(),
            };
            let resolved = commit
                .as_deref()
                .or_else(|| reference.commit())
                .unwrap_or("HEAD");
            format!("git+{}{}#{}", url, query, resolved)
        }
    }
}

/// Parse a lock source string.
pub fn parse_source(s: &str) -> Result<LockedSource, LockError> {
    if let Some(url) = s.strip_prefix("registry+") {
        if url.is_empty() {
            return Err(LockError::MalformedSource(s.to_string()));
        }
        return Ok(LockedSource::Registry {
            url: url.to_string(),
        });
    }

    if let Some(path) = s.strip_prefix("path+") {
        if path.is_empty() {
            return Err(LockError::MalformedSource(s.to_string()));
        }
        return Ok(LockedSource::Path {
            path: PathBuf::from(path),
        });
    }

    if let Some(rest) = s.strip_prefix("git+") {
        let (head, commit) = rest
            .rsplit_once('#')
            .ok_or_else(|| LockError::MalformedSource(s.to_string()))?;
        let (url, reference) = match head.split_once('?') {
            None => (head, GitReference::DefaultBranch),
            Some((url, query)) => {
                let reference = match query.split_once('=') {
                    Some(("tag", v)) => GitReference::Tag(v.to_string()),
                    Some(("branch", v)) => GitReference::Branch(v.to_string()),
                    Some(("commit", v)) => GitReference::Commit(v.to_string()),
                    _ => return Err(LockError::MalformedSource(s.to_string())),
                };
                (url, reference)
            }
        };
        if url.is_empty() || commit.is_empty() {
            return Err(LockError::MalformedSource(s.to_string()));
        }
        return Ok(LockedSource::Git {
            url: url.to_string(),
            reference,
            commit: commit.to_string(),
        });
    }

    Err(LockError::MalformedSource(s.to_string()))
}
