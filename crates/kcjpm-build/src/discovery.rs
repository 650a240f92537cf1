//! Source package discovery.
//!
//! A package is a directory whose `.cj` files share one `package`
//! declaration. Discovery groups the context's source files by their nearest
//! package root: starting from each file, walk up until a qualifying
//! directory is found or the project root is reached, in which case the
//! file's immediate parent acts as the root.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// A discovered source package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageInfo {
    /// Declared package name, or `main` when no file declares one
    pub name: String,
    pub package_root: PathBuf,
    pub source_files: Vec<PathBuf>,
    /// Whether another discovered package lives below this root
    pub has_sub_packages: bool,
}

/// Extract the `package <dotted.name>` declaration from a source file.
///
/// Line-prefix match only; no deeper source analysis happens here.
pub fn extract_package_name(path: &Path) -> Option<String> {
    let content = std::fs::read_to_string(path).ok()?;
    for line in content.lines() {
        let trimmed = line.trim_start();
        if let Some(rest) = trimmed.strip_prefix("package ") {
            let name = rest.trim().trim_end_matches(';').trim();
            if !name.is_empty() {
                return Some(name.to_string());
            }
        }
    }
    None
}

/// Whether any source file defines a `main` function.
pub fn package_has_main(source_files: &[PathBuf]) -> bool {
    source_files.iter().any(|file| {
        std::fs::read_to_string(file)
            .map(|content| {
                content.lines().any(|line| {
                    let trimmed = line.trim_start();
                    trimmed.starts_with("func main(") || trimmed.starts_with("main(")
                })
            })
            .unwrap_or(false)
    })
}

/// Group source files into packages.
pub fn discover_packages(source_files: &[PathBuf], project_root: &Path) -> Vec<PackageInfo> {
    let mut groups: BTreeMap<PathBuf, Vec<PathBuf>> = BTreeMap::new();

    for file in source_files {
        let root = package_root_for(file, project_root);
        groups.entry(root).or_default().push(file.clone());
    }

    let roots: Vec<PathBuf> = groups.keys().cloned().collect();

    groups
        .into_iter()
        .map(|(package_root, mut files)| {
            files.sort();
            let name = files
                .iter()
                .find_map(|f| extract_package_name(f))
                .unwrap_or_else(|| "main".to_string());
            let has_sub_packages = roots
                .iter()
                .any(|other| other != &package_root && other.starts_with(&package_root));
            PackageInfo {
                name,
                package_root,
                source_files: files,
                has_sub_packages,
            }
        })
        .collect()
}

/// Nearest qualifying package root for one source file.
fn package_root_for(file: &Path, project_root: &Path) -> PathBuf {
    let parent = file.parent().unwrap_or(project_root).to_path_buf();

    let mut candidate = parent.clone();
    loop {
        if directory_qualifies(&candidate) {
            return candidate;
        }
        if candidate == project_root {
            break;
        }
        match candidate.parent() {
            Some(next) => candidate = next.to_path_buf(),
            None => break,
        }
    }

    parent
}

/// A directory qualifies iff every `.cj` child declares the same package.
fn directory_qualifies(dir: &Path) -> bool {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return false;
    };

    let mut shared: Option<String> = None;
    let mut saw_source = false;

    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        if !path.is_file() || path.extension().map_or(true, |ext| ext != "cj") {
            continue;
        }
        saw_source = true;
        let Some(name) = extract_package_name(&path) else {
            return false;
        };
        if let Some(existing) = &shared {
            if *existing != name {
                return false;
            }
        } else {
            shared = Some(name);
        }
    }

    saw_source
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn extracts_declared_package_name() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("a.cj");
        touch(&file, "// header\npackage demo.core\n\nfunc f() {}\n");
        assert_eq!(extract_package_name(&file).as_deref(), Some("demo.core"));

        let bare = tmp.path().join("b.cj");
        touch(&bare, "func g() {}\n");
        assert_eq!(extract_package_name(&bare), None);
    }

    #[test]
    fn single_package_discovery() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        touch(&src.join("a.cj"), "package demo\n");
        touch(&src.join("b.cj"), "package demo\n");

        let sources = vec![src.join("a.cj"), src.join("b.cj")];
        let packages = discover_packages(&sources, tmp.path());
        assert_eq!(packages.len(), 1);
        assert_eq!(packages[0].name, "demo");
        assert_eq!(packages[0].package_root, src);
        assert!(!packages[0].has_sub_packages);
    }

    #[test]
    fn undeclared_sources_form_the_main_package() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        touch(&src.join("a.cj"), "func main() {}\n");

        let packages = discover_packages(&[src.join("a.cj")], tmp.path());
        assert_eq!(packages.len(), 1);
        assert_eq!(packages[0].name, "main");
        assert_eq!(packages[0].package_root, src);
    }

    #[test]
    fn sibling_directories_become_separate_packages() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        touch(&src.join("core").join("a.cj"), "package core\n");
        touch(&src.join("utils").join("b.cj"), "package utils\n");

        let sources = vec![
            src.join("core").join("a.cj"),
            src.join("utils").join("b.cj"),
        ];
        let packages = discover_packages(&sources, tmp.path());
        assert_eq!(packages.len(), 2);
        let names: Vec<_> = packages.iter().map(|p| p.name.as_str()).collect();
        assert!(names.contains(&"core"));
        assert!(names.contains(&"utils"));
    }

    #[test]
    fn nested_packages_set_sub_package_flag() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        touch(&src.join("a.cj"), "package demo\n");
        touch(&src.join("inner").join("b.cj"), "package demo.inner\n");

        let sources = vec![src.join("a.cj"), src.join("inner").join("b.cj")];
        let packages = discover_packages(&sources, tmp.path());
        assert_eq!(packages.len(), 2);

        let outer = packages.iter().find(|p| p.name == "demo").unwrap();
        let inner = packages.iter().find(|p| p.name == "demo.inner").unwrap();
        assert!(outer.has_sub_packages);
        assert!(!inner.has_sub_packages);
    }

    #[test]
    fn mixed_declarations_fall_back_to_parent_grouping() {
        // two files in one directory with different declarations: the
        // directory cannot qualify, so both group under their parent
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        touch(&src.join("a.cj"), "package one\n");
        touch(&src.join("b.cj"), "package two\n");

        let sources = vec![src.join("a.cj"), src.join("b.cj")];
        let packages = discover_packages(&sources, tmp.path());
        assert_eq!(packages.len(), 1);
        assert_eq!(packages[0].package_root, src);
        // first declared name in sorted file order wins
        assert_eq!(packages[0].name, "one");
    }

    #[test]
    fn detects_main_function() {
        let tmp = tempfile::tempdir().unwrap();
        let with_main = tmp.path().join("m.cj");
        touch(&with_main, "package main\n\nfunc main() {\n}\n");
        let without = tmp.path().join("l.cj");
        touch(&without, "package lib\n\nfunc helper() {}\n");

        assert!(package_has_main(&[with_main.clone()]));
        assert!(!package_has_main(&[without.clone()]));
        assert!(package_has_main(&[without, with_main]));
    }
}
