//! Project cleaner.
//!
//! Deletes build output per options and reports how many bytes were freed;
//! individual IO failures are collected rather than aborting the sweep.

use std::path::{Path, PathBuf};

/// What to remove.
#[derive(Debug, Clone)]
pub struct CleanOptions {
    /// Remove build output (the whole output dir, or `debug/` only)
    pub target: bool,
    /// Restrict output removal to `<output>/debug`
    pub debug_only: bool,
    /// Remove coverage artefacts: `cov_output/`, `*.gcno`, `*.gcda`
    pub coverage: bool,
    /// Remove the compiled build script cache
    pub build_script_cache: bool,
    /// Remove `*.incremental.json` files inside the output dir
    pub incremental_state: bool,
    /// Compute the report without deleting anything
    pub dry_run: bool,
}

impl Default for CleanOptions {
    fn default() -> Self {
        Self {
            target: true,
            debug_only: false,
            coverage: true,
            build_script_cache: true,
            incremental_state: true,
            dry_run: false,
        }
    }
}

/// What a clean removed (or would remove).
#[derive(Debug, Default)]
pub struct CleanReport {
    pub bytes_freed: u64,
    pub removed: Vec<PathBuf>,
    pub errors: Vec<(PathBuf, String)>,
}

/// Clean a project's build output.
///
/// `output_dir` is taken relative to `project_root` unless absolute.
pub fn clean_project(
    project_root: &Path,
    output_dir: &Path,
    options: &CleanOptions,
) -> CleanReport {
    let output = if output_dir.is_absolute() {
        output_dir.to_path_buf()
    } else {
        project_root.join(output_dir)
    };

    let mut report = CleanReport::default();

    if options.incremental_state && !(options.target && !options.debug_only) {
        // Only meaningful when the whole output dir is not being removed.
        for file in files_matching(&output, |name| name.ends_with(".incremental.json")) {
            remove_path(&file, options.dry_run, &mut report);
        }
    }

    if options.target {
        let target_path = if options.debug_only {
            output.join("debug")
        } else {
            output.clone()
        };
        if target_path.exists() {
            remove_path(&target_path, options.dry_run, &mut report);
        }
    }

    if options.coverage {
        let cov = project_root.join("cov_output");
        if cov.exists() {
            remove_path(&cov, options.dry_run, &mut report);
        }
        for file in files_matching(project_root, |name| {
            name.ends_with(".gcno") || name.ends_with(".gcda")
        }) {
            remove_path(&file, options.dry_run, &mut report);
        }
    }

    if options.build_script_cache {
        let cache = project_root.join(".kcjpm").join("build-script");
        if cache.exists() {
            remove_path(&cache, options.dry_run, &mut report);
        }
    }

    report
}

fn files_matching(root: &Path, predicate: impl Fn(&str) -> bool) -> Vec<PathBuf> {
    walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| predicate(&e.file_name().to_string_lossy()))
        .map(|e| e.into_path())
        .collect()
}

fn remove_path(path: &Path, dry_run: bool, report: &mut CleanReport) {
    let size = path_size(path);

    if !dry_run {
        let result = if path.is_dir() {
            std::fs::remove_dir_all(path)
        } else {
            std::fs::remove_file(path)
        };
        if let Err(e) = result {
            report.errors.push((path.to_path_buf(), e.to_string()));
            return;
        }
    }

    report.bytes_freed += size;
    report.removed.push(path.to_path_buf());
}

fn path_size(path: &Path) -> u64 {
    if path.is_file() {
        return std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    }
    walkdir::WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}
