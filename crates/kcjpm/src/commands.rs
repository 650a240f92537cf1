//! Command implementations: init, install/update, build, clean.

use crate::reporter::ConsoleReporter;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use kcjpm_build::{
    clean_project, BuildConfig, BuildScriptRunner, CleanOptions, CompilationContext,
    CompilationPipeline, EventBus,
};
use kcjpm_cache::HomeCache;
use kcjpm_lockfile::{LockFile, LockfileDiff, LOCK_FILE_NAME};
use kcjpm_manifest::{find_manifest, MANIFEST_FILE_NAME};
use kcjpm_platform::CangjieSdk;
use kcjpm_registry::HttpRegistryClient;
use kcjpm_resolver::{DependencyManager, InstallOptions, LockPolicy};
use kcjpm_types::{Manifest, Profile};
use kcjpm_workspace::{WorkspaceCoordinator, WorkspaceManager};
use miette::{miette, IntoDiagnostic, Result};
use std::path::Path;
use std::sync::Arc;

/// Options for the build command.
pub struct BuildCommandOptions {
    pub profile: String,
    pub target: Option<String>,
    pub jobs: Option<usize>,
    pub incremental: bool,
    pub member: Option<String>,
    pub verbose: bool,
}

/// Create a minimal package in `dir`.
pub async fn init(dir: &Path, name: Option<&str>) -> Result<()> {
    let manifest_path = dir.join(MANIFEST_FILE_NAME);
    if manifest_path.exists() {
        return Err(miette!("{} already exists", manifest_path.display()));
    }

    let name = match name {
        Some(n) => n.to_string(),
        None => dir
            .canonicalize()
            .into_diagnostic()?
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "app".to_string()),
    };

    let manifest = format!(
        "[package]\nname = \"{}\"\nversion = \"0.1.0\"\noutput-type = \"executable\"\n\n[dependencies]\n",
        name
    );
    std::fs::write(&manifest_path, manifest).into_diagnostic()?;

    let src = dir.join("src");
    std::fs::create_dir_all(&src).into_diagnostic()?;
    let main = src.join("main.cj");
    if !main.exists() {
        std::fs::write(&main, "package main\n\nfunc main() {\n    println(\"hello\")\n}\n")
            .into_diagnostic()?;
    }

    println!("{} Created package `{}`", style("✓").green(), style(name).cyan());
    Ok(())
}

/// Install dependencies; `refresh` re-resolves and regenerates the lock.
pub async fn install(project: &Path, refresh: bool) -> Result<()> {
    let manifest = load_manifest(project)?;
    let lock_path = project.join(LOCK_FILE_NAME);
    let lock_before = LockFile::load(&lock_path).ok();

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.blue} {msg}")
            .unwrap(),
    );
    spinner.set_message("Resolving dependencies...");
    spinner.enable_steady_tick(std::time::Duration::from_millis(100));

    let cache = HomeCache::open().into_diagnostic()?;
    let manager = DependencyManager::new(cache, Arc::new(HttpRegistryClient::new()));
    let options = InstallOptions {
        lock_policy: if refresh {
            LockPolicy::Refresh
        } else {
            LockPolicy::UseExisting
        },
    };

    let deps = manager
        .install(&manifest, project, &options)
        .await
        .map_err(|e| miette!("{}", e))?;

    spinner.finish_with_message(format!(
        "{} Installed {} dependencies",
        style("✓").green(),
        style(deps.len()).cyan()
    ));

    if let (Some(before), Ok(after)) = (lock_before, LockFile::load(&lock_path)) {
        let diff = LockfileDiff::between(&before, &after);
        if diff.has_changes() {
            println!(
                "{} Updated lock file ({})",
                style("✓").green(),
                style(diff.summary()).dim()
            );
        }
    }
    Ok(())
}

/// Build the project or workspace.
pub async fn build(project: &Path, options: BuildCommandOptions) -> Result<()> {
    let manifest = load_manifest(project)?;
    let sdk = CangjieSdk::locate(None).map_err(|e| miette!("{}", e))?;
    tracing::info!("using cjc {} at {}", sdk.version, sdk.cjc_path.display());

    if manifest.workspace.is_some() {
        build_workspace(project, &sdk, &options).await
    } else {
        build_single(project, manifest, &sdk, &options).await
    }
}

async fn build_workspace(
    project: &Path,
    sdk: &CangjieSdk,
    options: &BuildCommandOptions,
) -> Result<()> {
    let workspace = WorkspaceManager::new()
        .load(project)
        .map_err(|e| miette!("{}", e))?;
    let coordinator =
        WorkspaceCoordinator::new(sdk.cjc_path.clone()).with_profile(options.profile.clone());

    if let Some(member) = &options.member {
        let result = coordinator
            .build_member(&workspace, member)
            .await
            .map_err(|e| miette!("{}", e))?;
        print_member(member, &result);
        return if result.is_success() {
            Ok(())
        } else {
            Err(miette!("member `{}` failed to build", member))
        };
    }

    let report = coordinator
        .build_default_members(&workspace, true)
        .await
        .map_err(|e| miette!("{}", e))?;

    for (name, result) in &report.results {
        print_member(name, result);
    }
    if report.is_success() {
        println!(
            "{} Built {} workspace members",
            style("✓").green(),
            style(report.results.len()).cyan()
        );
        Ok(())
    } else {
        Err(miette!("workspace build failed"))
    }
}

fn print_member(name: &str, result: &kcjpm_workspace::MemberBuildResult) {
    use kcjpm_workspace::MemberBuildResult;
    match result {
        MemberBuildResult::Success { artifacts } => {
            println!(
                "{} {} ({} artifacts)",
                style("✓").green(),
                style(name).cyan(),
                artifacts.len()
            );
        }
        MemberBuildResult::Failure { error } => {
            eprintln!("{} {}: {}", style("✗").red(), name, error);
        }
        MemberBuildResult::Skipped { reason } => {
            println!("{} {} ({})", style("-").dim(), name, reason);
        }
    }
}

async fn build_single(
    project: &Path,
    manifest: Manifest,
    sdk: &CangjieSdk,
    options: &BuildCommandOptions,
) -> Result<()> {
    // dependencies honour the existing lock
    let cache = HomeCache::open().into_diagnostic()?;
    let manager = DependencyManager::new(cache, Arc::new(HttpRegistryClient::new()));
    let deps = manager
        .install(&manifest, project, &InstallOptions::default())
        .await
        .map_err(|e| miette!("{}", e))?;

    let profile = manifest
        .profile(&options.profile)
        .unwrap_or_else(Profile::debug);
    let mut settings = manifest.build.clone();
    if let Some(jobs) = options.jobs {
        settings.jobs = Some(jobs);
    }
    settings.incremental = settings.incremental && options.incremental;
    let config = BuildConfig::from_settings(&settings, &profile, options.target.clone());

    let package = manifest
        .package
        .as_ref()
        .ok_or_else(|| miette!("manifest has no [package] section to build"))?;

    let bus = Arc::new(EventBus::new());
    bus.subscribe(Arc::new(ConsoleReporter::new(options.verbose)));

    let context = CompilationContext::builder(project)
        .build_config(config)
        .output_type(package.output_type)
        .dependencies(deps)
        .source_dir(&project.join(&settings.source_dir))
        .output_path(project.join(&settings.output_dir))
        .event_sink(bus)
        .build();

    run_hooks(project, &settings.pre_build, "pre-build").await?;

    // build.cj runs before the main compile
    let runner = BuildScriptRunner::new(sdk.cjc_path.clone());
    let context = match runner
        .run(
            &context,
            &package.name,
            &package.version.to_string(),
            &options.profile,
        )
        .await
        .map_err(|e| miette!("{}", e))?
    {
        Some(extended) => extended,
        None => context,
    };

    let pipeline = CompilationPipeline::standard(sdk.cjc_path.clone());
    pipeline.run(context).await.map_err(|e| miette!("{}", e))?;

    run_hooks(project, &settings.post_build, "post-build").await?;

    let report = pipeline.report();
    println!(
        "{} Built {} packages ({} reused)",
        style("✓").green(),
        style(report.packages.len()).cyan(),
        report.packages.iter().filter(|p| p.reused).count()
    );
    Ok(())
}

/// Run manifest pre/post build commands through the shell.
async fn run_hooks(project: &Path, commands: &[String], phase: &str) -> Result<()> {
    for command in commands {
        tracing::info!("running {} hook: {}", phase, command);

        #[cfg(windows)]
        let mut cmd = {
            let mut c = tokio::process::Command::new("cmd");
            c.arg("/C").arg(command);
            c
        };
        #[cfg(not(windows))]
        let mut cmd = {
            let mut c = tokio::process::Command::new("sh");
            c.arg("-c").arg(command);
            c
        };

        let status = cmd
            .current_dir(project)
            .status()
            .await
            .into_diagnostic()?;
        if !status.success() {
            return Err(miette!("{} command failed: {}", phase, command));
        }
    }
    Ok(())
}

/// Remove build output.
pub async fn clean(project: &Path, debug_only: bool, dry_run: bool) -> Result<()> {
    let manifest = load_manifest(project)?;
    let options = CleanOptions {
        debug_only,
        dry_run,
        ..CleanOptions::default()
    };

    let report = clean_project(project, &manifest.build.output_dir, &options);

    for (path, error) in &report.errors {
        eprintln!("{} {}: {}", style("✗").red(), path.display(), error);
    }
    let verb = if dry_run { "Would free" } else { "Freed" };
    println!(
        "{} {} {} across {} paths",
        style("✓").green(),
        verb,
        style(format_bytes(report.bytes_freed)).cyan(),
        report.removed.len()
    );
    Ok(())
}

fn load_manifest(project: &Path) -> Result<Manifest> {
    find_manifest(project).map_err(|e| match e {
        kcjpm_manifest::ManifestError::NotFound(_) => {
            kcjpm_diagnostics::Report::new(kcjpm_diagnostics::KcjpmError::ManifestNotFound)
        }
        other => miette!("{}", other),
    })
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[unit])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kcjpm_types::OutputType;

    #[tokio::test]
    async fn init_creates_manifest_and_entrypoint() {
        let tmp = tempfile::tempdir().unwrap();
        init(tmp.path(), Some("demo")).await.unwrap();

        let manifest = find_manifest(tmp.path()).unwrap();
        assert_eq!(manifest.package.as_ref().unwrap().name, "demo");
        assert_eq!(
            manifest.package.as_ref().unwrap().output_type,
            OutputType::Executable
        );
        assert!(tmp.path().join("src").join("main.cj").is_file());

        // re-running refuses to clobber
        assert!(init(tmp.path(), Some("demo")).await.is_err());
    }

    #[test]
    fn bytes_formatting() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KiB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MiB");
    }
}
