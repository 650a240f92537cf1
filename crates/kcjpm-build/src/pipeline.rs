//! The staged compilation pipeline.
//!
//! Three stages: validation, dependency resolution, and package compilation.
//! Each stage takes the context and returns a (possibly new) context; the
//! first failure aborts the run. The reference compiler links executables
//! directly, so no linking stage exists.

use crate::compiler::{execute_compiler, ArtifactKind, CjcCommand};
use crate::context::CompilationContext;
use crate::discovery::{discover_packages, package_has_main, PackageInfo};
use crate::events::CompilationEvent;
use crate::report::{CompilationReport, PackageBuildReport};
use crate::BuildError;
use async_trait::async_trait;
use kcjpm_cache::{detect_changes, ChangeDetection, CompilationCache, PackageCacheEntry};
use kcjpm_types::{OutputType, ResolvedSource};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

/// One step of the pipeline.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, context: CompilationContext) -> Result<CompilationContext, BuildError>;

    /// Non-failing completion callback.
    fn on_complete(&self, _context: &CompilationContext) {}

    /// Non-failing failure callback.
    fn on_failure(&self, _context: &CompilationContext, _error: &BuildError) {}
}

/// An ordered list of stages plus the report they fill in.
pub struct CompilationPipeline {
    stages: Vec<Box<dyn Stage>>,
    report: Arc<Mutex<CompilationReport>>,
}

impl CompilationPipeline {
    /// The standard three-stage pipeline.
    pub fn standard(cjc_path: PathBuf) -> Self {
        let report = Arc::new(Mutex::new(CompilationReport::default()));
        Self {
            stages: vec![
                Box::new(ValidationStage),
                Box::new(DependencyResolutionStage),
                Box::new(PackageCompilationStage::new(cjc_path, Arc::clone(&report))),
            ],
            report,
        }
    }

    /// A pipeline with custom stages (used by tests).
    pub fn with_stages(stages: Vec<Box<dyn Stage>>) -> Self {
        Self {
            stages,
            report: Arc::new(Mutex::new(CompilationReport::default())),
        }
    }

    /// Snapshot of the accumulated report.
    pub fn report(&self) -> CompilationReport {
        self.report.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub async fn run(
        &self,
        context: CompilationContext,
    ) -> Result<CompilationContext, BuildError> {
        context.emit(CompilationEvent::PipelineStarted {
            stages: self.stages.len(),
        });

        let mut context = context;
        for stage in &self.stages {
            context.emit(CompilationEvent::StageStarted {
                name: stage.name().to_string(),
            });

            match stage.run(context.clone()).await {
                Ok(next) => {
                    stage.on_complete(&next);
                    next.emit(CompilationEvent::StageCompleted {
                        name: stage.name().to_string(),
                    });
                    context = next;
                }
                Err(error) => {
                    stage.on_failure(&context, &error);
                    context.emit(CompilationEvent::PipelineCompleted { success: false });
                    return Err(error);
                }
            }
        }

        context.emit(CompilationEvent::PipelineCompleted { success: true });
        Ok(context)
    }
}

/// Checks context invariants before anything touches the compiler.
pub struct ValidationStage;

#[async_trait]
impl Stage for ValidationStage {
    fn name(&self) -> &'static str {
        "validation"
    }

    async fn run(&self, context: CompilationContext) -> Result<CompilationContext, BuildError> {
        if !context.project_root.is_dir() {
            return Err(BuildError::Validation(format!(
                "project root {} is not a directory",
                context.project_root.display()
            )));
        }

        if context.source_files.is_empty() {
            return Err(BuildError::Validation(
                "no source files to compile".to_string(),
            ));
        }

        for source in &context.source_files {
            if !source.is_file() {
                return Err(BuildError::Validation(format!(
                    "source file {} does not exist",
                    source.display()
                )));
            }
            if source.extension().map_or(true, |ext| ext != "cj") {
                return Err(BuildError::Validation(format!(
                    "{} is not a .cj source file",
                    source.display()
                )));
            }
        }

        if let Some(parent) = context.output_path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        if context.build_config.max_parallel == 0 {
            return Err(BuildError::Validation(
                "max-parallel must be greater than zero".to_string(),
            ));
        }

        for dep in &context.dependencies {
            match &dep.source {
                ResolvedSource::Path { .. } => {
                    if !dep.local_path.exists() {
                        return Err(BuildError::Validation(format!(
                            "path dependency `{}` points at missing {}",
                            dep.name,
                            dep.local_path.display()
                        )));
                    }
                }
                ResolvedSource::Git { url, .. } => {
                    if url.trim().is_empty() {
                        return Err(BuildError::Validation(format!(
                            "git dependency `{}` has a blank URL",
                            dep.name
                        )));
                    }
                }
                ResolvedSource::Registry { url, version } => {
                    if version.trim().is_empty() || url.trim().is_empty() {
                        return Err(BuildError::Validation(format!(
                            "registry dependency `{}` is missing its version or registry URL",
                            dep.name
                        )));
                    }
                }
            }
        }

        context.emit(CompilationEvent::ValidationNote {
            message: format!("validated {} source files", context.source_files.len()),
        });

        Ok(context)
    }
}

/// Pass-through point where `context.dependencies` becomes authoritative.
pub struct DependencyResolutionStage;

#[async_trait]
impl Stage for DependencyResolutionStage {
    fn name(&self) -> &'static str {
        "dependency-resolution"
    }

    async fn run(&self, context: CompilationContext) -> Result<CompilationContext, BuildError> {
        for dep in &context.dependencies {
            context.emit(CompilationEvent::DependencyNote {
                message: format!("using {} at {}", dep.name, dep.local_path.display()),
            });
        }
        Ok(context)
    }
}

/// Discovers packages and compiles each with bounded parallelism.
pub struct PackageCompilationStage {
    cjc_path: PathBuf,
    report: Arc<Mutex<CompilationReport>>,
}

/// Where one package's artifact goes.
struct ArtifactPlan {
    kind: ArtifactKind,
    dir: PathBuf,
    file_name: String,
}

impl PackageCompilationStage {
    pub fn new(cjc_path: PathBuf, report: Arc<Mutex<CompilationReport>>) -> Self {
        Self { cjc_path, report }
    }

    fn plan_artifact(context: &CompilationContext, package: &PackageInfo) -> ArtifactPlan {
        let is_main_executable = context.output_type == OutputType::Executable
            && package.name == "main"
            && package_has_main(&package.source_files);

        if is_main_executable {
            ArtifactPlan {
                kind: ArtifactKind::Executable,
                dir: context.output_path.clone(),
                file_name: format!("{}{}", package.name, std::env::consts::EXE_SUFFIX),
            }
        } else if context.output_type == OutputType::DynamicLibrary {
            ArtifactPlan {
                kind: ArtifactKind::DyLib,
                dir: context.libs_dir(),
                file_name: format!("lib{}.b.dll", package.name),
            }
        } else {
            ArtifactPlan {
                kind: ArtifactKind::StaticLib,
                dir: context.libs_dir(),
                file_name: format!("lib{}.a", package.name),
            }
        }
    }

    fn record(&self, entry: PackageBuildReport) {
        self.report
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .record(entry);
    }
}

#[async_trait]
impl Stage for PackageCompilationStage {
    fn name(&self) -> &'static str {
        "package-compilation"
    }

    async fn run(&self, context: CompilationContext) -> Result<CompilationContext, BuildError> {
        let packages = discover_packages(&context.source_files, &context.project_root);
        for package in &packages {
            context.emit(CompilationEvent::PackageDiscovered {
                name: package.name.clone(),
                source_count: package.source_files.len(),
            });
        }

        let incremental = context.build_config.incremental;
        let config_hash = context.build_config.hash();
        let cache = Arc::new(tokio::sync::Mutex::new(if incremental {
            CompilationCache::load(&context.output_path)
        } else {
            CompilationCache::default()
        }));

        // Decide per package what must actually compile.
        let mut to_compile: Vec<(PackageInfo, ArtifactPlan)> = Vec::new();
        {
            let cache_guard = cache.lock().await;
            for package in packages {
                let plan = Self::plan_artifact(&context, &package);

                if incremental {
                    let entry = cache_guard.packages.get(&package.name);
                    let detection =
                        detect_changes(entry, &package.source_files, &config_hash);
                    context.emit(CompilationEvent::ChangeDetection {
                        package: package.name.clone(),
                        change: detection.label().to_string(),
                    });

                    if detection == ChangeDetection::NoChanges {
                        let artifact = entry
                            .map(|e| e.output_path.clone())
                            .unwrap_or_else(|| plan.dir.join(&plan.file_name));
                        context.emit(CompilationEvent::CacheNote {
                            message: format!("reusing artifact for {}", package.name),
                        });
                        self.record(PackageBuildReport {
                            name: package.name.clone(),
                            success: true,
                            artifact: Some(artifact),
                            diagnostics: Vec::new(),
                            reused: true,
                        });
                        continue;
                    }
                }

                to_compile.push((package, plan));
            }
        }

        // Compile the remainder, at most max_parallel in flight.
        let semaphore = Arc::new(Semaphore::new(context.build_config.max_parallel));
        let shared_context = Arc::new(context.clone());

        let tasks = to_compile.into_iter().map(|(package, plan)| {
            let semaphore = Arc::clone(&semaphore);
            let cache = Arc::clone(&cache);
            let ctx = Arc::clone(&shared_context);
            let cjc_path = self.cjc_path.clone();
            let config_hash = config_hash.clone();

            async move {
                let _permit = semaphore.acquire().await.expect("semaphore open");

                ctx.emit(CompilationEvent::PackageCompilationStarted {
                    name: package.name.clone(),
                });
                std::fs::create_dir_all(&plan.dir)?;

                let command = CjcCommand::new(&package.package_root)
                    .import_path(&ctx.output_path)
                    .output_dir(&plan.dir)
                    .artifact_name(&plan.file_name)
                    .kind(plan.kind)
                    .optimization_level(ctx.build_config.optimization_level)
                    .debug_info(ctx.build_config.debug_info)
                    .no_sub_pkg(!package.has_sub_packages)
                    .target(ctx.build_config.target_triple.clone());

                let outcome =
                    execute_compiler(&cjc_path, &command, ctx.event_sink.clone()).await?;

                if !outcome.success {
                    return Err(BuildError::PackageCompileFailed {
                        package: package.name.clone(),
                        message: outcome.failure_message(),
                        diagnostics: outcome.diagnostics,
                    });
                }

                ctx.emit(CompilationEvent::PackageCompilationCompleted {
                    name: package.name.clone(),
                    artifact: outcome.artifact.clone(),
                    diagnostics: outcome.diagnostics.clone(),
                });

                if ctx.build_config.incremental {
                    match PackageCacheEntry::capture(
                        &package.name,
                        &package.package_root,
                        &package.source_files,
                        &outcome.artifact,
                        &config_hash,
                    ) {
                        Ok(entry) => {
                            cache.lock().await.packages.insert(package.name.clone(), entry);
                        }
                        Err(e) => {
                            tracing::warn!(
                                "failed to snapshot cache entry for {}: {}",
                                package.name,
                                e
                            );
                        }
                    }
                }

                Ok::<PackageBuildReport, BuildError>(PackageBuildReport {
                    name: package.name,
                    success: true,
                    artifact: Some(outcome.artifact),
                    diagnostics: outcome.diagnostics,
                    reused: false,
                })
            }
        });

        let results = futures::future::join_all(tasks).await;

        // Persist whatever compiled successfully before surfacing a failure.
        if incremental {
            if let Err(e) = cache.lock().await.save(&context.output_path) {
                tracing::warn!("failed to write incremental cache: {}", e);
            }
        }

        let mut first_error = None;
        for result in results {
            match result {
                Ok(report) => self.record(report),
                Err(error) => {
                    if let BuildError::PackageCompileFailed {
                        package,
                        diagnostics,
                        ..
                    } = &error
                    {
                        self.record(PackageBuildReport {
                            name: package.clone(),
                            success: false,
                            artifact: None,
                            diagnostics: diagnostics.clone(),
                            reused: false,
                        });
                    }
                    if first_error.is_none() {
                        first_error = Some(error);
                    }
                }
            }
        }

        match first_error {
            Some(error) => Err(error),
            None => Ok(context),
        }
    }
}
