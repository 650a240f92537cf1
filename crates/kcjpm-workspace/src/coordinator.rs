//! Parallel workspace builds.
//!
//! Ready members (in-degree zero) are spawned immediately; the scheduler
//! then waits for *any* active build to finish, releasing dependents whose
//! last dependency just completed. The first failure cancels every in-flight
//! build and marks the rest as skipped.

use crate::graph::WorkspaceGraph;
use crate::{Workspace, WorkspaceError, WorkspaceMember};
use kcjpm_build::{
    BuildConfig, BuildScriptRunner, CompilationContext, CompilationPipeline,
};
use kcjpm_types::{OutputType, Profile};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use tokio::task::JoinSet;

/// Outcome of building one member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberBuildResult {
    Success { artifacts: Vec<PathBuf> },
    Failure { error: String },
    Skipped { reason: String },
}

impl MemberBuildResult {
    pub fn is_success(&self) -> bool {
        matches!(self, MemberBuildResult::Success { .. })
    }
}

/// Results keyed by member name.
#[derive(Debug, Default)]
pub struct WorkspaceBuildReport {
    pub results: BTreeMap<String, MemberBuildResult>,
}

impl WorkspaceBuildReport {
    /// All attempted members succeeded and none were skipped.
    pub fn is_success(&self) -> bool {
        self.results.values().all(MemberBuildResult::is_success)
    }

    pub fn get(&self, name: &str) -> Option<&MemberBuildResult> {
        self.results.get(name)
    }
}

/// Schedules member builds over the workspace graph.
pub struct WorkspaceCoordinator {
    cjc_path: PathBuf,
    /// Profile applied to every member build
    profile_name: String,
}

impl WorkspaceCoordinator {
    pub fn new(cjc_path: PathBuf) -> Self {
        Self {
            cjc_path,
            profile_name: "debug".to_string(),
        }
    }

    pub fn with_profile(mut self, name: impl Into<String>) -> Self {
        self.profile_name = name.into();
        self
    }

    /// Build every member, in parallel or sequentially.
    pub async fn build_all(
        &self,
        workspace: &Workspace,
        parallel: bool,
    ) -> Result<WorkspaceBuildReport, WorkspaceError> {
        self.build_members(&workspace.members, parallel).await
    }

    /// Build only the manifest's default members (all when unset).
    pub async fn build_default_members(
        &self,
        workspace: &Workspace,
        parallel: bool,
    ) -> Result<WorkspaceBuildReport, WorkspaceError> {
        let members: Vec<WorkspaceMember> = workspace
            .default_members()
            .into_iter()
            .cloned()
            .collect();
        self.build_members(&members, parallel).await
    }

    /// Build a single member without graph scheduling.
    pub async fn build_member(
        &self,
        workspace: &Workspace,
        name: &str,
    ) -> Result<MemberBuildResult, WorkspaceError> {
        let member = workspace
            .get_member(name)
            .ok_or_else(|| WorkspaceError::UnknownMember(name.to_string()))?;
        Ok(compile_member(self.cjc_path.clone(), member.clone(), self.profile_name.clone()).await)
    }

    async fn build_members(
        &self,
        members: &[WorkspaceMember],
        parallel: bool,
    ) -> Result<WorkspaceBuildReport, WorkspaceError> {
        let graph = WorkspaceGraph::build(members);
        let order = graph.topological_sort()?;

        if parallel {
            self.build_parallel(members, &graph, &order).await
        } else {
            self.build_sequential(members, &order).await
        }
    }

    async fn build_sequential(
        &self,
        members: &[WorkspaceMember],
        order: &[String],
    ) -> Result<WorkspaceBuildReport, WorkspaceError> {
        let by_name: HashMap<&str, &WorkspaceMember> =
            members.iter().map(|m| (m.name.as_str(), m)).collect();
        let mut report = WorkspaceBuildReport::default();
        let mut failed = false;

        for name in order {
            let member = by_name[name.as_str()];
            if failed {
                report.results.insert(
                    name.clone(),
                    MemberBuildResult::Skipped {
                        reason: "aborted after an earlier failure".to_string(),
                    },
                );
                continue;
            }

            let result = compile_member(
                self.cjc_path.clone(),
                member.clone(),
                self.profile_name.clone(),
            )
            .await;
            failed = !result.is_success();
            report.results.insert(name.clone(), result);
        }

        Ok(report)
    }

    async fn build_parallel(
        &self,
        members: &[WorkspaceMember],
        graph: &WorkspaceGraph,
        order: &[String],
    ) -> Result<WorkspaceBuildReport, WorkspaceError> {
        let by_name: HashMap<String, WorkspaceMember> = members
            .iter()
            .map(|m| (m.name.clone(), m.clone()))
            .collect();

        let mut remaining = graph.in_degrees().clone();
        // seed in topological order so ready members start deterministically
        let mut ready: VecDeque<String> = order
            .iter()
            .filter(|n| remaining[*n] == 0)
            .cloned()
            .collect();

        let mut active: JoinSet<(String, MemberBuildResult)> = JoinSet::new();
        let mut report = WorkspaceBuildReport::default();
        let mut failure: Option<String> = None;

        loop {
            // spawn everything currently ready
            while let Some(name) = ready.pop_front() {
                let member = by_name[&name].clone();
                let cjc = self.cjc_path.clone();
                let profile = self.profile_name.clone();
                active.spawn(async move {
                    let result = compile_member(cjc, member, profile).await;
                    (name, result)
                });
            }

            // wait for any active build to finish
            let Some(joined) = active.join_next().await else {
                break;
            };

            match joined {
                Ok((name, result)) => {
                    let succeeded = result.is_success();
                    report.results.insert(name.clone(), result);

                    if succeeded {
                        for dependent in graph.dependents_of(&name) {
                            if let Some(degree) = remaining.get_mut(dependent) {
                                *degree -= 1;
                                if *degree == 0 {
                                    ready.push_back(dependent.to_string());
                                }
                            }
                        }
                    } else {
                        failure = Some(name);
                        active.abort_all();
                        break;
                    }
                }
                Err(join_error) => {
                    tracing::warn!("member build task failed to join: {}", join_error);
                    failure = Some(String::new());
                    active.abort_all();
                    break;
                }
            }
        }

        if let Some(failed) = failure {
            let reason = if failed.is_empty() {
                "cancelled after a build task panicked".to_string()
            } else {
                format!("cancelled after `{}` failed", failed)
            };
            for member in members {
                report
                    .results
                    .entry(member.name.clone())
                    .or_insert_with(|| MemberBuildResult::Skipped {
                        reason: reason.clone(),
                    });
            }
        }

        Ok(report)
    }
}

/// Build one member through the standard pipeline.
async fn compile_member(
    cjc_path: PathBuf,
    member: WorkspaceMember,
    profile_name: String,
) -> MemberBuildResult {
    let profile = member
        .manifest
        .profile(&profile_name)
        .unwrap_or_else(Profile::debug);
    let config = BuildConfig::from_settings(&member.manifest.build, &profile, None);
    let output_type = member
        .manifest
        .package
        .as_ref()
        .map(|p| p.output_type)
        .unwrap_or(OutputType::Library);

    let source_dir = member.path.join(&member.manifest.build.source_dir);
    let output_path = resolve_output(&member.path, &member.manifest.build.output_dir);

    let context = CompilationContext::builder(&member.path)
        .build_config(config)
        .output_type(output_type)
        .source_dir(&source_dir)
        .output_path(output_path)
        .build();

    // run the build script first, when the member has one
    let runner = BuildScriptRunner::new(cjc_path.clone());
    let version = member
        .manifest
        .package
        .as_ref()
        .map(|p| p.version.to_string())
        .unwrap_or_default();
    let context = match runner
        .run(&context, &member.name, &version, &profile_name)
        .await
    {
        Ok(Some(extended)) => extended,
        Ok(None) => context,
        Err(e) => {
            return MemberBuildResult::Failure {
                error: e.to_string(),
            }
        }
    };

    let pipeline = CompilationPipeline::standard(cjc_path);
    match pipeline.run(context).await {
        Ok(_) => MemberBuildResult::Success {
            artifacts: pipeline.report().artifacts(),
        },
        Err(e) => MemberBuildResult::Failure {
            error: e.to_string(),
        },
    }
}

fn resolve_output(member_path: &Path, output_dir: &Path) -> PathBuf {
    if output_dir.is_absolute() {
        output_dir.to_path_buf()
    } else {
        member_path.join(output_dir)
    }
}
