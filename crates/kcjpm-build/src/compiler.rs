//! cjc invocation: command construction and process execution.
//!
//! Compiler stdout and stderr are read by two concurrent tasks; a single
//! reader would deadlock once the child fills the other pipe's buffer.

use crate::diagnostics::{Diagnostic, DiagnosticParser, ParseEvent, Severity};
use crate::events::{CompilationEvent, EventBus};
use crate::BuildError;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

/// How many trailing stderr lines failures carry.
const STDERR_TAIL: usize = 20;

/// What kind of artifact one package compile produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    StaticLib,
    DyLib,
    Executable,
}

impl ArtifactKind {
    fn flag(self) -> &'static str {
        match self {
            ArtifactKind::StaticLib => "staticlib",
            ArtifactKind::DyLib => "dylib",
            ArtifactKind::Executable => "exe",
        }
    }
}

/// Builder for one cjc invocation.
#[derive(Debug, Clone)]
pub struct CjcCommand {
    package_root: PathBuf,
    import_path: PathBuf,
    output_dir: PathBuf,
    artifact_name: String,
    kind: ArtifactKind,
    optimization_level: u8,
    debug_info: bool,
    no_sub_pkg: bool,
    target: Option<String>,
    extra_flags: Vec<String>,
}

impl CjcCommand {
    pub fn new(package_root: impl Into<PathBuf>) -> Self {
        Self {
            package_root: package_root.into(),
            import_path: PathBuf::new(),
            output_dir: PathBuf::new(),
            artifact_name: String::new(),
            kind: ArtifactKind::StaticLib,
            optimization_level: 0,
            debug_info: false,
            no_sub_pkg: false,
            target: None,
            extra_flags: Vec::new(),
        }
    }

    /// Directory earlier-built packages were written to, so their exports
    /// are importable.
    pub fn import_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.import_path = path.into();
        self
    }

    pub fn output_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_dir = path.into();
        self
    }

    pub fn artifact_name(mut self, name: impl Into<String>) -> Self {
        self.artifact_name = name.into();
        self
    }

    pub fn kind(mut self, kind: ArtifactKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn optimization_level(mut self, level: u8) -> Self {
        self.optimization_level = level;
        self
    }

    pub fn debug_info(mut self, enabled: bool) -> Self {
        self.debug_info = enabled;
        self
    }

    /// Passed for leaf packages only.
    pub fn no_sub_pkg(mut self, enabled: bool) -> Self {
        self.no_sub_pkg = enabled;
        self
    }

    pub fn target(mut self, triple: Option<String>) -> Self {
        self.target = triple;
        self
    }

    pub fn extra_flags(mut self, flags: Vec<String>) -> Self {
        self.extra_flags = flags;
        self
    }

    pub fn package_root(&self) -> &Path {
        &self.package_root
    }

    /// Where the artifact lands.
    pub fn artifact_path(&self) -> PathBuf {
        self.output_dir.join(&self.artifact_name)
    }

    fn optimization_flag(&self) -> &'static str {
        match self.optimization_level {
            0 => "-O0",
            1 => "-Os",
            2 => "-O2",
            _ => "-O3",
        }
    }

    /// Assemble the argument list without executing.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            self.package_root.display().to_string(),
            "--import-path".to_string(),
            self.import_path.display().to_string(),
            "--output-dir".to_string(),
            self.output_dir.display().to_string(),
            "-o".to_string(),
            self.artifact_name.clone(),
            format!("--output-type={}", self.kind.flag()),
            self.optimization_flag().to_string(),
        ];

        if self.debug_info {
            args.push("-g".to_string());
        }
        if self.no_sub_pkg {
            args.push("--no-sub-pkg".to_string());
        }
        if let Some(triple) = &self.target {
            args.push("--target".to_string());
            args.push(triple.clone());
        }
        args.extend(self.extra_flags.iter().cloned());

        args
    }
}

/// Result of running one package compile.
#[derive(Debug)]
pub struct CompileOutcome {
    pub success: bool,
    pub artifact: PathBuf,
    pub diagnostics: Vec<Diagnostic>,
    pub stderr_tail: Vec<String>,
}

impl CompileOutcome {
    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
    }

    /// Human message listing located diagnostics plus the stderr tail.
    pub fn failure_message(&self) -> String {
        let mut parts: Vec<String> = self.errors().map(|d| d.render()).collect();
        if parts.is_empty() {
            parts.push("compiler exited with a non-zero status".to_string());
        }
        if !self.stderr_tail.is_empty() {
            parts.push(format!("stderr:\n{}", self.stderr_tail.join("\n")));
        }
        parts.join("\n")
    }
}

/// Spawn the compiler and stream its output.
///
/// The child runs with `cwd` set to the package root and inherits the
/// environment. Every output line is emitted verbatim as a `RawOutput` event
/// and also fed to a per-stream diagnostic parser.
pub async fn execute_compiler(
    cjc_path: &Path,
    command: &CjcCommand,
    events: Option<Arc<EventBus>>,
) -> Result<CompileOutcome, BuildError> {
    let mut child = Command::new(cjc_path)
        .args(command.build_args())
        .current_dir(&command.package_root)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let stdout_task = tokio::spawn(read_stream(stdout, false, events.clone()));
    let stderr_task = tokio::spawn(read_stream(stderr, true, events.clone()));

    let status = child.wait().await?;

    let (stdout_result, stderr_result) = tokio::join!(stdout_task, stderr_task);
    let (mut diagnostics, _) = stdout_result.unwrap_or_default();
    let (stderr_diags, stderr_tail) = stderr_result.unwrap_or_default();
    diagnostics.extend(stderr_diags);

    Ok(CompileOutcome {
        success: status.success(),
        artifact: command.artifact_path(),
        diagnostics,
        stderr_tail,
    })
}

/// Read one output stream line by line, parsing diagnostics as they arrive.
async fn read_stream<R>(
    stream: Option<R>,
    is_stderr: bool,
    events: Option<Arc<EventBus>>,
) -> (Vec<Diagnostic>, Vec<String>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let Some(stream) = stream else {
        return (Vec::new(), Vec::new());
    };

    let mut parser = DiagnosticParser::new();
    let mut diagnostics = Vec::new();
    let mut tail = Vec::new();
    let mut lines = BufReader::new(stream).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        if let Some(bus) = &events {
            bus.emit(CompilationEvent::RawOutput {
                line: line.clone(),
                is_stderr,
            });
        }

        for event in parser.feed(&line) {
            handle_parse_event(event, &events, &mut diagnostics);
        }

        if is_stderr {
            tail.push(line);
            if tail.len() > STDERR_TAIL {
                tail.remove(0);
            }
        }
    }

    if let Some(diag) = parser.finish() {
        handle_parse_event(ParseEvent::Diagnostic(diag), &events, &mut diagnostics);
    }

    (diagnostics, tail)
}

fn handle_parse_event(
    event: ParseEvent,
    events: &Option<Arc<EventBus>>,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match event {
        ParseEvent::Diagnostic(diag) => {
            if let Some(bus) = events {
                let event = match diag.severity {
                    Severity::Error => CompilationEvent::CompilationError {
                        diagnostic: diag.clone(),
                    },
                    Severity::Warning => CompilationEvent::CompilationWarning {
                        diagnostic: diag.clone(),
                    },
                };
                bus.emit(event);
            }
            diagnostics.push(diag);
        }
        ParseEvent::Progress(message) => {
            if let Some(bus) = events {
                bus.emit(CompilationEvent::Progress { message });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command() -> CjcCommand {
        CjcCommand::new("/proj/src/core")
            .import_path("/proj/target")
            .output_dir("/proj/target/libs")
            .artifact_name("libcore.a")
            .kind(ArtifactKind::StaticLib)
            .optimization_level(2)
            .debug_info(true)
            .no_sub_pkg(true)
            .target(Some("x86_64-unknown-linux-gnu".to_string()))
    }

    #[test]
    fn build_args_full_ordering() {
        let args = command().build_args();
        assert_eq!(
            args,
            vec![
                "-p",
                "/proj/src/core",
                "--import-path",
                "/proj/target",
                "--output-dir",
                "/proj/target/libs",
                "-o",
                "libcore.a",
                "--output-type=staticlib",
                "-O2",
                "-g",
                "--no-sub-pkg",
                "--target",
                "x86_64-unknown-linux-gnu",
            ]
        );
    }

    #[test]
    fn optimization_levels_map_to_flags() {
        for (level, flag) in [(0u8, "-O0"), (1, "-Os"), (2, "-O2"), (3, "-O3"), (9, "-O3")] {
            let args = CjcCommand::new("/p")
                .artifact_name("a")
                .optimization_level(level)
                .build_args();
            assert!(args.contains(&flag.to_string()), "level {}", level);
        }
    }

    #[test]
    fn leaf_flags_are_optional() {
        let args = CjcCommand::new("/p").artifact_name("a").build_args();
        assert!(!args.contains(&"-g".to_string()));
        assert!(!args.contains(&"--no-sub-pkg".to_string()));
        assert!(!args.contains(&"--target".to_string()));
    }

    #[test]
    fn artifact_path_joins_output_dir() {
        assert_eq!(
            command().artifact_path(),
            PathBuf::from("/proj/target/libs/libcore.a")
        );
    }

    #[test]
    fn output_kinds_render_as_flags() {
        for (kind, expected) in [
            (ArtifactKind::StaticLib, "--output-type=staticlib"),
            (ArtifactKind::DyLib, "--output-type=dylib"),
            (ArtifactKind::Executable, "--output-type=exe"),
        ] {
            let args = CjcCommand::new("/p")
                .artifact_name("a")
                .kind(kind)
                .build_args();
            assert!(args.contains(&expected.to_string()));
        }
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use crate::events::CollectingObserver;
        use std::os::unix::fs::PermissionsExt;

        fn fake_compiler(dir: &Path, script: &str) -> PathBuf {
            let path = dir.join("cjc");
            std::fs::write(&path, format!("#!/bin/sh\n{}", script)).unwrap();
            let mut perms = std::fs::metadata(&path).unwrap().permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&path, perms).unwrap();
            path
        }

        #[tokio::test]
        async fn captures_diagnostics_from_stderr() {
            let tmp = tempfile::tempdir().unwrap();
            let cjc = fake_compiler(
                tmp.path(),
                concat!(
                    "echo 'Compiling package `demo`'\n",
                    "echo \"warning: unused function:'name'\" >&2\n",
                    "echo ' ==> src/b.cj:3:1:' >&2\n",
                    "echo '  |' >&2\n",
                    "echo '3 | func name() {}' >&2\n",
                    "echo '  |' >&2\n",
                    "echo '1 warning generated, 1 warning printed.' >&2\n",
                    "exit 0\n",
                ),
            );

            let bus = Arc::new(EventBus::new());
            let collector = Arc::new(CollectingObserver::new());
            bus.subscribe(collector.clone());

            let cmd = CjcCommand::new(tmp.path())
                .output_dir(tmp.path())
                .artifact_name("libdemo.a");
            let outcome = execute_compiler(&cjc, &cmd, Some(bus)).await.unwrap();

            assert!(outcome.success);
            assert_eq!(outcome.diagnostics.len(), 1);
            let diag = &outcome.diagnostics[0];
            assert_eq!(diag.severity, Severity::Warning);
            assert_eq!(diag.file.as_deref(), Some("src/b.cj"));
            assert_eq!(diag.line, Some(3));
            assert_eq!(diag.column, Some(1));

            let events = collector.events();
            assert!(events
                .iter()
                .any(|e| matches!(e, CompilationEvent::CompilationWarning { .. })));
            assert!(events.iter().any(
                |e| matches!(e, CompilationEvent::RawOutput { is_stderr: true, .. })
            ));
            assert!(events.iter().any(
                |e| matches!(e, CompilationEvent::RawOutput { is_stderr: false, .. })
            ));
            assert!(!events
                .iter()
                .any(|e| matches!(e, CompilationEvent::CompilationError { .. })));
        }

        #[tokio::test]
        async fn failure_carries_errors_and_stderr_tail() {
            let tmp = tempfile::tempdir().unwrap();
            let cjc = fake_compiler(
                tmp.path(),
                concat!(
                    "echo \"error: undeclared identifier 'foo'\" >&2\n",
                    "echo ' ==> src/main.cj:2:5:' >&2\n",
                    "echo '' >&2\n",
                    "echo 'ld: fatal noise' >&2\n",
                    "exit 1\n",
                ),
            );

            let cmd = CjcCommand::new(tmp.path())
                .output_dir(tmp.path())
                .artifact_name("demo");
            let outcome = execute_compiler(&cjc, &cmd, None).await.unwrap();

            assert!(!outcome.success);
            assert_eq!(outcome.errors().count(), 1);
            let message = outcome.failure_message();
            assert!(message.contains("src/main.cj:2:5: undeclared identifier 'foo'"));
            assert!(message.contains("ld: fatal noise"));
        }
    }
}
