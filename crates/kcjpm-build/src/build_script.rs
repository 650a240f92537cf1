//! Build script support.
//!
//! A project may ship a `build.cj` at its root. Before the main compile it
//! is compiled to an executable under `.kcjpm/build-script/` and run with
//! the `KCJPM_*` environment contract; its stdout carries one directive per
//! `kcjpm:`-prefixed line.

use crate::context::CompilationContext;
use crate::events::CompilationEvent;
use crate::BuildError;
use std::path::{Component, Path, PathBuf};
use tokio::process::Command;

/// The build script file name at the project root.
pub const BUILD_SCRIPT_NAME: &str = "build.cj";

/// One parsed `kcjpm:` directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    LinkLib(String),
    IncludeDir(String),
    RerunIfChanged(String),
    Warning(String),
    Error(String),
    /// Anything else, surfaced as-is
    Custom { key: String, value: String },
}

/// Parse one stdout line into a directive, if it carries one.
pub fn parse_directive(line: &str) -> Option<Directive> {
    let rest = line.trim().strip_prefix("kcjpm:")?;
    let (key, value) = rest.split_once('=')?;
    let value = value.to_string();
    Some(match key {
        "link-lib" => Directive::LinkLib(value),
        "include-dir" => Directive::IncludeDir(value),
        "rerun-if-changed" => Directive::RerunIfChanged(value),
        "warning" => Directive::Warning(value),
        "error" => Directive::Error(value),
        other => Directive::Custom {
            key: other.to_string(),
            value,
        },
    })
}

/// Directives collected from one build script run.
#[derive(Debug, Clone, Default)]
pub struct BuildScriptDirectives {
    pub link_libs: Vec<String>,
    pub include_dirs: Vec<String>,
    pub rerun_if_changed: Vec<String>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub custom: Vec<(String, String)>,
}

impl BuildScriptDirectives {
    /// Collect directives from stdout lines; non-directive lines are ignored.
    pub fn collect<'a>(lines: impl Iterator<Item = &'a str>) -> Self {
        let mut directives = Self::default();
        for line in lines {
            match parse_directive(line) {
                Some(Directive::LinkLib(v)) => directives.link_libs.push(v),
                Some(Directive::IncludeDir(v)) => directives.include_dirs.push(v),
                Some(Directive::RerunIfChanged(v)) => directives.rerun_if_changed.push(v),
                Some(Directive::Warning(v)) => directives.warnings.push(v),
                Some(Directive::Error(v)) => directives.errors.push(v),
                Some(Directive::Custom { key, value }) => directives.custom.push((key, value)),
                None => {}
            }
        }
        directives
    }
}

/// Compiles and runs a project's `build.cj`.
pub struct BuildScriptRunner {
    cjc_path: PathBuf,
}

impl BuildScriptRunner {
    pub fn new(cjc_path: PathBuf) -> Self {
        Self { cjc_path }
    }

    /// Run the build script, when present.
    ///
    /// Returns `None` when the project has no `build.cj`. On success the
    /// returned context carries the collected `link-lib` and `include-dir`
    /// directives; include paths are resolved against the project root.
    pub async fn run(
        &self,
        context: &CompilationContext,
        package_name: &str,
        package_version: &str,
        profile: &str,
    ) -> Result<Option<CompilationContext>, BuildError> {
        let script = context.project_root.join(BUILD_SCRIPT_NAME);
        if !script.is_file() {
            return Ok(None);
        }

        let binary = self.compile_script(context, &script).await?;
        let directives = self
            .execute_script(context, &binary, package_name, package_version, profile)
            .await?;

        for warning in &directives.warnings {
            context.emit(CompilationEvent::Progress {
                message: format!("build script warning: {}", warning),
            });
        }

        let mut next = context.clone();
        next.link_libraries.extend(directives.link_libs);
        next.include_dirs.extend(
            directives
                .include_dirs
                .iter()
                .map(|dir| normalize(&context.project_root.join(dir))),
        );
        Ok(Some(next))
    }

    async fn compile_script(
        &self,
        context: &CompilationContext,
        script: &Path,
    ) -> Result<PathBuf, BuildError> {
        let out_dir = context.project_root.join(".kcjpm").join("build-script");
        std::fs::create_dir_all(&out_dir)?;
        let binary = out_dir.join(format!("build{}", std::env::consts::EXE_SUFFIX));

        let output = Command::new(&self.cjc_path)
            .arg(script)
            .arg("-o")
            .arg(&binary)
            .arg("--output-type=exe")
            .current_dir(&context.project_root)
            .output()
            .await?;

        if !output.status.success() {
            return Err(BuildError::BuildScript(format!(
                "failed to compile {}: {}",
                BUILD_SCRIPT_NAME,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(binary)
    }

    async fn execute_script(
        &self,
        context: &CompilationContext,
        binary: &Path,
        package_name: &str,
        package_version: &str,
        profile: &str,
    ) -> Result<BuildScriptDirectives, BuildError> {
        let target = context
            .build_config
            .target_triple
            .clone()
            .unwrap_or_else(|| {
                format!("{}-{}", std::env::consts::ARCH, std::env::consts::OS)
            });

        let output = Command::new(binary)
            .current_dir(&context.project_root)
            .env("KCJPM_OUT_DIR", &context.output_path)
            .env("KCJPM_TARGET", target)
            .env("KCJPM_PROFILE", profile)
            .env("KCJPM_MANIFEST_DIR", &context.project_root)
            .env("KCJPM_PKG_NAME", package_name)
            .env("KCJPM_PKG_VERSION", package_version)
            .output()
            .await?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let directives = BuildScriptDirectives::collect(stdout.lines());

        if !directives.errors.is_empty() {
            return Err(BuildError::BuildScript(directives.errors.join("; ")));
        }
        if !output.status.success() {
            return Err(BuildError::BuildScript(format!(
                "build script exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(directives)
    }
}

/// Lexically normalize a path: strip `.` components, fold `..` onto the
/// parent where possible.
fn normalize(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !result.pop() {
                    result.push(Component::ParentDir);
                }
            }
            other => result.push(other),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_each_directive_kind() {
        assert_eq!(
            parse_directive("kcjpm:link-lib=ssl"),
            Some(Directive::LinkLib("ssl".to_string()))
        );
        assert_eq!(
            parse_directive("kcjpm:include-dir=vendor/include"),
            Some(Directive::IncludeDir("vendor/include".to_string()))
        );
        assert_eq!(
            parse_directive("kcjpm:rerun-if-changed=wrapper.h"),
            Some(Directive::RerunIfChanged("wrapper.h".to_string()))
        );
        assert_eq!(
            parse_directive("kcjpm:warning=libfoo is old"),
            Some(Directive::Warning("libfoo is old".to_string()))
        );
        assert_eq!(
            parse_directive("kcjpm:error=no openssl"),
            Some(Directive::Error("no openssl".to_string()))
        );
        assert_eq!(
            parse_directive("kcjpm:cfg-flag=foo"),
            Some(Directive::Custom {
                key: "cfg-flag".to_string(),
                value: "foo".to_string(),
            })
        );
    }

    #[test]
    fn ignores_non_directive_lines() {
        assert_eq!(parse_directive("building stuff..."), None);
        assert_eq!(parse_directive("kcjpm:no-equals-here"), None);
        assert_eq!(parse_directive(""), None);
    }

    #[test]
    fn collect_buckets_by_kind() {
        let stdout = "\
checking for ssl
kcjpm:link-lib=ssl
kcjpm:link-lib=crypto
kcjpm:include-dir=vendor/include
kcjpm:warning=using vendored headers
kcjpm:custom-key=custom-value
";
        let directives = BuildScriptDirectives::collect(stdout.lines());
        assert_eq!(directives.link_libs, vec!["ssl", "crypto"]);
        assert_eq!(directives.include_dirs, vec!["vendor/include"]);
        assert_eq!(directives.warnings.len(), 1);
        assert!(directives.errors.is_empty());
        assert_eq!(
            directives.custom,
            vec![("custom-key".to_string(), "custom-value".to_string())]
        );
    }

    #[test]
    fn normalize_folds_dot_segments() {
        assert_eq!(
            normalize(Path::new("/proj/./vendor/../vendor/include")),
            PathBuf::from("/proj/vendor/include")
        );
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use crate::context::CompilationContext;
        use std::os::unix::fs::PermissionsExt;

        /// Fake cjc that "compiles" build.cj by writing a shell script which
        /// prints the given stdout. Argument order: <script> -o <bin> ...
        fn fake_compiler(dir: &Path, script_stdout: &str) -> PathBuf {
            let path = dir.join("cjc");
            let script = format!(
                "#!/bin/sh\ncat > \"$3\" <<'SCRIPT'\n#!/bin/sh\n{}\nSCRIPT\nchmod +x \"$3\"\n",
                script_stdout
            );
            std::fs::write(&path, script).unwrap();
            let mut perms = std::fs::metadata(&path).unwrap().permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&path, perms).unwrap();
            path
        }

        fn project(tmp: &Path) -> CompilationContext {
            std::fs::write(tmp.join(BUILD_SCRIPT_NAME), "func main() {}\n").unwrap();
            CompilationContext::builder(tmp).build()
        }

        #[tokio::test]
        async fn directives_extend_the_context() {
            let tmp = tempfile::tempdir().unwrap();
            let cjc = fake_compiler(
                tmp.path(),
                "echo 'kcjpm:link-lib=ssl'\necho 'kcjpm:include-dir=vendor/include'",
            );

            let ctx = project(tmp.path());
            let runner = BuildScriptRunner::new(cjc);
            let next = runner.run(&ctx, "demo", "0.1.0", "debug").await.unwrap().unwrap();

            assert_eq!(next.link_libraries, vec!["ssl"]);
            assert_eq!(
                next.include_dirs,
                vec![tmp.path().join("vendor").join("include")]
            );
            // original context untouched
            assert!(ctx.link_libraries.is_empty());
        }

        #[tokio::test]
        async fn error_directive_fails_the_stage() {
            let tmp = tempfile::tempdir().unwrap();
            let cjc = fake_compiler(tmp.path(), "echo 'kcjpm:error=openssl not found'");

            let ctx = project(tmp.path());
            let err = BuildScriptRunner::new(cjc)
                .run(&ctx, "demo", "0.1.0", "debug")
                .await
                .unwrap_err();
            match err {
                BuildError::BuildScript(message) => {
                    assert!(message.contains("openssl not found"))
                }
                other => panic!("expected BuildScript, got {:?}", other),
            }
        }

        #[tokio::test]
        async fn nonzero_exit_fails_the_stage() {
            let tmp = tempfile::tempdir().unwrap();
            let cjc = fake_compiler(tmp.path(), "echo 'kcjpm:link-lib=ssl'\nexit 3");

            let ctx = project(tmp.path());
            let err = BuildScriptRunner::new(cjc)
                .run(&ctx, "demo", "0.1.0", "debug")
                .await
                .unwrap_err();
            assert!(matches!(err, BuildError::BuildScript(_)));
        }

        #[tokio::test]
        async fn absent_script_is_a_no_op() {
            let tmp = tempfile::tempdir().unwrap();
            let cjc = fake_compiler(tmp.path(), "echo unused");
            let ctx = CompilationContext::builder(tmp.path()).build();
            let result = BuildScriptRunner::new(cjc)
                .run(&ctx, "demo", "0.1.0", "debug")
                .await
                .unwrap();
            assert!(result.is_none());
        }

        #[tokio::test]
        async fn environment_contract_reaches_the_script() {
            let tmp = tempfile::tempdir().unwrap();
            let witness = tmp.path().join("env-witness");
            let cjc = fake_compiler(
                tmp.path(),
                &format!(
                    "printf '%s|%s|%s' \"$KCJPM_PKG_NAME\" \"$KCJPM_PROFILE\" \"$KCJPM_PKG_VERSION\" > {}",
                    witness.display()
                ),
            );

            let ctx = project(tmp.path());
            BuildScriptRunner::new(cjc)
                .run(&ctx, "demo", "0.2.0", "release")
                .await
                .unwrap();
            assert_eq!(
                std::fs::read_to_string(witness).unwrap(),
                "demo|release|0.2.0"
            );
        }
    }
}
