//! Platform and Cangjie SDK detection for kcjpm.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

#[cfg(windows)]
const CJC_BINARY: &str = "cjc.exe";
#[cfg(not(windows))]
const CJC_BINARY: &str = "cjc";

#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("Cangjie SDK not found; set CANGJIE_HOME or put cjc on PATH")]
    SdkNotFound,
    #[error("CANGJIE_HOME is not a directory: {0}")]
    InvalidSdkHome(PathBuf),
    #[error("compiler binary missing: {0}")]
    CompilerMissing(PathBuf),
    #[error("failed to execute cjc: {0}")]
    ExecutionError(#[from] std::io::Error),
    #[error("failed to parse cjc version output: {0}")]
    VersionParseError(String),
}

/// Information about the current platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformInfo {
    /// Operating system (macos, linux, windows)
    pub os: String,
    /// CPU architecture (aarch64, x86_64)
    pub arch: String,
    /// Target triple passed to the compiler
    pub triple: String,
}

impl PlatformInfo {
    /// Detect the current platform.
    pub fn detect() -> Self {
        let os = std::env::consts::OS.to_string();
        let arch = std::env::consts::ARCH.to_string();

        let triple = match (os.as_str(), arch.as_str()) {
            ("linux", "x86_64") => "x86_64-unknown-linux-gnu",
            ("linux", "aarch64") => "aarch64-unknown-linux-gnu",
            ("macos", "x86_64") => "x86_64-apple-darwin",
            ("macos", "aarch64") => "aarch64-apple-darwin",
            ("windows", "x86_64") => "x86_64-pc-windows-gnu",
            _ => "unknown",
        };

        Self {
            os,
            arch,
            triple: triple.to_string(),
        }
    }
}

/// A located Cangjie SDK.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CangjieSdk {
    /// Path to the cjc binary
    pub cjc_path: PathBuf,
    /// SDK home directory, when located through one
    pub home: Option<PathBuf>,
    /// Compiler version (first line of `cjc --version`)
    pub version: String,
}

impl CangjieSdk {
    /// Locate the compiler.
    ///
    /// Lookup order: the `CANGJIE_HOME` environment variable, an explicit
    /// configured path, then a PATH search for `cjc`.
    pub fn locate(explicit: Option<&Path>) -> Result<Self, PlatformError> {
        if let Some(home) = std::env::var_os("CANGJIE_HOME") {
            return Self::from_home(&PathBuf::from(home));
        }

        if let Some(path) = explicit {
            return Self::from_path(path);
        }

        let cjc_path = which::which(CJC_BINARY).map_err(|_| PlatformError::SdkNotFound)?;
        Self::from_binary(cjc_path, None)
    }

    /// Build an SDK handle from a home directory (`<home>/bin/cjc`).
    pub fn from_home(home: &Path) -> Result<Self, PlatformError> {
        if !home.is_dir() {
            return Err(PlatformError::InvalidSdkHome(home.to_path_buf()));
        }
        let cjc_path = home.join("bin").join(CJC_BINARY);
        if !cjc_path.is_file() {
            return Err(PlatformError::CompilerMissing(cjc_path));
        }
        Self::from_binary(cjc_path, Some(home.to_path_buf()))
    }

    /// Build an SDK handle from an explicit path.
    ///
    /// Accepts either the binary itself or a directory containing it.
    pub fn from_path(path: &Path) -> Result<Self, PlatformError> {
        if path.is_file() {
            return Self::from_binary(path.to_path_buf(), None);
        }
        if path.is_dir() {
            let cjc_path = path.join(CJC_BINARY);
            if cjc_path.is_file() {
                return Self::from_binary(cjc_path, Some(path.to_path_buf()));
            }
            return Err(PlatformError::CompilerMissing(cjc_path));
        }
        Err(PlatformError::InvalidSdkHome(path.to_path_buf()))
    }

    fn from_binary(cjc_path: PathBuf, home: Option<PathBuf>) -> Result<Self, PlatformError> {
        let version = detect_version(&cjc_path)?;
        Ok(Self {
            cjc_path,
            home,
            version,
        })
    }
}

/// Run `cjc --version` and return the first output line.
fn detect_version(cjc_path: &Path) -> Result<String, PlatformError> {
    let output = Command::new(cjc_path).arg("--version").output()?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    stdout
        .lines()
        .next()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .ok_or_else(|| PlatformError::VersionParseError(stdout.to_string()))
}
