//! Diff application.

use std::fs::File;
use std::path::Path;
use std::process::{Command, Stdio};

use crate::error::{io_err, ConfigError};

/// Exit status and combined output of one application attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyOutput {
    pub success: bool,
    pub output: String,
}

pub trait PatchApplier: Send + Sync {
    /// Apply the diff in `patch_file` inside `work_dir`, touching only
    /// `include`.
    fn apply(&self, work_dir: &Path, patch_file: &Path, include: &str) -> Result<ApplyOutput, ConfigError>;
}

/// `git apply --whitespace=fix --include=<path> < <patch_file>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitApply;

impl PatchApplier for GitApply {
    fn apply(&self, work_dir: &Path, patch_file: &Path, include: &str) -> Result<ApplyOutput, ConfigError> {
        let stdin = File::open(patch_file).map_err(|e| io_err(patch_file, e))?;
        let out = Command::new("git")
            .arg("apply")
            .arg("--whitespace=fix")
            .arg(format!("--include={include}"))
            .current_dir(work_dir)
            .stdin(Stdio::from(stdin))
            .output()
            .map_err(|e| io_err(work_dir, e))?;

        let mut output = String::from_utf8_lossy(&out.stdout).into_owned();
        output.push_str(&String::from_utf8_lossy(&out.stderr));
        Ok(ApplyOutput {
            success: out.status.success(),
            output,
        })
    }
}
