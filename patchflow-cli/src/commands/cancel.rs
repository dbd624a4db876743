//! `patchflow cancel` and `patchflow abort-pr`.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Args;

use patchflow_core::patch::AbortInfo;
use patchflow_core::types::PatchId;
use patchflow_engine::{abort_patches_with_github_patch_data, cancel_patch, GithubPrAbort};

use super::Workspace;

/// Arguments for `patchflow cancel`.
#[derive(Args, Debug)]
pub struct CancelArgs {
    /// Patch id to cancel.
    pub patch: String,

    /// Recorded as the actor on deactivated and aborted tasks.
    #[arg(long, default_value = "cli")]
    pub user: String,
}

impl CancelArgs {
    pub fn run(self) -> Result<()> {
        let workspace = Workspace::open()?;
        let reason = AbortInfo {
            user: self.user,
            ..Default::default()
        };
        cancel_patch(&workspace.env, &PatchId::from(self.patch.as_str()), &reason)
            .with_context(|| format!("cancel failed for patch '{}'", self.patch))?;
        println!("Cancelled patch '{}'.", self.patch);
        workspace.report_jobs();
        Ok(())
    }
}

/// Arguments for `patchflow abort-pr`.
#[derive(Args, Debug)]
pub struct AbortPrArgs {
    #[arg(long)]
    pub owner: String,

    #[arg(long)]
    pub repo: String,

    /// Pull request number.
    #[arg(long)]
    pub pr: u64,

    /// The pull request was closed.
    #[arg(long)]
    pub closed: bool,

    /// Version superseding the aborted ones.
    #[arg(long)]
    pub new_version: Option<String>,
}

impl AbortPrArgs {
    pub fn run(self) -> Result<()> {
        let workspace = Workspace::open()?;
        let request = GithubPrAbort {
            owner: self.owner,
            repo: self.repo,
            pr_number: self.pr,
            created_before: Utc::now(),
            pr_closed: self.closed,
            new_version: self.new_version,
        };
        let cancelled = abort_patches_with_github_patch_data(&workspace.env, &request).with_context(|| {
            format!(
                "abort failed for {}/{}#{}",
                request.owner, request.repo, request.pr_number
            )
        })?;
        println!(
            "Aborted {cancelled} patches of {}/{}#{}.",
            request.owner, request.repo, request.pr_number
        );
        workspace.report_jobs();
        Ok(())
    }
}
