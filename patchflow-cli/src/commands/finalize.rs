//! `patchflow finalize <patch>` — create the version of a patch.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use patchflow_core::types::{PatchId, Requester};
use patchflow_engine::finalize_patch;

use super::Workspace;

/// Arguments for `patchflow finalize`.
#[derive(Args, Debug)]
pub struct FinalizeArgs {
    /// Patch id to finalize.
    pub patch: String,

    /// Requester the version is created for.
    #[arg(long, default_value = "patch")]
    pub requester: Requester,
}

impl FinalizeArgs {
    pub fn run(self) -> Result<()> {
        let workspace = Workspace::open()?;
        let version = finalize_patch(&workspace.env, &PatchId::from(self.patch.as_str()), self.requester)
            .with_context(|| format!("finalize failed for patch '{}'", self.patch))?;

        let num_tasks = workspace
            .store()
            .read(|docs| docs.tasks_by_version(&version.id).len());
        println!(
            "{} patch '{}' as version '{}': {} builds, {} tasks",
            "Finalized".green().bold(),
            self.patch,
            version.id,
            version.build_ids.len(),
            num_tasks,
        );
        workspace.report_jobs();
        Ok(())
    }
}
