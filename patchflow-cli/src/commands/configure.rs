//! `patchflow configure <patch> --file <update.yaml>` — reconfigure a patch.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use patchflow_core::types::PatchId;
use patchflow_engine::{configure_patch, PatchUpdate};

use super::Workspace;

/// Arguments for `patchflow configure`.
#[derive(Args, Debug)]
pub struct ConfigureArgs {
    /// Patch id to reconfigure.
    pub patch: String,

    /// YAML file holding the update (`description`, `caller`, `parameters`,
    /// `variants_tasks`).
    #[arg(long)]
    pub file: PathBuf,
}

impl ConfigureArgs {
    pub fn run(self) -> Result<()> {
        let contents = fs::read_to_string(&self.file)
            .with_context(|| format!("failed to read {}", self.file.display()))?;
        let update: PatchUpdate = serde_yaml::from_str(&contents)
            .with_context(|| format!("failed to parse {}", self.file.display()))?;

        let workspace = Workspace::open()?;
        let outcome = configure_patch(&workspace.env, &PatchId::from(self.patch.as_str()), update)
            .with_context(|| format!("configure failed for patch '{}'", self.patch))?;

        if outcome.patch.is_finalized() {
            println!(
                "Reconfigured patch '{}': {} tasks created, {} activated.",
                self.patch, outcome.created_tasks, outcome.activated_tasks
            );
        } else {
            println!("Updated patch '{}'.", self.patch);
        }
        Ok(())
    }
}
