//! `patchflow patched-project` and `patchflow config-diff`.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Args;

use patchflow_config::patched::preview_config_diff;
use patchflow_config::{get_patched_project, store_patched_project};

use super::Workspace;

/// Arguments for `patchflow patched-project`.
#[derive(Args, Debug)]
pub struct PatchedProjectArgs {
    /// Patch id.
    pub patch: String,

    /// Keep the result on the patch so finalize doesn't fetch again.
    #[arg(long)]
    pub store: bool,
}

impl PatchedProjectArgs {
    pub fn run(self) -> Result<()> {
        let workspace = Workspace::open()?;
        let patch = workspace.patch(&self.patch)?;
        let patched = get_patched_project(workspace.store(), &workspace.env.sources, &patch)
            .with_context(|| format!("failed to build project for patch '{}'", self.patch))?;

        print!("{}", patched.config_yaml);
        if !patched.config_yaml.ends_with('\n') {
            println!();
        }

        if self.store {
            store_patched_project(workspace.store(), &patch, &patched, Utc::now())
                .with_context(|| format!("failed to store project for patch '{}'", self.patch))?;
            eprintln!("Stored project for patch '{}'.", self.patch);
        }
        Ok(())
    }
}

/// Arguments for `patchflow config-diff`.
#[derive(Args, Debug)]
pub struct ConfigDiffArgs {
    /// Patch id.
    pub patch: String,
}

impl ConfigDiffArgs {
    pub fn run(self) -> Result<()> {
        let workspace = Workspace::open()?;
        let patch = workspace.patch(&self.patch)?;
        let diff = preview_config_diff(workspace.store(), &workspace.env.sources, &patch)
            .with_context(|| format!("diff failed for patch '{}'", self.patch))?;

        if diff.is_empty() {
            println!("No configuration changes in patch '{}'.", self.patch);
            return Ok(());
        }
        print!("{diff}");
        if !diff.ends_with('\n') {
            println!();
        }
        Ok(())
    }
}
