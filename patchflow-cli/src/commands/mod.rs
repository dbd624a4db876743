pub mod cancel;
pub mod configure;
pub mod finalize;
pub mod project;
pub mod show;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::debug;

use patchflow_config::ConfigSources;
use patchflow_core::types::PatchId;
use patchflow_core::{paths, Patch, Settings, Store};
use patchflow_engine::{Job, PatchEnv, RecordingJobQueue};

/// Everything a subcommand needs, loaded from `~/.patchflow`.
pub struct Workspace {
    pub env: PatchEnv,
    jobs: Arc<RecordingJobQueue>,
}

impl Workspace {
    pub fn open() -> Result<Self> {
        let home: PathBuf = dirs::home_dir().context("could not determine home directory")?;
        let settings = Settings::load_at(&home).context("failed to load settings")?;
        let store = Store::open_at(&home).context("failed to open patch store")?;
        let repos_root = settings
            .repos_root
            .clone()
            .unwrap_or_else(|| paths::repos_path_at(&home));
        debug!(home = %home.display(), repos = %repos_root.display(), "opened workspace");
        let sources = ConfigSources::git(repos_root, settings.fetch_timeout());
        let jobs = Arc::new(RecordingJobQueue::new());
        let env = PatchEnv::new(Arc::new(store), settings, sources).with_jobs(jobs.clone());
        Ok(Self { env, jobs })
    }

    pub fn store(&self) -> &Store {
        &self.env.store
    }

    /// Print the follow-up jobs submitted so far; there is no runner here.
    pub fn report_jobs(&self) {
        for job in self.jobs.jobs() {
            debug!(?job, "follow-up job");
            match job {
                Job::VersionCreated { version } => println!("queued version-created for version '{version}'"),
                Job::VersionAborted { version, user } => {
                    println!("queued version-aborted for version '{version}' by '{user}'")
                }
            }
        }
    }

    pub fn patch(&self, id: &str) -> Result<Patch> {
        self.store()
            .find_patch(&PatchId::from(id))
            .with_context(|| format!("patch '{id}' not found"))
    }
}
