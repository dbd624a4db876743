//! Everything an engine entry point needs, passed explicitly.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use patchflow_config::ConfigSources;
use patchflow_core::types::VersionId;
use patchflow_core::{Clock, Settings, Store, SystemClock};

use crate::dependencies::{DependencyExpander, DependencyIncluder};
use crate::error::EnqueueError;

// ---------------------------------------------------------------------------
// Follow-up jobs
// ---------------------------------------------------------------------------

/// Follow-up work submitted after a commit. Never awaited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Job {
    /// Setup work for a freshly finalized version.
    VersionCreated { version: VersionId },
    VersionAborted { version: VersionId, user: String },
}

impl Job {
    pub fn name(&self) -> &'static str {
        match self {
            Job::VersionCreated { .. } => "version-created",
            Job::VersionAborted { .. } => "version-aborted",
        }
    }
}

/// Submission side of an external retryable-job runtime.
pub trait JobQueue: Send + Sync {
    fn enqueue(&self, job: Job) -> Result<(), EnqueueError>;
}

/// Drops every job.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopJobQueue;

impl JobQueue for NoopJobQueue {
    fn enqueue(&self, _job: Job) -> Result<(), EnqueueError> {
        Ok(())
    }
}

/// Keeps submitted jobs in memory.
#[derive(Debug, Default)]
pub struct RecordingJobQueue {
    jobs: Mutex<Vec<Job>>,
}

impl RecordingJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn jobs(&self) -> Vec<Job> {
        self.jobs.lock().clone()
    }
}

impl JobQueue for RecordingJobQueue {
    fn enqueue(&self, job: Job) -> Result<(), EnqueueError> {
        self.jobs.lock().push(job);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// PatchEnv
// ---------------------------------------------------------------------------

/// Store, settings, clock and collaborators for one engine caller.
#[derive(Clone)]
pub struct PatchEnv {
    pub store: Arc<Store>,
    pub settings: Settings,
    pub clock: Arc<dyn Clock>,
    pub sources: ConfigSources,
    pub dependencies: Arc<dyn DependencyExpander>,
    pub jobs: Arc<dyn JobQueue>,
}

impl PatchEnv {
    /// System clock, default dependency inclusion and a no-op job queue.
    pub fn new(store: Arc<Store>, settings: Settings, sources: ConfigSources) -> Self {
        Self {
            store,
            settings,
            clock: Arc::new(SystemClock),
            sources,
            dependencies: Arc::new(DependencyIncluder),
            jobs: Arc::new(NoopJobQueue),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_jobs(mut self, jobs: Arc<dyn JobQueue>) -> Self {
        self.jobs = jobs;
        self
    }

    pub fn with_dependencies(mut self, dependencies: Arc<dyn DependencyExpander>) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Submit `job`, logging rather than returning a refusal.
    pub(crate) fn enqueue(&self, job: Job) {
        let name = job.name();
        if let Err(e) = self.jobs.enqueue(job) {
            tracing::error!(job = name, error = %e, "enqueueing follow-up job");
        }
    }
}

impl std::fmt::Debug for PatchEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatchEnv")
            .field("settings", &self.settings)
            .field("sources", &self.sources)
            .finish_non_exhaustive()
    }
}
