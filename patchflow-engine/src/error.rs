//! Error types for patchflow-engine.

use thiserror::Error;

use patchflow_config::ConfigError;
use patchflow_core::error::{PairError, StoreError};
use patchflow_core::types::PatchId;

fn join_failures(failures: &[(PatchId, String)]) -> String {
    failures
        .iter()
        .map(|(id, msg)| format!("patch '{id}': {msg}"))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Scheduling-limit failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuotaError {
    #[error(
        "user '{user}' has already scheduled {scheduled} patch tasks in the past hour; \
         {requested} more would exceed the limit of {limit}"
    )]
    Exceeded {
        user: String,
        scheduled: u32,
        requested: u32,
        limit: u32,
    },
}

/// Dependency expansion failures. Callers downgrade these to warnings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DependencyError {
    #[error(
        "task '{task}' in variant '{variant}' depends on '{dependency}' in variant \
         '{dependency_variant}', which does not exist"
    )]
    MissingDependency {
        task: String,
        variant: String,
        dependency: String,
        dependency_variant: String,
    },
}

/// A selected variant the project doesn't define.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("could not find build variant '{0}' in project")]
pub struct UnknownVariant(pub String);

/// The job queue refused a submission.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("enqueueing {job}: {reason}")]
pub struct EnqueueError {
    pub job: String,
    pub reason: String,
}

/// All errors that can arise from finalizing a patch.
#[derive(Debug, Error)]
pub enum FinalizeError {
    #[error("patch '{0}' not found")]
    PatchNotFound(PatchId),

    #[error("patch '{patch}' is already finalized as version '{version}'")]
    AlreadyFinalized { patch: String, version: String },

    #[error("project '{0}' not found")]
    ProjectNotFound(String),

    #[error("cannot finalize patch with no tasks")]
    NoTasks,

    #[error("no builds or tasks for merge queue version in projects '{project}', githash '{githash}'")]
    MergeQueueNoTasks { project: String, githash: String },

    #[error(transparent)]
    UnknownVariant(#[from] UnknownVariant),

    #[error(transparent)]
    Quota(#[from] QuotaError),

    #[error("trigger intent for child patch '{0}' not found")]
    TriggerIntentNotFound(PatchId),

    /// The parent is committed; these children were not.
    #[error("finalizing child patches of '{parent}': {}", join_failures(failures))]
    ChildPatches {
        parent: PatchId,
        failures: Vec<(PatchId, String)>,
    },

    #[error("child patch '{patch}' exceeds the maximum chain depth of {limit}")]
    ChainTooDeep { patch: PatchId, limit: usize },

    #[error("child patch '{0}' was already visited in this chain")]
    ChainCycle(PatchId),

    #[error("resolving manifest module '{module}': {source}")]
    Manifest {
        module: String,
        #[source]
        source: ConfigError,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl FinalizeError {
    /// Whether the caller, not the system, is at fault.
    pub fn is_client_error(&self) -> bool {
        match self {
            FinalizeError::AlreadyFinalized { .. }
            | FinalizeError::NoTasks
            | FinalizeError::MergeQueueNoTasks { .. }
            | FinalizeError::Quota(_) => true,
            FinalizeError::Config(e) => e.is_client_error(),
            _ => false,
        }
    }
}

/// All errors that can arise from reconfiguring a patch.
#[derive(Debug, Error)]
pub enum ConfigureError {
    #[error("patch '{0}' not found")]
    PatchNotFound(PatchId),

    #[error(transparent)]
    InvalidPair(#[from] PairError),

    #[error("finding version '{version}' for patch '{patch}'")]
    VersionNotFound { patch: PatchId, version: String },

    #[error(transparent)]
    UnknownVariant(#[from] UnknownVariant),

    #[error("total number of checkRuns ({count}) exceeds maximum limit ({limit})")]
    CheckRunLimit { count: usize, limit: usize },

    #[error(transparent)]
    Quota(#[from] QuotaError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl ConfigureError {
    pub fn is_client_error(&self) -> bool {
        match self {
            ConfigureError::InvalidPair(_) | ConfigureError::Quota(_) => true,
            ConfigureError::Config(e) => e.is_client_error(),
            _ => false,
        }
    }
}

/// All errors that can arise from cancelling patches.
#[derive(Debug, Error)]
pub enum CancelError {
    #[error("patch '{0}' not found")]
    PatchNotFound(PatchId),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Bulk abort: every patch that failed, in processing order.
    #[error("aborting patches: {}", join_failures(failures))]
    Batch { failures: Vec<(PatchId, String)> },
}

impl CancelError {
    pub fn is_client_error(&self) -> bool {
        matches!(self, CancelError::PatchNotFound(_))
    }
}
