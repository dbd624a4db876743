//! patchflow-engine — patch finalization, reconfiguration and cancellation.
//!
//! - [`finalize`] — patch → version, builds and tasks in one commit
//! - [`chain`] — child patches after a parent commits
//! - [`configure`] — incremental reconfiguration of a patch
//! - [`cancel`] — single and pull-request-wide cancellation
//! - [`materialize`], [`task_ids`], [`dependencies`], [`quota`] — building blocks
//! - [`env`] — [`PatchEnv`] and the [`JobQueue`] seam

pub mod cancel;
pub mod chain;
pub mod configure;
pub mod dependencies;
pub mod env;
pub mod error;
pub mod finalize;
pub mod materialize;
pub mod quota;
pub mod task_ids;

pub use cancel::{abort_patches_with_github_patch_data, cancel_patch, GithubPrAbort};
pub use chain::subscribe_on_parent_outcome;
pub use configure::{configure_patch, ConfigureOutcome, PatchUpdate};
pub use dependencies::{DependencyExpander, DependencyIncluder};
pub use env::{Job, JobQueue, NoopJobQueue, PatchEnv, RecordingJobQueue};
pub use error::{CancelError, ConfigureError, FinalizeError};
pub use finalize::finalize_patch;
