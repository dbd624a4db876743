//! Scheduling documents created at finalize time: versions, builds, tasks and
//! manifests.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::patch::{AbortInfo, Parameter};
use crate::types::{
    BuildId, PatchId, Requester, StorageMethod, TaskId, TaskStatus, VersionId, VersionStatus,
};

// ---------------------------------------------------------------------------
// Version
// ---------------------------------------------------------------------------

/// Activation record for one build of a version, parallel to `build_ids`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionBuildStatus {
    pub build_variant: String,
    pub build_id: BuildId,
    #[serde(default)]
    pub display_name: String,
    pub activated: bool,
}

/// The scheduling unit owning an ordered list of builds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub id: VersionId,
    pub create_time: DateTime<Utc>,
    /// Project identifier.
    pub identifier: String,
    pub revision: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub author_id: String,
    #[serde(default)]
    pub author_email: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub build_ids: Vec<BuildId>,
    #[serde(default)]
    pub build_variants: Vec<VersionBuildStatus>,
    pub status: VersionStatus,
    pub requester: Requester,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_patch_id: Option<PatchId>,
    #[serde(default)]
    pub parent_patch_number: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_storage_method: Option<StorageMethod>,
    #[serde(default)]
    pub branch: String,
    #[serde(default)]
    pub revision_order_number: u32,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    pub activated: bool,
}

// ---------------------------------------------------------------------------
// Build
// ---------------------------------------------------------------------------

/// Per-variant execution record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Build {
    pub id: BuildId,
    pub version: VersionId,
    pub build_variant: String,
    #[serde(default)]
    pub display_name: String,
    pub project: String,
    pub revision: String,
    pub requester: Requester,
    pub create_time: DateTime<Utc>,
    pub activated: bool,
    pub status: VersionStatus,
    #[serde(default)]
    pub tasks: Vec<TaskId>,
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// An edge from a task to a task it waits for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub task_id: TaskId,
    /// Required status of the dependency; `None` means success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// Per-task execution record; belongs to exactly one build and version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub display_name: String,
    pub build_id: BuildId,
    pub build_variant: String,
    pub version: VersionId,
    pub project: String,
    pub revision: String,
    pub requester: Requester,
    pub create_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distro_id: Option<String>,
    #[serde(default)]
    pub priority: i64,
    pub activated: bool,
    #[serde(default)]
    pub activated_by: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub depends_on: Vec<Dependency>,
    /// Number of tasks in the version that depend on this one. Computed
    /// before insertion.
    #[serde(default)]
    pub num_dependents: u32,
    #[serde(default)]
    pub generate_task: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_num_activated_generated_tasks: Option<u32>,
    #[serde(default)]
    pub essential_to_succeed: bool,
    /// Set on display tasks: the execution tasks they aggregate.
    #[serde(default)]
    pub display_only: bool,
    #[serde(default)]
    pub execution_tasks: Vec<TaskId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_task_id: Option<TaskId>,
    #[serde(default)]
    pub aborted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abort_info: Option<AbortInfo>,
}

impl Task {
    /// Activated count used against the scheduling quota: the task itself
    /// plus the generated tasks it is estimated to create.
    pub fn activation_weight(&self) -> u32 {
        if !self.activated || self.display_only {
            return 0;
        }
        1 + self.estimated_num_activated_generated_tasks.unwrap_or(0)
    }
}

// ---------------------------------------------------------------------------
// Manifest
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestModule {
    pub branch: String,
    pub repo: String,
    pub owner: String,
    pub revision: String,
}

/// Point-in-time snapshot of module revisions for a version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Same as the version id.
    pub id: String,
    pub revision: String,
    pub project: String,
    #[serde(default)]
    pub branch: String,
    #[serde(default)]
    pub is_base: bool,
    #[serde(default)]
    pub modules: BTreeMap<String, ManifestModule>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn task(activated: bool, generated: Option<u32>) -> Task {
        Task {
            id: TaskId::from("t"),
            display_name: "t".into(),
            build_id: BuildId::from("b"),
            build_variant: "v".into(),
            version: VersionId::from("v1"),
            project: "proj".into(),
            revision: "abc".into(),
            requester: Requester::Patch,
            create_time: Utc::now(),
            distro_id: None,
            priority: 0,
            activated,
            activated_by: String::new(),
            status: TaskStatus::Undispatched,
            depends_on: vec![],
            num_dependents: 0,
            generate_task: generated.is_some(),
            estimated_num_activated_generated_tasks: generated,
            essential_to_succeed: false,
            display_only: false,
            execution_tasks: vec![],
            display_task_id: None,
            aborted: false,
            abort_info: None,
        }
    }

    #[test]
    fn activation_weight_counts_generated_estimate() {
        assert_eq!(task(true, None).activation_weight(), 1);
        assert_eq!(task(true, Some(4)).activation_weight(), 5);
        assert_eq!(task(false, Some(4)).activation_weight(), 0);
    }

    #[test]
    fn display_tasks_weigh_nothing() {
        let mut t = task(true, None);
        t.display_only = true;
        assert_eq!(t.activation_weight(), 0);
    }
}
