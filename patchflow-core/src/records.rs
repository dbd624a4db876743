//! Supporting records read by the materialization engine: project refs,
//! aliases, the version-controlled project config, distro aliases, users and
//! parent-patch subscriptions.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::patch::Parameter;
use crate::types::{PatchId, Requester};

// ---------------------------------------------------------------------------
// Project ref
// ---------------------------------------------------------------------------

/// Where a project lives and how it is configured (already merged with its
/// repo-level settings).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRef {
    pub id: String,
    pub identifier: String,
    pub owner: String,
    pub repo: String,
    pub branch: String,
    /// Path of the configuration file in the repository.
    pub remote_path: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Settings may be defined in the configuration file itself.
    #[serde(default)]
    pub version_control_enabled: bool,
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Aliases
// ---------------------------------------------------------------------------

/// Aliases reserved for system use; they never contribute parameters.
pub const INTERNAL_ALIASES: &[&str] = &[
    "__commit_queue",
    "__github",
    "__github_checks",
    "__git_tag",
];

/// Whether `alias` is a user-facing patch alias.
pub fn is_patch_alias(alias: &str) -> bool {
    !INTERNAL_ALIASES.contains(&alias)
}

/// A named variant/task selection with default parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProjectAlias {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub project_id: String,
    pub alias: String,
    #[serde(default)]
    pub variant: String,
    #[serde(default)]
    pub task: String,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
}

// ---------------------------------------------------------------------------
// Project config
// ---------------------------------------------------------------------------

/// Settings a project may declare in its own configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ProjectConfigFields {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patch_aliases: Vec<ProjectAlias>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub github_pr_aliases: Vec<ProjectAlias>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub github_checks_aliases: Vec<ProjectAlias>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub commit_queue_aliases: Vec<ProjectAlias>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub git_tag_aliases: Vec<ProjectAlias>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_baron_settings: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_annotation_settings: Option<serde_json::Value>,
}

impl ProjectConfigFields {
    pub fn is_empty(&self) -> bool {
        self.patch_aliases.is_empty()
            && self.github_pr_aliases.is_empty()
            && self.github_checks_aliases.is_empty()
            && self.commit_queue_aliases.is_empty()
            && self.git_tag_aliases.is_empty()
            && self.build_baron_settings.is_none()
            && self.task_annotation_settings.is_none()
    }
}

/// Lightweight projection of the project definition, stored next to a
/// version when version control is enabled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ProjectConfig {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub project: String,
    #[serde(flatten)]
    pub fields: ProjectConfigFields,
}

// ---------------------------------------------------------------------------
// Distro aliases
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistroAlias {
    pub alias: String,
    pub distros: Vec<String>,
}

/// Alias name to candidate distro ids, in preference order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DistroAliasTable(HashMap<String, Vec<String>>);

impl DistroAliasTable {
    pub fn from_aliases(aliases: &[DistroAlias]) -> Self {
        let mut table: HashMap<String, Vec<String>> = HashMap::new();
        for a in aliases {
            let entry = table.entry(a.alias.clone()).or_default();
            for d in &a.distros {
                if !entry.contains(d) {
                    entry.push(d.clone());
                }
            }
        }
        Self(table)
    }

    /// The distro to run on: an alias resolves to its first distro, a plain
    /// name passes through.
    pub fn resolve(&self, name: &str) -> String {
        self.0
            .get(name)
            .and_then(|d| d.first())
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub email: String,
    /// Activated patch tasks in the current hour window.
    #[serde(default)]
    pub num_scheduled_patch_tasks: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_scheduled_tasks_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn new(id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            num_scheduled_patch_tasks: 0,
            last_scheduled_tasks_at: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Subscriptions
// ---------------------------------------------------------------------------

/// Finalize `child_patch_id` once the parent reaches `parent_status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildPatchSubscriber {
    pub parent_status: String,
    pub child_patch_id: PatchId,
    pub requester: Requester,
}

/// An event subscription keyed by the parent patch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub parent_patch_id: PatchId,
    pub subscriber: ChildPatchSubscriber,
}

impl Subscription {
    pub fn for_child(parent: &PatchId, subscriber: ChildPatchSubscriber) -> Self {
        Self {
            id: format!("{}-{}", parent, subscriber.child_patch_id),
            parent_patch_id: parent.clone(),
            subscriber,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_aliases_are_not_patch_aliases() {
        assert!(!is_patch_alias("__github"));
        assert!(is_patch_alias("nightly"));
    }

    #[test]
    fn distro_alias_resolves_first_candidate() {
        let table = DistroAliasTable::from_aliases(&[DistroAlias {
            alias: "linux-small".into(),
            distros: vec!["ubuntu2204-small".into(), "rhel8-small".into()],
        }]);
        assert_eq!(table.resolve("linux-small"), "ubuntu2204-small");
        assert_eq!(table.resolve("windows"), "windows");
    }

    #[test]
    fn empty_config_fields() {
        assert!(ProjectConfigFields::default().is_empty());
        let fields = ProjectConfigFields {
            build_baron_settings: Some(serde_json::json!({"ticket_search_projects": ["EVG"]})),
            ..Default::default()
        };
        assert!(!fields.is_empty());
    }

    #[test]
    fn subscription_id_is_stable_per_child() {
        let sub = Subscription::for_child(
            &PatchId::from("parent"),
            ChildPatchSubscriber {
                parent_status: "success".into(),
                child_patch_id: PatchId::from("child"),
                requester: Requester::Patch,
            },
        );
        assert_eq!(sub.id, "parent-child");
    }
}
