//! Embedded document store.
//!
//! # Storage layout
//!
//! ```text
//! ~/.patchflow/
//!   store.json   (every collection in one snapshot, mode 0600)
//! ```
//!
//! # Transactions
//!
//! [`Store::transaction`] holds the write lock for the whole closure, runs it
//! against a staged copy of [`Documents`], writes the snapshot and only then
//! publishes the copy. An error anywhere leaves the store untouched. The lock
//! is not re-entrant: never start a transaction from inside another one.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{io_err, StoreError};
use crate::patch::{AbortInfo, Patch, TriggerIntent};
use crate::paths;
use crate::records::{DistroAlias, ProjectAlias, ProjectConfig, ProjectRef, Subscription, User};
use crate::types::{BuildId, PatchId, Requester, TaskId, TaskStatus, VersionId};
use crate::version::{Build, Manifest, Task, Version};

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

/// A project definition stored as configuration text, keyed by the patch or
/// version it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParserProjectDoc {
    pub id: String,
    pub config: String,
    pub create_time: DateTime<Utc>,
}

/// Every collection the engine reads or writes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Documents {
    patches: BTreeMap<PatchId, Patch>,
    versions: BTreeMap<VersionId, Version>,
    builds: BTreeMap<BuildId, Build>,
    tasks: BTreeMap<TaskId, Task>,
    manifests: BTreeMap<String, Manifest>,
    project_configs: BTreeMap<String, ProjectConfig>,
    parser_projects: BTreeMap<String, ParserProjectDoc>,
    project_refs: BTreeMap<String, ProjectRef>,
    project_aliases: Vec<ProjectAlias>,
    users: BTreeMap<String, User>,
    /// Keyed by child patch id.
    trigger_intents: BTreeMap<PatchId, TriggerIntent>,
    subscriptions: BTreeMap<String, Subscription>,
    distro_aliases: Vec<DistroAlias>,
    /// Out-of-line diff text keyed by patch file id.
    patch_contents: BTreeMap<String, String>,
}

// ---- patches ---------------------------------------------------------------

impl Documents {
    pub fn patch(&self, id: &PatchId) -> Option<&Patch> {
        self.patches.get(id)
    }

    pub fn patch_mut(&mut self, id: &PatchId) -> Result<&mut Patch, StoreError> {
        self.patches
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found("patch", id.as_str()))
    }

    /// Patches for PR `pr_number` on `owner/repo` created before `created_before`.
    pub fn patches_matching_github_pr(
        &self,
        owner: &str,
        repo: &str,
        pr_number: u64,
        created_before: DateTime<Utc>,
    ) -> Vec<&Patch> {
        self.patches
            .values()
            .filter(|p| p.create_time < created_before)
            .filter(|p| {
                p.github_patch_data.as_ref().is_some_and(|d| {
                    d.base_owner == owner && d.base_repo == repo && d.pr_number == pr_number
                })
            })
            .collect()
    }

    pub fn insert_patch(&mut self, patch: Patch) -> Result<(), StoreError> {
        if self.patches.contains_key(&patch.id) {
            return Err(StoreError::duplicate("patch", patch.id.as_str()));
        }
        self.patches.insert(patch.id.clone(), patch);
        Ok(())
    }

    /// Removes the patch. Returns whether it existed.
    pub fn remove_patch(&mut self, id: &PatchId) -> bool {
        self.patches.remove(id).is_some()
    }

    /// Link the patch to `version` and mark it activated.
    ///
    /// Fails with [`StoreError::AlreadyFinalized`] when a version is already
    /// linked; this is the only place a patch gains a version.
    pub fn set_patch_finalized(&mut self, id: &PatchId, version: &VersionId) -> Result<(), StoreError> {
        let patch = self.patch_mut(id)?;
        if let Some(existing) = patch.version.as_ref().filter(|v| !v.as_str().is_empty()) {
            return Err(StoreError::AlreadyFinalized {
                patch: id.to_string(),
                version: existing.to_string(),
            });
        }
        patch.version = Some(version.clone());
        patch.activated = true;
        Ok(())
    }
}

// ---- versions, builds, tasks ------------------------------------------------

impl Documents {
    pub fn version(&self, id: &VersionId) -> Option<&Version> {
        self.versions.get(id)
    }

    pub fn version_mut(&mut self, id: &VersionId) -> Result<&mut Version, StoreError> {
        self.versions
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found("version", id.as_str()))
    }

    pub fn insert_version(&mut self, version: Version) -> Result<(), StoreError> {
        if self.versions.contains_key(&version.id) {
            return Err(StoreError::duplicate("version", version.id.as_str()));
        }
        self.versions.insert(version.id.clone(), version);
        Ok(())
    }

    pub fn set_version_message(&mut self, id: &VersionId, message: &str) -> Result<(), StoreError> {
        self.version_mut(id)?.message = message.to_string();
        Ok(())
    }

    /// Activate or deactivate a version, its builds and its undispatched tasks.
    pub fn set_version_activation(
        &mut self,
        id: &VersionId,
        active: bool,
        caller: &str,
    ) -> Result<(), StoreError> {
        let version = self.version_mut(id)?;
        version.activated = active;
        for status in &mut version.build_variants {
            status.activated = active;
        }
        let build_ids = version.build_ids.clone();

        for build_id in &build_ids {
            if let Some(build) = self.builds.get_mut(build_id) {
                build.activated = active;
            }
        }
        for task in self.tasks.values_mut().filter(|t| &t.version == id) {
            if task.status == TaskStatus::Undispatched && task.activated != active {
                task.activated = active;
                task.activated_by = caller.to_string();
            }
        }
        Ok(())
    }

    /// Mark every dispatched or running task of the version aborted.
    /// Returns how many tasks were newly aborted.
    pub fn abort_version_tasks(&mut self, id: &VersionId, reason: &AbortInfo) -> usize {
        let mut aborted = 0;
        for task in self.tasks.values_mut().filter(|t| &t.version == id) {
            if task.status.is_in_flight() && !task.aborted {
                task.aborted = true;
                task.abort_info = Some(reason.clone());
                aborted += 1;
            }
        }
        aborted
    }

    pub fn build(&self, id: &BuildId) -> Option<&Build> {
        self.builds.get(id)
    }

    pub fn build_mut(&mut self, id: &BuildId) -> Result<&mut Build, StoreError> {
        self.builds
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found("build", id.as_str()))
    }

    pub fn builds_by_ids(&self, ids: &[BuildId]) -> Vec<&Build> {
        ids.iter().filter_map(|id| self.builds.get(id)).collect()
    }

    pub fn insert_build(&mut self, build: Build) -> Result<(), StoreError> {
        if self.builds.contains_key(&build.id) {
            return Err(StoreError::duplicate("build", build.id.as_str()));
        }
        self.builds.insert(build.id.clone(), build);
        Ok(())
    }

    pub fn task(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.get(id)
    }

    pub fn task_mut(&mut self, id: &TaskId) -> Result<&mut Task, StoreError> {
        self.tasks
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found("task", id.as_str()))
    }

    pub fn tasks_by_version(&self, id: &VersionId) -> Vec<&Task> {
        self.tasks.values().filter(|t| &t.version == id).collect()
    }

    pub fn tasks_by_build(&self, id: &BuildId) -> Vec<&Task> {
        self.tasks.values().filter(|t| &t.build_id == id).collect()
    }

    /// Insert every task whose id is free; report all that collided.
    pub fn insert_tasks_unordered(&mut self, tasks: Vec<Task>) -> Result<(), StoreError> {
        let mut duplicates = Vec::new();
        for task in tasks {
            if self.tasks.contains_key(&task.id) {
                duplicates.push(task.id.to_string());
                continue;
            }
            self.tasks.insert(task.id.clone(), task);
        }
        if duplicates.is_empty() {
            Ok(())
        } else {
            Err(StoreError::DuplicateTasks { ids: duplicates })
        }
    }
}

// ---- manifests, project definitions ----------------------------------------

impl Documents {
    pub fn manifest(&self, id: &str) -> Option<&Manifest> {
        self.manifests.get(id)
    }

    pub fn insert_manifest(&mut self, manifest: Manifest) -> Result<(), StoreError> {
        if self.manifests.contains_key(&manifest.id) {
            return Err(StoreError::duplicate("manifest", manifest.id.clone()));
        }
        self.manifests.insert(manifest.id.clone(), manifest);
        Ok(())
    }

    /// Manifest of the mainline version of `project` at `revision`.
    pub fn base_manifest(&self, project: &str, revision: &str) -> Option<&Manifest> {
        self.versions
            .values()
            .find(|v| {
                v.identifier == project && v.revision == revision && v.requester == Requester::Mainline
            })
            .and_then(|v| self.manifests.get(v.id.as_str()))
    }

    pub fn project_config(&self, id: &str) -> Option<&ProjectConfig> {
        self.project_configs.get(id)
    }

    pub fn insert_project_config(&mut self, config: ProjectConfig) -> Result<(), StoreError> {
        if self.project_configs.contains_key(&config.id) {
            return Err(StoreError::duplicate("project config", config.id.clone()));
        }
        self.project_configs.insert(config.id.clone(), config);
        Ok(())
    }

    pub fn parser_project(&self, id: &str) -> Option<&ParserProjectDoc> {
        self.parser_projects.get(id)
    }

    pub fn upsert_parser_project(&mut self, doc: ParserProjectDoc) {
        self.parser_projects.insert(doc.id.clone(), doc);
    }
}

// ---- reference data ----------------------------------------------------------

impl Documents {
    /// Look a project up by id, then by identifier.
    pub fn project_ref(&self, id_or_identifier: &str) -> Option<&ProjectRef> {
        self.project_refs.get(id_or_identifier).or_else(|| {
            self.project_refs
                .values()
                .find(|r| r.identifier == id_or_identifier)
        })
    }

    pub fn upsert_project_ref(&mut self, project_ref: ProjectRef) {
        self.project_refs.insert(project_ref.id.clone(), project_ref);
    }

    /// Stored aliases named `alias` for the project.
    pub fn aliases(&self, project_id: &str, alias: &str) -> Vec<&ProjectAlias> {
        self.project_aliases
            .iter()
            .filter(|a| a.project_id == project_id && a.alias == alias)
            .collect()
    }

    pub fn insert_alias(&mut self, alias: ProjectAlias) {
        self.project_aliases.push(alias);
    }

    pub fn user(&self, id: &str) -> Option<&User> {
        self.users.get(id)
    }

    pub fn user_mut(&mut self, id: &str) -> Option<&mut User> {
        self.users.get_mut(id)
    }

    pub fn upsert_user(&mut self, user: User) {
        self.users.insert(user.id.clone(), user);
    }

    pub fn distro_aliases(&self) -> &[DistroAlias] {
        &self.distro_aliases
    }

    pub fn upsert_distro_alias(&mut self, alias: DistroAlias) {
        match self.distro_aliases.iter_mut().find(|a| a.alias == alias.alias) {
            Some(existing) => *existing = alias,
            None => self.distro_aliases.push(alias),
        }
    }

    pub fn patch_contents(&self, file_id: &str) -> Option<&str> {
        self.patch_contents.get(file_id).map(String::as_str)
    }

    pub fn insert_patch_contents(&mut self, file_id: impl Into<String>, diff: impl Into<String>) {
        self.patch_contents.insert(file_id.into(), diff.into());
    }
}

// ---- triggers ----------------------------------------------------------------

impl Documents {
    pub fn trigger_intent(&self, child: &PatchId) -> Option<&TriggerIntent> {
        self.trigger_intents.get(child)
    }

    pub fn upsert_trigger_intent(&mut self, intent: TriggerIntent) {
        self.trigger_intents.insert(intent.child_patch.clone(), intent);
    }

    pub fn upsert_subscription(&mut self, subscription: Subscription) {
        self.subscriptions.insert(subscription.id.clone(), subscription);
    }

    pub fn subscriptions_for_parent(&self, parent: &PatchId) -> Vec<&Subscription> {
        self.subscriptions
            .values()
            .filter(|s| &s.parent_patch_id == parent)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Shared handle over [`Documents`], optionally backed by a JSON snapshot.
#[derive(Debug, Default)]
pub struct Store {
    docs: RwLock<Documents>,
    snapshot: Option<PathBuf>,
}

impl Store {
    /// A store that never touches disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open the snapshot under `home`; a missing snapshot is an empty store.
    pub fn open_at(home: &Path) -> Result<Self, StoreError> {
        let path = paths::store_path_at(home);
        let docs = if path.exists() {
            let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
            serde_json::from_str(&contents).map_err(|source| StoreError::Parse {
                path: path.clone(),
                source,
            })?
        } else {
            Documents::default()
        };
        Ok(Self {
            docs: RwLock::new(docs),
            snapshot: Some(path),
        })
    }

    /// `open_at` convenience wrapper.
    pub fn open() -> Result<Self, StoreError> {
        Self::open_at(&paths::home().ok_or(StoreError::HomeNotFound)?)
    }

    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot.as_deref()
    }

    /// Run `f` against a consistent view.
    pub fn read<T>(&self, f: impl FnOnce(&Documents) -> T) -> T {
        f(&self.docs.read())
    }

    pub fn find_patch(&self, id: &PatchId) -> Option<Patch> {
        self.read(|docs| docs.patch(id).cloned())
    }

    pub fn find_version(&self, id: &VersionId) -> Option<Version> {
        self.read(|docs| docs.version(id).cloned())
    }

    /// All-or-nothing write. See the module docs.
    pub fn transaction<T, E>(&self, f: impl FnOnce(&mut Documents) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let mut guard = self.docs.write();
        let mut staged = guard.clone();
        let out = f(&mut staged)?;
        if let Some(path) = &self.snapshot {
            write_snapshot(path, &staged)?;
        }
        *guard = staged;
        debug!(snapshot = ?self.snapshot, "store commit");
        Ok(out)
    }
}

/// Serialize → `.json.tmp` sibling → `chmod 0600` → `rename`.
fn write_snapshot(path: &Path, docs: &Documents) -> Result<(), StoreError> {
    if let Some(dir) = path.parent() {
        if !dir.exists() {
            std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
            paths::set_dir_permissions(dir).map_err(|e| io_err(dir, e))?;
        }
    }
    let tmp = path.with_extension("json.tmp");
    let json = serde_json::to_string_pretty(docs)?;
    std::fs::write(&tmp, json).map_err(|e| io_err(&tmp, e))?;
    paths::set_file_permissions(&tmp).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| io_err(path, e))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::GithubPatchData;
    use crate::types::VersionStatus;

    fn patch(id: &str) -> Patch {
        Patch::new(id, "proj", "abc", Utc::now())
    }

    fn version(id: &str) -> Version {
        Version {
            id: VersionId::from(id),
            create_time: Utc::now(),
            identifier: "proj".into(),
            revision: "abc".into(),
            author: String::new(),
            author_id: String::new(),
            author_email: String::new(),
            message: String::new(),
            build_ids: vec![],
            build_variants: vec![],
            status: VersionStatus::Created,
            requester: Requester::Patch,
            parent_patch_id: None,
            parent_patch_number: 0,
            project_storage_method: None,
            branch: String::new(),
            revision_order_number: 0,
            parameters: vec![],
            activated: true,
        }
    }

    fn task(id: &str, version: &str, status: TaskStatus) -> Task {
        Task {
            id: TaskId::from(id),
            display_name: id.into(),
            build_id: BuildId::from("b1"),
            build_variant: "linux".into(),
            version: VersionId::from(version),
            project: "proj".into(),
            revision: "abc".into(),
            requester: Requester::Patch,
            create_time: Utc::now(),
            distro_id: None,
            priority: 0,
            activated: true,
            activated_by: String::new(),
            status,
            depends_on: vec![],
            num_dependents: 0,
            generate_task: false,
            estimated_num_activated_generated_tasks: None,
            essential_to_succeed: false,
            display_only: false,
            execution_tasks: vec![],
            display_task_id: None,
            aborted: false,
            abort_info: None,
        }
    }

    #[test]
    fn failed_transaction_leaves_store_untouched() {
        let store = Store::in_memory();
        let res: Result<(), StoreError> = store.transaction(|docs| {
            docs.insert_patch(patch("p1"))?;
            docs.insert_patch(patch("p1"))
        });
        assert!(matches!(res, Err(StoreError::Duplicate { collection: "patch", .. })));
        assert!(store.find_patch(&PatchId::from("p1")).is_none());
    }

    #[test]
    fn second_finalize_is_rejected() {
        let store = Store::in_memory();
        store
            .transaction(|docs| docs.insert_patch(patch("p1")))
            .expect("insert");
        let id = PatchId::from("p1");
        store
            .transaction(|docs| docs.set_patch_finalized(&id, &VersionId::from("p1")))
            .expect("first");
        let err = store
            .transaction(|docs| docs.set_patch_finalized(&id, &VersionId::from("other")))
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyFinalized { .. }));
        assert_eq!(
            store.find_patch(&id).and_then(|p| p.version),
            Some(VersionId::from("p1"))
        );
    }

    #[test]
    fn unordered_insert_keeps_non_duplicates() {
        let mut docs = Documents::default();
        docs.insert_tasks_unordered(vec![task("t1", "v1", TaskStatus::Undispatched)])
            .expect("first");
        let err = docs
            .insert_tasks_unordered(vec![
                task("t1", "v1", TaskStatus::Undispatched),
                task("t2", "v1", TaskStatus::Undispatched),
            ])
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateTasks { ref ids } if ids == &["t1".to_string()]));
        assert!(docs.task(&TaskId::from("t2")).is_some());
    }

    #[test]
    fn deactivation_skips_dispatched_tasks() {
        let mut docs = Documents::default();
        docs.insert_version(version("v1")).expect("version");
        docs.insert_tasks_unordered(vec![
            task("waiting", "v1", TaskStatus::Undispatched),
            task("running", "v1", TaskStatus::Started),
        ])
        .expect("tasks");

        docs.set_version_activation(&VersionId::from("v1"), false, "admin")
            .expect("deactivate");
        let aborted = docs.abort_version_tasks(&VersionId::from("v1"), &AbortInfo {
            user: "admin".into(),
            ..Default::default()
        });

        assert!(!docs.version(&VersionId::from("v1")).expect("v1").activated);
        let waiting = docs.task(&TaskId::from("waiting")).expect("waiting");
        assert!(!waiting.activated);
        assert_eq!(waiting.activated_by, "admin");
        let running = docs.task(&TaskId::from("running")).expect("running");
        assert!(running.activated);
        assert!(running.aborted);
        assert_eq!(aborted, 1);
    }

    #[test]
    fn github_pr_predicate() {
        let mut docs = Documents::default();
        let mut pr = patch("pr");
        pr.github_patch_data = Some(GithubPatchData {
            pr_number: 12,
            base_owner: "evg".into(),
            base_repo: "app".into(),
            head_hash: "h".into(),
            ..Default::default()
        });
        docs.insert_patch(pr).expect("pr");
        docs.insert_patch(patch("cli")).expect("cli");

        let later = Utc::now() + chrono::Duration::seconds(1);
        let found = docs.patches_matching_github_pr("evg", "app", 12, later);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, PatchId::from("pr"));
        assert!(docs.patches_matching_github_pr("evg", "app", 13, later).is_empty());
    }

    #[test]
    fn project_ref_by_identifier() {
        let mut docs = Documents::default();
        docs.upsert_project_ref(ProjectRef {
            id: "5f3a".into(),
            identifier: "proj".into(),
            owner: "evg".into(),
            repo: "app".into(),
            branch: "main".into(),
            remote_path: "ci.yml".into(),
            enabled: true,
            version_control_enabled: false,
        });
        assert!(docs.project_ref("5f3a").is_some());
        assert_eq!(docs.project_ref("proj").map(|r| r.id.as_str()), Some("5f3a"));
    }
}
