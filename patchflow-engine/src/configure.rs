//! Reconfiguration: change a patch's selection, description or parameters.
//!
//! An unfinalized patch only has its stored fields updated. A finalized one
//! additionally gets the builds and tasks it is missing, and previously
//! inactive tasks that are now selected are activated, all in one store
//! transaction against the existing version.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use patchflow_config::get_patched_project;
use patchflow_config::patched::find_and_translate_project_for_patch;
use patchflow_core::pairs::{normalize_display_requests, validate_pairs, TaskVariantPairs};
use patchflow_core::patch::{Parameter, Patch, VariantTasks};
use patchflow_core::project::Project;
use patchflow_core::records::DistroAliasTable;
use patchflow_core::types::{PatchId, TaskId, TaskStatus};
use patchflow_core::version::{Task, Version, VersionBuildStatus};
use patchflow_core::Documents;

use crate::env::PatchEnv;
use crate::error::ConfigureError;
use crate::materialize::{
    count_dependents, create_build_from_version_no_insert, create_tasks_for_build, set_num_dependents,
    TaskCreationInfo,
};
use crate::quota::update_scheduling_limit;
use crate::task_ids::TaskIdTable;

/// A reconfiguration request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatchUpdate {
    pub description: String,
    /// Recorded as `activated_by` on tasks this request activates.
    pub caller: String,
    /// Ignored once the patch is finalized.
    pub parameters: Vec<Parameter>,
    pub variants_tasks: Vec<VariantTasks>,
}

/// What a reconfiguration changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigureOutcome {
    pub patch: Patch,
    pub created_tasks: usize,
    pub activated_tasks: usize,
}

pub fn configure_patch(
    env: &PatchEnv,
    patch_id: &PatchId,
    update: PatchUpdate,
) -> Result<ConfigureOutcome, ConfigureError> {
    let patch = env
        .store
        .find_patch(patch_id)
        .ok_or_else(|| ConfigureError::PatchNotFound(patch_id.clone()))?;
    let project = project_for(env, &patch)?;

    let mut requested = update.variants_tasks.clone();
    normalize_display_requests(&project, &mut requested);
    let mut pairs = TaskVariantPairs::expand(&requested);
    match env
        .dependencies
        .include_dependencies(&project, &pairs.exec_tasks, patch.requester())
    {
        Ok(expanded) => pairs.exec_tasks = expanded,
        Err(e) => warn!(
            patch_id = %patch.id,
            error = %e,
            "error including dependencies for patch"
        ),
    }
    validate_pairs(&project, &pairs)?;
    let variants_tasks = pairs.collapse();

    if patch.is_github_pr_patch() {
        let selection = if variants_tasks.is_empty() {
            &patch.variants_tasks
        } else {
            &variants_tasks
        };
        let count = project.num_check_runs(selection);
        let limit = env.settings.check_run_limit;
        if count > limit {
            return Err(ConfigureError::CheckRunLimit { count, limit });
        }
    }

    let Some(version_id) = patch.version.clone().filter(|_| patch.is_finalized()) else {
        let patch = env.store.transaction(|docs| -> Result<Patch, ConfigureError> {
            let stored = docs.patch_mut(&patch.id)?;
            if !update.parameters.is_empty() {
                stored.parameters = update.parameters;
            }
            stored.description = update.description;
            if !variants_tasks.is_empty() {
                stored.variants_tasks = variants_tasks;
            }
            Ok(stored.clone())
        })?;
        return Ok(ConfigureOutcome {
            patch,
            created_tasks: 0,
            activated_tasks: 0,
        });
    };

    let identifier = env
        .store
        .read(|docs| docs.project_ref(&patch.project).map(|r| r.identifier.clone()))
        .unwrap_or_else(|| patch.project.clone());
    let now = env.clock.now();
    let limit = env.settings.max_hourly_patch_tasks;

    env.store.transaction(|docs| -> Result<ConfigureOutcome, ConfigureError> {
        let version = docs
            .version(&version_id)
            .cloned()
            .ok_or_else(|| ConfigureError::VersionNotFound {
                patch: patch.id.clone(),
                version: version_id.to_string(),
            })?;
        if version.message != update.description {
            docs.set_version_message(&version.id, &update.description)?;
        }

        let mut added = Incremental::default();
        if !variants_tasks.is_empty() {
            let distros = DistroAliasTable::from_aliases(docs.distro_aliases());
            added = add_new_tasks_and_builds(
                docs,
                &Scope {
                    project: &project,
                    identifier: &identifier,
                    version: &version,
                    pairs: &pairs,
                    distros: &distros,
                    caller: &update.caller,
                    now,
                },
            )?;
            update_scheduling_limit(docs, &patch.author, version.requester, added.weight, limit, now)?;
        }

        let stored = docs.patch_mut(&patch.id)?;
        stored.description = update.description;
        if !variants_tasks.is_empty() {
            stored.variants_tasks = variants_tasks;
        }
        if added.created > 0 || added.activated > 0 {
            stored.is_reconfigured = true;
        }
        Ok(ConfigureOutcome {
            patch: stored.clone(),
            created_tasks: added.created,
            activated_tasks: added.activated,
        })
    })
}

/// The stored project of the patch, or the freshly patched one for a patch
/// that hasn't stored it yet.
fn project_for(env: &PatchEnv, patch: &Patch) -> Result<Project, ConfigureError> {
    if patch.project_storage_method.is_some() {
        let (project, _) = find_and_translate_project_for_patch(&env.store, patch)?;
        return Ok(project);
    }
    Ok(get_patched_project(&env.store, &env.sources, patch)?.project)
}

// ---------------------------------------------------------------------------
// Incremental materialization
// ---------------------------------------------------------------------------

struct Scope<'a> {
    project: &'a Project,
    identifier: &'a str,
    version: &'a Version,
    pairs: &'a TaskVariantPairs,
    distros: &'a DistroAliasTable,
    caller: &'a str,
    now: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Incremental {
    created: usize,
    activated: usize,
    /// Quota weight of everything created active or newly activated.
    weight: u32,
}

fn add_new_tasks_and_builds(docs: &mut Documents, scope: &Scope<'_>) -> Result<Incremental, ConfigureError> {
    let version = scope.version;
    let existing: Vec<Task> = docs
        .tasks_by_version(&version.id)
        .into_iter()
        .cloned()
        .collect();
    let existing_builds = docs.builds_by_ids(&version.build_ids);
    let builds_by_variant: BTreeMap<String, _> = existing_builds
        .iter()
        .map(|b| (b.build_variant.clone(), b.id.clone()))
        .collect();

    let mut task_ids = TaskIdTable::new();
    task_ids.seed_existing(&existing);
    task_ids.seed_builds(existing_builds);
    task_ids.allocate(scope.identifier, version, scope.pairs);

    let creation = TaskCreationInfo {
        project: scope.project,
        identifier: scope.identifier,
        version,
        pairs: scope.pairs,
        task_ids: &task_ids,
        distros: scope.distros,
        activated_by: scope.caller,
        create_time: scope.now,
    };

    let variants: BTreeSet<&str> = scope
        .pairs
        .exec_tasks
        .variants()
        .into_iter()
        .chain(scope.pairs.display_tasks.variants())
        .collect();

    let mut new_tasks: Vec<Task> = Vec::new();
    for variant in variants {
        match builds_by_variant.get(variant) {
            Some(build_id) => {
                let present: BTreeSet<String> = existing
                    .iter()
                    .filter(|t| &t.build_id == build_id)
                    .map(|t| t.display_name.clone())
                    .collect();
                let tasks = create_tasks_for_build(&creation, variant, build_id, &present);
                let build = docs.build_mut(build_id)?;
                build.tasks.extend(tasks.iter().map(|t| t.id.clone()));
                new_tasks.extend(tasks);
            }
            None => {
                let (build, tasks) = create_build_from_version_no_insert(&creation, variant)?;
                if tasks.is_empty() {
                    debug!(variant, version = %version.id, "no new tasks for variant");
                    continue;
                }
                let stored = docs.version_mut(&version.id)?;
                stored.build_ids.push(build.id.clone());
                stored.build_variants.push(VersionBuildStatus {
                    build_variant: build.build_variant.clone(),
                    build_id: build.id.clone(),
                    display_name: build.display_name.clone(),
                    activated: true,
                });
                docs.insert_build(build)?;
                new_tasks.extend(tasks);
            }
        }
    }

    let mut out = Incremental {
        created: new_tasks.len(),
        ..Default::default()
    };

    // Newly selected tasks that already exist but were left inactive.
    for task in &existing {
        let selected = !task.display_only
            && scope.pairs.exec_tasks.contains(&task.build_variant, &task.display_name);
        if !selected || task.activated || task.status != TaskStatus::Undispatched {
            continue;
        }
        let stored = docs.task_mut(&task.id)?;
        stored.activated = true;
        stored.activated_by = scope.caller.to_string();
        out.activated += 1;
        out.weight += stored.activation_weight();
        let build_id = stored.build_id.clone();
        docs.build_mut(&build_id)?.activated = true;
    }

    // Execution tasks that existed before their display task was added.
    for display in new_tasks.iter().filter(|t| t.display_only) {
        for member in &display.execution_tasks {
            if existing.iter().any(|t| &t.id == member) {
                docs.task_mut(member)?.display_task_id = Some(display.id.clone());
            }
        }
    }

    set_num_dependents(&mut new_tasks);
    let new_ids: BTreeSet<TaskId> = new_tasks.iter().map(|t| t.id.clone()).collect();
    for (id, count) in count_dependents(new_tasks.iter()) {
        if !new_ids.contains(&id) {
            docs.task_mut(&id)?.num_dependents += count;
        }
    }

    out.weight += new_tasks.iter().map(Task::activation_weight).sum::<u32>();
    docs.insert_tasks_unordered(new_tasks)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_deserializes_with_defaults() {
        let update: PatchUpdate = serde_json::from_str(
            r#"{"description": "retry", "variants_tasks": [{"variant": "linux", "tasks": ["unit"]}]}"#,
        )
        .expect("update");
        assert_eq!(update.description, "retry");
        assert!(update.parameters.is_empty());
        assert_eq!(update.variants_tasks[0].tasks, vec!["unit".to_string()]);
    }
}
