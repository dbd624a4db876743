//! Build/Task materialization.
//!
//! Turns the selected pairs of one variant into unpersisted [`Build`] and
//! [`Task`] documents. Dependency edges are resolved through the
//! [`TaskIdTable`]; a dependency on a pair that has no id (not selected, not
//! already in the version) is dropped.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use tracing::debug;

use patchflow_core::pairs::TaskVariantPairs;
use patchflow_core::project::{Project, ResolvedTask};
use patchflow_core::records::DistroAliasTable;
use patchflow_core::types::{BuildId, Requester, TaskId, TaskStatus, VersionStatus};
use patchflow_core::version::{Build, Dependency, Task, Version};

use crate::error::UnknownVariant;
use crate::task_ids::{build_id, TaskIdTable};

const ALL: &str = "*";

/// Inputs shared by every variant materialized for one version.
#[derive(Debug, Clone, Copy)]
pub struct TaskCreationInfo<'a> {
    pub project: &'a Project,
    /// Project identifier used in generated ids.
    pub identifier: &'a str,
    pub version: &'a Version,
    pub pairs: &'a TaskVariantPairs,
    pub task_ids: &'a TaskIdTable,
    pub distros: &'a DistroAliasTable,
    pub activated_by: &'a str,
    pub create_time: DateTime<Utc>,
}

/// Build and tasks for `variant`, not inserted anywhere.
///
/// The build lists its tasks in creation order: execution tasks, then
/// display tasks. An empty task list is returned as-is; skipping it is the
/// caller's decision.
pub fn create_build_from_version_no_insert(
    info: &TaskCreationInfo<'_>,
    variant: &str,
) -> Result<(Build, Vec<Task>), UnknownVariant> {
    let bv = info
        .project
        .find_build_variant(variant)
        .ok_or_else(|| UnknownVariant(variant.to_string()))?;

    let id = info
        .task_ids
        .get_build(variant)
        .cloned()
        .unwrap_or_else(|| build_id(info.identifier, variant, info.version));
    let tasks = create_tasks_for_build(info, variant, &id, &BTreeSet::new());
    let build = Build {
        id,
        version: info.version.id.clone(),
        build_variant: variant.to_string(),
        display_name: bv.display_name_or_name().to_string(),
        project: info.identifier.to_string(),
        revision: info.version.revision.clone(),
        requester: info.version.requester,
        create_time: info.create_time,
        activated: info.version.activated,
        status: VersionStatus::Created,
        tasks: tasks.iter().map(|t| t.id.clone()).collect(),
    };
    Ok((build, tasks))
}

/// Task documents for the selected pairs of `variant` whose names are not in
/// `existing`.
pub fn create_tasks_for_build(
    info: &TaskCreationInfo<'_>,
    variant: &str,
    build: &BuildId,
    existing: &BTreeSet<String>,
) -> Vec<Task> {
    let mut tasks = Vec::new();

    for name in info.pairs.exec_tasks.task_names(variant) {
        if existing.contains(name) {
            continue;
        }
        let Some(resolved) = info.project.find_task_for_variant(name, variant) else {
            debug!(variant, task = name, "skipping task the project doesn't schedule");
            continue;
        };
        let Some(id) = info.task_ids.get_exec(variant, name) else {
            continue;
        };
        tasks.push(exec_task(info, build, id.clone(), &resolved));
    }

    for name in info.pairs.display_tasks.task_names(variant) {
        if existing.contains(name) {
            continue;
        }
        let Some(id) = info.task_ids.get_display(variant, name) else {
            continue;
        };
        let execution_tasks: Vec<TaskId> = info
            .pairs
            .display_exec_tasks(variant, name)
            .iter()
            .filter_map(|et| info.task_ids.get_exec(variant, et).cloned())
            .collect();
        tasks.push(display_task(info, variant, build, id.clone(), name, execution_tasks));
    }

    tasks
}

fn exec_task(info: &TaskCreationInfo<'_>, build: &BuildId, id: TaskId, resolved: &ResolvedTask) -> Task {
    let version = info.version;
    let activated = version.activated && resolved.activate;
    Task {
        id,
        display_name: resolved.name.clone(),
        build_id: build.clone(),
        build_variant: resolved.variant.clone(),
        version: version.id.clone(),
        project: info.identifier.to_string(),
        revision: version.revision.clone(),
        requester: version.requester,
        create_time: info.create_time,
        distro_id: resolved.run_on.first().map(|d| info.distros.resolve(d)),
        priority: resolved.priority,
        activated,
        activated_by: if activated {
            info.activated_by.to_string()
        } else {
            String::new()
        },
        status: TaskStatus::Undispatched,
        depends_on: dependencies(info, resolved),
        num_dependents: 0,
        generate_task: resolved.generate_tasks,
        estimated_num_activated_generated_tasks: resolved
            .estimated_generated_tasks
            .filter(|_| resolved.generate_tasks),
        essential_to_succeed: activated && version.requester == Requester::GithubPr,
        display_only: false,
        execution_tasks: vec![],
        display_task_id: owning_display_task(info, &resolved.variant, &resolved.name),
        aborted: false,
        abort_info: None,
    }
}

fn display_task(
    info: &TaskCreationInfo<'_>,
    variant: &str,
    build: &BuildId,
    id: TaskId,
    name: &str,
    execution_tasks: Vec<TaskId>,
) -> Task {
    let version = info.version;
    Task {
        id,
        display_name: name.to_string(),
        build_id: build.clone(),
        build_variant: variant.to_string(),
        version: version.id.clone(),
        project: info.identifier.to_string(),
        revision: version.revision.clone(),
        requester: version.requester,
        create_time: info.create_time,
        distro_id: None,
        priority: 0,
        activated: version.activated,
        activated_by: String::new(),
        status: TaskStatus::Undispatched,
        depends_on: vec![],
        num_dependents: 0,
        generate_task: false,
        estimated_num_activated_generated_tasks: None,
        essential_to_succeed: false,
        display_only: true,
        execution_tasks,
        display_task_id: None,
        aborted: false,
        abort_info: None,
    }
}

/// Id of the selected display task grouping `task`, if any.
fn owning_display_task(info: &TaskCreationInfo<'_>, variant: &str, task: &str) -> Option<TaskId> {
    info.pairs
        .display_tasks
        .task_names(variant)
        .into_iter()
        .find(|dt| info.pairs.display_exec_tasks(variant, dt).iter().any(|et| et == task))
        .and_then(|dt| info.task_ids.get_display(variant, dt).cloned())
}

fn dependencies(info: &TaskCreationInfo<'_>, task: &ResolvedTask) -> Vec<Dependency> {
    let mut out: Vec<Dependency> = Vec::new();
    let mut seen = BTreeSet::new();
    let selected_variants = info.pairs.exec_tasks.variants();

    for dep in &task.depends_on {
        let variants: Vec<&str> = match dep.variant.as_deref() {
            None | Some("") => vec![task.variant.as_str()],
            Some(ALL) => selected_variants.clone(),
            Some(v) => vec![v],
        };
        for variant in variants {
            let names: Vec<&str> = if dep.name == ALL {
                info.pairs.exec_tasks.task_names(variant)
            } else {
                vec![dep.name.as_str()]
            };
            for name in names {
                if variant == task.variant && name == task.name {
                    continue;
                }
                let Some(id) = info.task_ids.get_exec(variant, name) else {
                    continue;
                };
                if seen.insert(id.clone()) {
                    out.push(Dependency {
                        task_id: id.clone(),
                        status: dep.status.clone(),
                    });
                }
            }
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Dependents
// ---------------------------------------------------------------------------

/// How many tasks in `tasks` depend on each id.
pub fn count_dependents<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> BTreeMap<TaskId, u32> {
    let mut counts: BTreeMap<TaskId, u32> = BTreeMap::new();
    for task in tasks {
        let distinct: BTreeSet<&TaskId> = task.depends_on.iter().map(|d| &d.task_id).collect();
        for id in distinct {
            *counts.entry(id.clone()).or_default() += 1;
        }
    }
    counts
}

/// Set `num_dependents` on every task to the number of other tasks in the
/// slice that depend on it.
pub fn set_num_dependents(tasks: &mut [Task]) {
    let counts = count_dependents(tasks.iter());
    for task in tasks.iter_mut() {
        task.num_dependents = counts.get(&task.id).copied().unwrap_or(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use patchflow_core::patch::{DisplayTask, VariantTasks};
    use patchflow_core::project::{
        BuildVariant, BuildVariantTaskUnit, DisplayTaskDefinition, ProjectTask, TaskDependency,
    };
    use patchflow_core::records::DistroAlias;
    use patchflow_core::types::VersionId;

    fn project() -> Project {
        let unit = |name: &str, activate: Option<bool>| BuildVariantTaskUnit {
            name: name.into(),
            activate,
            ..Default::default()
        };
        let task = |name: &str, deps: &[&str]| ProjectTask {
            name: name.into(),
            depends_on: deps
                .iter()
                .map(|d| TaskDependency {
                    name: d.to_string(),
                    variant: None,
                    status: None,
                    patch_optional: false,
                })
                .collect(),
            ..Default::default()
        };
        Project {
            identifier: "proj".into(),
            build_variants: vec![BuildVariant {
                name: "linux".into(),
                display_name: "Linux".into(),
                run_on: vec!["ubuntu-alias".into()],
                tasks: vec![
                    unit("compile", None),
                    unit("unit", None),
                    unit("lint", Some(false)),
                    unit("bench", None),
                ],
                display_tasks: vec![DisplayTaskDefinition {
                    name: "checks".into(),
                    execution_tasks: vec!["unit".into(), "lint".into()],
                }],
            }],
            tasks: vec![
                task("compile", &[]),
                task("unit", &["compile"]),
                task("lint", &["compile"]),
                task("bench", &["compile", "missing"]),
            ],
            modules: vec![],
        }
    }

    fn version(requester: Requester) -> Version {
        Version {
            id: VersionId::from("v1"),
            create_time: Utc::now(),
            identifier: "proj".into(),
            revision: "abc".into(),
            author: "dev".into(),
            author_id: "dev".into(),
            author_email: String::new(),
            message: String::new(),
            build_ids: vec![],
            build_variants: vec![],
            status: VersionStatus::Created,
            requester,
            parent_patch_id: None,
            parent_patch_number: 0,
            project_storage_method: None,
            branch: "main".into(),
            revision_order_number: 1,
            parameters: vec![],
            activated: true,
        }
    }

    fn materialize(requester: Requester, selection: &[VariantTasks]) -> (Build, Vec<Task>) {
        let project = project();
        let version = version(requester);
        let pairs = TaskVariantPairs::expand(selection);
        let mut ids = TaskIdTable::new();
        ids.allocate("proj", &version, &pairs);
        let distros = DistroAliasTable::from_aliases(&[DistroAlias {
            alias: "ubuntu-alias".into(),
            distros: vec!["ubuntu2204-large".into()],
        }]);
        let info = TaskCreationInfo {
            project: &project,
            identifier: "proj",
            version: &version,
            pairs: &pairs,
            task_ids: &ids,
            distros: &distros,
            activated_by: "dev",
            create_time: version.create_time,
        };
        let (build, mut tasks) = create_build_from_version_no_insert(&info, "linux").expect("build");
        set_num_dependents(&mut tasks);
        (build, tasks)
    }

    fn by_name<'a>(tasks: &'a [Task], name: &str) -> &'a Task {
        tasks.iter().find(|t| t.display_name == name).expect(name)
    }

    fn selection(tasks: &[&str], display: Option<(&str, &[&str])>) -> Vec<VariantTasks> {
        vec![VariantTasks {
            variant: "linux".into(),
            tasks: tasks.iter().map(|t| t.to_string()).collect(),
            display_tasks: display
                .map(|(name, exec)| DisplayTask {
                    name: name.into(),
                    exec_tasks: exec.iter().map(|t| t.to_string()).collect(),
                })
                .into_iter()
                .collect(),
        }]
    }

    #[test]
    fn build_lists_every_task_and_resolves_distro() {
        let (build, tasks) = materialize(Requester::Patch, &selection(&["compile", "unit"], None));
        assert_eq!(build.display_name, "Linux");
        assert_eq!(build.tasks.len(), 2);
        assert_eq!(build.tasks, tasks.iter().map(|t| t.id.clone()).collect::<Vec<_>>());
        assert_eq!(
            by_name(&tasks, "compile").distro_id.as_deref(),
            Some("ubuntu2204-large")
        );
    }

    #[test]
    fn dependencies_outside_selection_are_dropped() {
        let (_, tasks) = materialize(Requester::Patch, &selection(&["compile", "bench"], None));
        let bench = by_name(&tasks, "bench");
        assert_eq!(bench.depends_on.len(), 1);
        assert_eq!(bench.depends_on[0].task_id, by_name(&tasks, "compile").id);
        assert_eq!(by_name(&tasks, "compile").num_dependents, 1);
    }

    #[test]
    fn unit_activate_false_creates_inactive_task() {
        let (_, tasks) = materialize(Requester::Patch, &selection(&["compile", "lint"], None));
        let lint = by_name(&tasks, "lint");
        assert!(!lint.activated);
        assert!(lint.activated_by.is_empty());
        assert_eq!(lint.activation_weight(), 0);
    }

    #[test]
    fn display_task_references_execution_tasks() {
        let (build, tasks) = materialize(
            Requester::Patch,
            &selection(&["compile"], Some(("checks", &["unit", "lint"]))),
        );
        let checks = by_name(&tasks, "checks");
        assert!(checks.display_only);
        assert_eq!(
            checks.execution_tasks,
            vec![by_name(&tasks, "unit").id.clone(), by_name(&tasks, "lint").id.clone()]
        );
        assert_eq!(by_name(&tasks, "unit").display_task_id.as_ref(), Some(&checks.id));
        assert_eq!(build.tasks.last(), Some(&checks.id));
        assert_eq!(by_name(&tasks, "compile").num_dependents, 2);
    }

    #[test]
    fn github_pr_tasks_are_essential() {
        let (_, tasks) = materialize(Requester::GithubPr, &selection(&["compile", "lint"], None));
        assert!(by_name(&tasks, "compile").essential_to_succeed);
        assert!(!by_name(&tasks, "lint").essential_to_succeed);
    }

    #[test]
    fn unknown_variant_is_an_error() {
        let project = project();
        let version = version(Requester::Patch);
        let pairs = TaskVariantPairs::default();
        let ids = TaskIdTable::new();
        let distros = DistroAliasTable::default();
        let info = TaskCreationInfo {
            project: &project,
            identifier: "proj",
            version: &version,
            pairs: &pairs,
            task_ids: &ids,
            distros: &distros,
            activated_by: "dev",
            create_time: version.create_time,
        };
        let err = create_build_from_version_no_insert(&info, "macos").unwrap_err();
        assert_eq!(err, UnknownVariant("macos".into()));
    }
}
