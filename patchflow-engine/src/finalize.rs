//! Finalize: turn a patch into a persisted version with concrete builds and
//! tasks.
//!
//! Everything up to the commit works on owned, in-memory documents. The
//! commit inserts the version, the settings projection, the manifest, the
//! builds and the tasks, charges the author's scheduling quota and links the
//! patch to its version in one store transaction. Child patches are chained
//! only after that transaction has been published.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use patchflow_config::patched::find_and_translate_project_for_patch;
use patchflow_config::{create_project_config, get_patched_project};
use patchflow_core::error::StoreError;
use patchflow_core::pairs::{legacy_cross_product, TaskVariantPairs};
use patchflow_core::patch::{Parameter, Patch, VariantTasks};
use patchflow_core::project::Project;
use patchflow_core::records::{is_patch_alias, DistroAliasTable, ProjectConfig, ProjectRef};
use patchflow_core::store::ParserProjectDoc;
use patchflow_core::types::{PatchId, Requester, StorageMethod, VersionId, VersionStatus};
use patchflow_core::version::{Build, Manifest, ManifestModule, Task, Version, VersionBuildStatus};
use patchflow_core::Documents;

use crate::chain::{finalize_or_subscribe_children, ChainState};
use crate::env::{Job, PatchEnv};
use crate::error::FinalizeError;
use crate::materialize::{create_build_from_version_no_insert, set_num_dependents, TaskCreationInfo};
use crate::quota::update_scheduling_limit;
use crate::task_ids::TaskIdTable;

/// Finalize `patch_id` for `requester` and return the committed version.
///
/// When the patch has children, they are finalized or subscribed after the
/// commit; a child failure is reported as [`FinalizeError::ChildPatches`]
/// even though the parent itself stays finalized.
pub fn finalize_patch(
    env: &PatchEnv,
    patch_id: &PatchId,
    requester: Requester,
) -> Result<Version, FinalizeError> {
    let mut chain = ChainState::new(patch_id);
    finalize_in_chain(env, patch_id, requester, &mut chain)
}

pub(crate) fn finalize_in_chain(
    env: &PatchEnv,
    patch_id: &PatchId,
    requester: Requester,
    chain: &mut ChainState,
) -> Result<Version, FinalizeError> {
    let patch = env
        .store
        .find_patch(patch_id)
        .ok_or_else(|| FinalizeError::PatchNotFound(patch_id.clone()))?;
    if let Some(version) = patch.version.as_ref().filter(|_| patch.is_finalized()) {
        return Err(FinalizeError::AlreadyFinalized {
            patch: patch.id.to_string(),
            version: version.to_string(),
        });
    }

    let staged = stage(env, &patch, requester)?;
    let version = staged.version.clone();
    let num_tasks = staged.tasks.len();
    let num_activated = staged.num_activated;
    commit(env, &patch, requester, staged)?;

    if num_tasks > env.settings.num_tasks_for_large_patch {
        info!(
            version = %version.id,
            num_tasks_activated = num_activated,
            total_tasks = num_tasks,
            "version has large number of activated tasks"
        );
    }
    env.enqueue(Job::VersionCreated {
        version: version.id.clone(),
    });

    if patch.is_parent() {
        finalize_or_subscribe_children(env, &patch, requester, chain)?;
    }
    Ok(version)
}

// ---------------------------------------------------------------------------
// Staging
// ---------------------------------------------------------------------------

/// Documents built for one finalize, not yet visible to anyone else.
#[derive(Debug)]
struct Staged {
    version: Version,
    project_config: Option<ProjectConfig>,
    manifest: Manifest,
    builds: Vec<Build>,
    tasks: Vec<Task>,
    num_activated: u32,
    /// Patched configuration text when it wasn't stored on the patch yet.
    fresh_config: Option<String>,
    patch_parameters: Vec<Parameter>,
    variants_tasks: Vec<VariantTasks>,
    now: DateTime<Utc>,
}

fn stage(env: &PatchEnv, patch: &Patch, requester: Requester) -> Result<Staged, FinalizeError> {
    let now = env.clock.now();
    let project_ref = env
        .store
        .read(|docs| docs.project_ref(&patch.project).cloned())
        .ok_or_else(|| FinalizeError::ProjectNotFound(patch.project.clone()))?;

    let (project, config_yaml, fresh_config) = resolve_project(env, patch)?;
    let project_config = if project_ref.version_control_enabled {
        create_project_config(&config_yaml, &project_ref.identifier)?.map(|mut config| {
            config.id = patch.id.to_string();
            config.project = patch.project.clone();
            config
        })
    } else {
        None
    };

    let distros = env
        .store
        .read(|docs| DistroAliasTable::from_aliases(docs.distro_aliases()));

    let (patch_parameters, parent_patch_number) = inherit_from_parent(env, patch)?;
    let parameters = env.store.read(|docs| {
        effective_parameters(docs, &project_ref, patch, project_config.as_ref(), &patch_parameters)
    });
    let author_email = env.store.read(|docs| author_email(docs, patch));

    let mut version = Version {
        id: VersionId::from(patch.id.as_str()),
        create_time: now,
        identifier: patch.project.clone(),
        revision: patch.githash.clone(),
        author: patch.author.clone(),
        author_id: patch.author.clone(),
        author_email,
        message: patch.description.clone(),
        build_ids: vec![],
        build_variants: vec![],
        status: VersionStatus::Created,
        requester,
        parent_patch_id: patch.triggers.parent_patch.clone(),
        parent_patch_number,
        project_storage_method: Some(StorageMethod::Db),
        branch: project_ref.branch.clone(),
        revision_order_number: patch.patch_number,
        parameters,
        activated: true,
    };

    let manifest = construct_manifest(env, patch, &version, &project_ref, &project)?;

    let pairs = selected_pairs(env, patch, &project, requester);
    if pairs.is_empty() {
        if patch.is_merge_queue_patch() {
            return Err(FinalizeError::MergeQueueNoTasks {
                project: patch.project.clone(),
                githash: patch.githash.clone(),
            });
        }
        return Err(FinalizeError::NoTasks);
    }
    let variants_tasks = pairs.collapse();

    let mut task_ids = TaskIdTable::new();
    task_ids.allocate(&project_ref.identifier, &version, &pairs);

    let mut builds = Vec::new();
    let mut tasks = Vec::new();
    {
        let creation = TaskCreationInfo {
            project: &project,
            identifier: &project_ref.identifier,
            version: &version,
            pairs: &pairs,
            task_ids: &task_ids,
            distros: &distros,
            activated_by: &patch.author,
            create_time: now,
        };
        let mut processed = BTreeSet::new();
        for variant in variant_order(patch, &pairs) {
            if !processed.insert(variant.clone()) {
                continue;
            }
            let (build, build_tasks) = create_build_from_version_no_insert(&creation, &variant)?;
            if build_tasks.is_empty() {
                info!(
                    variant = %variant,
                    version = %version.id,
                    "skipping empty build for patch version"
                );
                continue;
            }
            builds.push(build);
            tasks.extend(build_tasks);
        }
    }

    for build in &builds {
        version.build_ids.push(build.id.clone());
        version.build_variants.push(VersionBuildStatus {
            build_variant: build.build_variant.clone(),
            build_id: build.id.clone(),
            display_name: build.display_name.clone(),
            activated: true,
        });
    }

    set_num_dependents(&mut tasks);
    let num_activated = tasks.iter().map(Task::activation_weight).sum();

    Ok(Staged {
        version,
        project_config,
        manifest,
        builds,
        tasks,
        num_activated,
        fresh_config,
        patch_parameters,
        variants_tasks,
        now,
    })
}

/// The patch's project and configuration text. When the patch hasn't stored
/// its parser project yet it is produced now and returned as the third
/// element so the commit can store it.
fn resolve_project(
    env: &PatchEnv,
    patch: &Patch,
) -> Result<(Project, String, Option<String>), FinalizeError> {
    if patch.project_storage_method.is_some() {
        let (project, config_yaml) = find_and_translate_project_for_patch(&env.store, patch)?;
        return Ok((project, config_yaml, None));
    }
    let patched = get_patched_project(&env.store, &env.sources, patch)?;
    Ok((patched.project, patched.config_yaml.clone(), Some(patched.config_yaml)))
}

/// The child's parameters after adopting its parent's downstream parameters,
/// and the parent's patch number.
fn inherit_from_parent(env: &PatchEnv, patch: &Patch) -> Result<(Vec<Parameter>, u32), FinalizeError> {
    let Some(parent_id) = patch.triggers.parent_patch.as_ref() else {
        return Ok((patch.parameters.clone(), 0));
    };
    let parent = env
        .store
        .find_patch(parent_id)
        .ok_or_else(|| FinalizeError::PatchNotFound(parent_id.clone()))?;
    let merged = merge_parameters(
        patch
            .parameters
            .iter()
            .chain(&parent.triggers.downstream_parameters),
    );
    Ok((merged, parent.patch_number))
}

/// Later entries win key-for-key; first-seen key order is kept.
fn merge_parameters<'a>(params: impl IntoIterator<Item = &'a Parameter>) -> Vec<Parameter> {
    let mut out: Vec<Parameter> = Vec::new();
    for p in params {
        match out.iter_mut().find(|existing| existing.key == p.key) {
            Some(existing) => existing.value = p.value.clone(),
            None => out.push(p.clone()),
        }
    }
    out
}

/// Alias parameters, then version-controlled alias parameters, then the
/// patch's own, sorted by key. Patches without a user-facing alias keep
/// their parameters as given.
fn effective_parameters(
    docs: &Documents,
    project_ref: &ProjectRef,
    patch: &Patch,
    project_config: Option<&ProjectConfig>,
    patch_parameters: &[Parameter],
) -> Vec<Parameter> {
    if patch.alias.is_empty() || !is_patch_alias(&patch.alias) {
        return patch_parameters.to_vec();
    }

    let mut layered: BTreeMap<String, String> = BTreeMap::new();
    let stored = docs.aliases(&project_ref.id, &patch.alias);
    let versioned = project_config
        .into_iter()
        .flat_map(|c| c.fields.patch_aliases.iter())
        .filter(|a| a.alias == patch.alias);
    for alias in stored.into_iter().chain(versioned) {
        for p in &alias.parameters {
            layered.insert(p.key.clone(), p.value.clone());
        }
    }
    for p in patch_parameters {
        layered.insert(p.key.clone(), p.value.clone());
    }
    layered
        .into_iter()
        .map(|(key, value)| Parameter { key, value })
        .collect()
}

/// The author's user record wins over the email embedded in the diff.
fn author_email(docs: &Documents, patch: &Patch) -> String {
    let from_diff = patch
        .git_info
        .as_ref()
        .map(|g| g.email.clone())
        .unwrap_or_default();
    if patch.author.is_empty() {
        return from_diff;
    }
    docs.user(&patch.author)
        .map(|u| u.email.clone())
        .filter(|email| !email.is_empty())
        .unwrap_or(from_diff)
}

/// Module revisions: the reference or base manifest first, then a pinned
/// ref, then the branch head.
fn construct_manifest(
    env: &PatchEnv,
    patch: &Patch,
    version: &Version,
    project_ref: &ProjectRef,
    project: &Project,
) -> Result<Manifest, FinalizeError> {
    let base = env.store.read(|docs| {
        patch
            .reference_manifest_id
            .as_deref()
            .and_then(|id| docs.manifest(id))
            .or_else(|| docs.base_manifest(&version.identifier, &version.revision))
            .cloned()
    });

    let mut modules = BTreeMap::new();
    for module in &project.modules {
        let known = base
            .as_ref()
            .and_then(|m| m.modules.get(&module.name))
            .map(|m| m.revision.clone());
        let revision = match (known, module.pinned_ref.as_ref()) {
            (Some(rev), _) => rev,
            (None, Some(pinned)) if !pinned.is_empty() => pinned.clone(),
            _ => env
                .sources
                .retriever
                .branch_revision(module)
                .map_err(|source| FinalizeError::Manifest {
                    module: module.name.clone(),
                    source,
                })?,
        };
        modules.insert(
            module.name.clone(),
            ManifestModule {
                branch: module.branch.clone(),
                repo: module.repo.clone(),
                owner: module.owner.clone(),
                revision,
            },
        );
    }

    Ok(Manifest {
        id: version.id.to_string(),
        revision: version.revision.clone(),
        project: version.identifier.clone(),
        branch: project_ref.branch.clone(),
        is_base: false,
        modules,
    })
}

/// Pairs from the new-schema selection, or the legacy cross product, grown
/// by dependency inclusion. An inclusion failure keeps the unexpanded set.
fn selected_pairs(env: &PatchEnv, patch: &Patch, project: &Project, requester: Requester) -> TaskVariantPairs {
    let mut pairs = if patch.variants_tasks.is_empty() {
        legacy_cross_product(project, &patch.build_variants, &patch.tasks)
    } else {
        TaskVariantPairs::expand(&patch.variants_tasks)
    };
    match env
        .dependencies
        .include_dependencies(project, &pairs.exec_tasks, requester)
    {
        Ok(expanded) => pairs.exec_tasks = expanded,
        Err(e) => warn!(
            patch_id = %patch.id,
            error = %e,
            "error including dependencies for patch"
        ),
    }
    pairs
}

/// Variants in the patch's own order, then any added by dependency
/// inclusion. Duplicates are left for the caller to skip.
fn variant_order(patch: &Patch, pairs: &TaskVariantPairs) -> Vec<String> {
    patch
        .variants_tasks
        .iter()
        .map(|vt| vt.variant.clone())
        .chain(patch.build_variants.iter().cloned())
        .chain(pairs.exec_tasks.variants().into_iter().map(str::to_string))
        .chain(pairs.display_tasks.variants().into_iter().map(str::to_string))
        .filter(|v| {
            pairs.exec_tasks.iter().any(|p| &p.variant == v)
                || pairs.display_tasks.iter().any(|p| &p.variant == v)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Commit
// ---------------------------------------------------------------------------

fn commit(env: &PatchEnv, patch: &Patch, requester: Requester, staged: Staged) -> Result<(), FinalizeError> {
    let limit = env.settings.max_hourly_patch_tasks;
    let version_id = staged.version.id.clone();

    let result = env.store.transaction(|docs| -> Result<(), FinalizeError> {
        docs.set_patch_finalized(&patch.id, &version_id)?;
        update_scheduling_limit(docs, &patch.author, requester, staged.num_activated, limit, staged.now)?;

        docs.insert_version(staged.version)?;
        if let Some(config) = staged.project_config {
            docs.insert_project_config(config)?;
        }
        docs.insert_manifest(staged.manifest)?;
        for build in staged.builds {
            docs.insert_build(build)?;
        }
        docs.insert_tasks_unordered(staged.tasks)?;

        if let Some(config) = staged.fresh_config {
            docs.upsert_parser_project(ParserProjectDoc {
                id: patch.id.to_string(),
                config,
                create_time: staged.now,
            });
        }
        let stored = docs.patch_mut(&patch.id)?;
        stored.project_storage_method = Some(StorageMethod::Db);
        stored.parameters = staged.patch_parameters;
        stored.variants_tasks = staged.variants_tasks;
        Ok(())
    });

    result.map_err(|e| match e {
        FinalizeError::Store(StoreError::AlreadyFinalized { patch, version }) => {
            FinalizeError::AlreadyFinalized { patch, version }
        }
        FinalizeError::Store(StoreError::Duplicate {
            collection: "version",
            id,
        }) => FinalizeError::AlreadyFinalized {
            patch: patch.id.to_string(),
            version: id,
        },
        other => other,
    })
}
