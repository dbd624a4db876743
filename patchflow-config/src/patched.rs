//! Resolving the project definition a patch will run against.

use chrono::{DateTime, Utc};

use patchflow_core::error::StoreError;
use patchflow_core::patch::Patch;
use patchflow_core::project::Project;
use patchflow_core::records::{ProjectConfig, ProjectRef};
use patchflow_core::store::ParserProjectDoc;
use patchflow_core::types::StorageMethod;
use patchflow_core::Store;

use crate::error::ConfigError;
use crate::loader::{create_project_config, load_project, project_config_yaml};
use crate::patcher::{config_diff, make_patched_config};
use crate::retrieval::{fetch_with_deadline, FetchRequest};
use crate::ConfigSources;

/// A patch's project after its diff has been applied.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchedProject {
    pub project: Project,
    /// Patched configuration text.
    pub config_yaml: String,
    /// Present only for projects with version-controlled settings.
    pub project_config: Option<ProjectConfig>,
}

impl PatchedProject {
    /// YAML of the settings projection; empty when there is none.
    pub fn project_config_yaml(&self) -> Result<String, ConfigError> {
        self.project_config
            .as_ref()
            .map(project_config_yaml)
            .transpose()
            .map(Option::unwrap_or_default)
    }
}

fn project_ref_for(store: &Store, patch: &Patch) -> Result<ProjectRef, ConfigError> {
    store
        .read(|docs| docs.project_ref(&patch.project).cloned())
        .ok_or_else(|| ConfigError::ProjectNotFound(patch.project.clone()))
}

/// Where the patch's configuration file is read from.
///
/// GitHub PR and merge-queue patches always use the project's path; other
/// patches may override it.
pub fn config_request(project_ref: &ProjectRef, patch: &Patch) -> FetchRequest {
    let path = match patch.path.as_deref() {
        Some(p) if !p.is_empty() && !patch.is_github_pr_patch() && !patch.is_merge_queue_patch() => p,
        _ => project_ref.remote_path.as_str(),
    };
    FetchRequest {
        owner: project_ref.owner.clone(),
        repo: project_ref.repo.clone(),
        path: path.to_string(),
        revision: patch.config_revision().to_string(),
    }
}

/// (pre-diff, post-diff) configuration text.
fn patched_yaml(
    store: &Store,
    sources: &ConfigSources,
    patch: &Patch,
    request: &FetchRequest,
) -> Result<(String, String), ConfigError> {
    let original = fetch_with_deadline(sources.retriever.clone(), request, sources.fetch_timeout)?
        .unwrap_or_default();
    if !patch.should_patch_file_with_diff(&request.path) {
        return Ok((original.clone(), original));
    }
    let patched = make_patched_config(sources, store, patch, request, &original)?;
    Ok((original, patched))
}

/// The stored parser project of a patch, translated.
pub fn find_and_translate_project_for_patch(
    store: &Store,
    patch: &Patch,
) -> Result<(Project, String), ConfigError> {
    let doc = store
        .read(|docs| docs.parser_project(patch.id.as_str()).cloned())
        .ok_or_else(|| StoreError::NotFound {
            collection: "parser project",
            id: patch.id.to_string(),
        })?;
    let project = load_project(&doc.config, &patch.project)?;
    Ok((project, doc.config))
}

/// Fetch, patch, parse and validate the project of an unfinalized patch.
pub fn get_patched_project(
    store: &Store,
    sources: &ConfigSources,
    patch: &Patch,
) -> Result<PatchedProject, ConfigError> {
    if patch.is_finalized() {
        return Err(ConfigError::AlreadyFinalized(patch.id.to_string()));
    }

    let project_ref = project_ref_for(store, patch)?;
    if patch.project_storage_method.is_some() {
        let (project, config_yaml) = find_and_translate_project_for_patch(store, patch)?;
        let project_config = if patch.patched_project_config.is_empty() {
            None
        } else {
            create_project_config(&patch.patched_project_config, &project_ref.identifier)?
        };
        return Ok(PatchedProject {
            project,
            config_yaml,
            project_config,
        });
    }

    let request = config_request(&project_ref, patch);
    let (_, config_yaml) = patched_yaml(store, sources, patch, &request)?;
    let project = load_project(&config_yaml, &project_ref.identifier)?;
    let project_config = if project_ref.version_control_enabled {
        create_project_config(&config_yaml, &project_ref.identifier)?
    } else {
        None
    };
    Ok(PatchedProject {
        project,
        config_yaml,
        project_config,
    })
}

/// YAML of the patched version-controlled settings; empty when the project
/// has none or doesn't enable them.
pub fn get_patched_project_config(
    store: &Store,
    sources: &ConfigSources,
    patch: &Patch,
) -> Result<String, ConfigError> {
    if patch.is_finalized() {
        return Err(ConfigError::AlreadyFinalized(patch.id.to_string()));
    }
    if patch.project_storage_method.is_some() {
        return Ok(patch.patched_project_config.clone());
    }

    let project_ref = project_ref_for(store, patch)?;
    if !project_ref.version_control_enabled {
        return Ok(String::new());
    }
    let request = config_request(&project_ref, patch);
    let (_, config_yaml) = patched_yaml(store, sources, patch, &request)?;
    match create_project_config(&config_yaml, &project_ref.identifier)? {
        Some(config) => project_config_yaml(&config),
        None => Ok(String::new()),
    }
}

/// Unified diff of the configuration file before and after the patch.
pub fn preview_config_diff(
    store: &Store,
    sources: &ConfigSources,
    patch: &Patch,
) -> Result<String, ConfigError> {
    let project_ref = project_ref_for(store, patch)?;
    let request = config_request(&project_ref, patch);
    let (before, after) = patched_yaml(store, sources, patch, &request)?;
    Ok(config_diff(&before, &after, &request.path))
}

/// Record the patched project on the patch so finalize reads it back
/// instead of fetching again.
pub fn store_patched_project(
    store: &Store,
    patch: &Patch,
    patched: &PatchedProject,
    now: DateTime<Utc>,
) -> Result<(), ConfigError> {
    let config_yaml = patched.project_config_yaml()?;
    store.transaction(|docs| {
        docs.upsert_parser_project(ParserProjectDoc {
            id: patch.id.to_string(),
            config: patched.config_yaml.clone(),
            create_time: now,
        });
        let stored = docs.patch_mut(&patch.id)?;
        stored.project_storage_method = Some(StorageMethod::Db);
        stored.patched_project_config = config_yaml;
        Ok(())
    })
}
