//! Shared fixture for engine integration tests: an in-memory store holding
//! one project, fake collaborators and a fixed clock.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

use patchflow_config::retrieval::FetchRequest;
use patchflow_config::{ApplyOutput, ConfigError, ConfigSources, FileRetriever, PatchApplier};
use patchflow_core::patch::{DisplayTask, Patch, VariantTasks};
use patchflow_core::project::Module;
use patchflow_core::records::{ProjectRef, User};
use patchflow_core::store::ParserProjectDoc;
use patchflow_core::types::StorageMethod;
use patchflow_core::{FixedClock, PatchId, Settings, Store};
use patchflow_engine::{PatchEnv, RecordingJobQueue};

pub const PROJECT_YAML: &str = "\
modules:
  - name: enterprise
    owner: evg
    repo: enterprise
    branch: main
tasks:
  - name: compile
  - name: unit
    depends_on: [compile]
  - name: lint
    depends_on: [compile]
  - name: t1
  - name: t2
buildvariants:
  - name: linux
    display_name: Linux
    run_on: [ubuntu2204]
    tasks:
      - compile
      - unit
      - {name: lint, activate: false}
    display_tasks:
      - name: checks
        execution_tasks: [unit, lint]
  - name: windows
    run_on: [windows-vs2022]
    tasks: [compile]
  - name: v1
    run_on: [ubuntu2204]
    tasks:
      - {name: t1, create_check_run: true}
      - {name: t2, create_check_run: true}
build_baron_settings:
  ticket_create_project: BF
";

pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

/// Serves files from a map; module heads resolve to `module-head`.
#[derive(Default)]
pub struct MapRetriever {
    pub files: HashMap<String, String>,
}

impl FileRetriever for MapRetriever {
    fn fetch_file(&self, request: &FetchRequest) -> Result<Option<String>, ConfigError> {
        Ok(self.files.get(&request.path).cloned())
    }

    fn branch_revision(&self, _module: &Module) -> Result<String, ConfigError> {
        Ok("module-head".into())
    }
}

/// Fails every apply; tests that reach it have a bug.
pub struct RefusingApplier;

impl PatchApplier for RefusingApplier {
    fn apply(&self, _work_dir: &Path, _patch_file: &Path, _include: &str) -> Result<ApplyOutput, ConfigError> {
        Ok(ApplyOutput {
            success: false,
            output: "unexpected apply".into(),
        })
    }
}

// ---------------------------------------------------------------------------
// Fixture
// ---------------------------------------------------------------------------

pub struct Fixture {
    pub env: PatchEnv,
    pub store: Arc<Store>,
    pub jobs: Arc<RecordingJobQueue>,
}

pub fn project_ref(version_control_enabled: bool) -> ProjectRef {
    ProjectRef {
        id: "5f3a".into(),
        identifier: "proj".into(),
        owner: "evg".into(),
        repo: "app".into(),
        branch: "main".into(),
        remote_path: "ci.yml".into(),
        enabled: true,
        version_control_enabled,
    }
}

pub fn fixture() -> Fixture {
    fixture_with(Settings::default(), MapRetriever::default())
}

pub fn fixture_with(settings: Settings, retriever: MapRetriever) -> Fixture {
    fixture_on(Store::in_memory(), settings, retriever)
}

pub fn fixture_on(store: Store, settings: Settings, retriever: MapRetriever) -> Fixture {
    let store = Arc::new(store);
    store
        .transaction(|docs| -> Result<(), patchflow_core::StoreError> {
            docs.upsert_project_ref(project_ref(true));
            docs.upsert_user(User::new("dev", "dev@example.com"));
            Ok(())
        })
        .expect("seed");

    let jobs = Arc::new(RecordingJobQueue::new());
    let sources = ConfigSources {
        retriever: Arc::new(retriever),
        applier: Arc::new(RefusingApplier),
        fetch_timeout: Duration::from_secs(5),
    };
    let env = PatchEnv::new(store.clone(), settings, sources)
        .with_clock(Arc::new(FixedClock(now())))
        .with_jobs(jobs.clone());
    Fixture { env, store, jobs }
}

pub fn vt(variant: &str, tasks: &[&str]) -> VariantTasks {
    VariantTasks {
        variant: variant.into(),
        tasks: tasks.iter().map(|t| t.to_string()).collect(),
        display_tasks: vec![],
    }
}

pub fn vt_display(variant: &str, tasks: &[&str], display: &str, exec: &[&str]) -> VariantTasks {
    VariantTasks {
        display_tasks: vec![DisplayTask {
            name: display.into(),
            exec_tasks: exec.iter().map(|t| t.to_string()).collect(),
        }],
        ..vt(variant, tasks)
    }
}

/// An unfinalized patch by `dev` whose parser project is already stored.
pub fn new_patch(id: &str, selection: Vec<VariantTasks>) -> Patch {
    let mut patch = Patch::new(id, "proj", "abc", now());
    patch.author = "dev".into();
    patch.description = "fix the build".into();
    patch.patch_number = 7;
    patch.variants_tasks = selection;
    patch.project_storage_method = Some(StorageMethod::Db);
    patch
}

pub fn insert_patch(fx: &Fixture, patch: Patch) -> PatchId {
    insert_patch_with_config(fx, patch, PROJECT_YAML)
}

/// Like [`insert_patch`], storing `config` as the patch's parser project.
pub fn insert_patch_with_config(fx: &Fixture, patch: Patch, config: &str) -> PatchId {
    let id = patch.id.clone();
    fx.store
        .transaction(|docs| -> Result<(), patchflow_core::StoreError> {
            if patch.project_storage_method.is_some() {
                docs.upsert_parser_project(ParserProjectDoc {
                    id: patch.id.to_string(),
                    config: config.to_string(),
                    create_time: now(),
                });
            }
            docs.insert_patch(patch)
        })
        .expect("insert patch");
    id
}
