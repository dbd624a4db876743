mod common;

use chrono::Duration;

use common::*;
use patchflow_core::patch::{AbortInfo, GithubPatchData};
use patchflow_core::types::{PatchId, Requester, TaskStatus, VersionId};
use patchflow_core::StoreError;
use patchflow_engine::cancel::GITHUB_PATCH_USER;
use patchflow_engine::{
    abort_patches_with_github_patch_data, cancel_patch, finalize_patch, CancelError, GithubPrAbort, Job,
};

fn reason(user: &str) -> AbortInfo {
    AbortInfo {
        user: user.into(),
        ..Default::default()
    }
}

fn pr_patch(id: &str, pr_number: u64) -> patchflow_core::Patch {
    let mut patch = new_patch(id, vec![vt("linux", &["compile", "unit"])]);
    patch.github_patch_data = Some(GithubPatchData {
        pr_number,
        base_owner: "evg".into(),
        base_repo: "app".into(),
        head_owner: "dev".into(),
        head_repo: "app".into(),
        head_hash: "def".into(),
        author: "dev".into(),
    });
    patch
}

fn start_first_task(fx: &Fixture, version: &str) {
    fx.store
        .transaction(|docs| -> Result<(), StoreError> {
            let id = docs
                .tasks_by_version(&VersionId::from(version))
                .into_iter()
                .find(|t| t.display_name == "compile")
                .map(|t| t.id.clone())
                .ok_or(StoreError::NotFound {
                    collection: "task",
                    id: version.to_string(),
                })?;
            docs.task_mut(&id)?.status = TaskStatus::Started;
            Ok(())
        })
        .expect("start task");
}

#[test]
fn unfinalized_patch_is_removed() {
    let fx = fixture();
    let id = insert_patch(&fx, new_patch("p1", vec![vt("v1", &["t1"])]));

    cancel_patch(&fx.env, &id, &reason("dev")).expect("cancel");

    assert!(fx.store.find_patch(&id).is_none());
    assert!(fx.jobs.jobs().is_empty());
}

#[test]
fn finalized_patch_is_deactivated_and_aborted() {
    let fx = fixture();
    let id = insert_patch(&fx, new_patch("p1", vec![vt("linux", &["compile", "unit"])]));
    finalize_patch(&fx.env, &id, Requester::Patch).expect("finalize");
    start_first_task(&fx, "p1");

    cancel_patch(&fx.env, &id, &reason("admin")).expect("cancel");

    assert!(fx.store.find_patch(&id).is_some());
    let version = fx.store.find_version(&VersionId::from("p1")).expect("version");
    assert!(!version.activated);
    assert!(version.build_variants.iter().all(|b| !b.activated));

    let tasks: Vec<_> = fx.store.read(|docs| {
        docs.tasks_by_version(&version.id)
            .into_iter()
            .cloned()
            .collect()
    });
    let compile = tasks.iter().find(|t| t.display_name == "compile").expect("compile");
    let unit = tasks.iter().find(|t| t.display_name == "unit").expect("unit");
    assert!(compile.aborted);
    assert_eq!(compile.abort_info.as_ref().map(|a| a.user.as_str()), Some("admin"));
    assert!(!unit.aborted);
    assert!(!unit.activated);
    assert_eq!(unit.activated_by, "admin");

    assert_eq!(
        fx.jobs.jobs().last(),
        Some(&Job::VersionAborted {
            version: VersionId::from("p1"),
            user: "admin".into(),
        })
    );
}

#[test]
fn missing_patch_is_a_client_error() {
    let fx = fixture();
    let err = cancel_patch(&fx.env, &PatchId::from("nope"), &reason("dev")).expect_err("missing");
    assert!(err.is_client_error());
}

fn pr_abort() -> GithubPrAbort {
    GithubPrAbort {
        owner: "evg".into(),
        repo: "app".into(),
        pr_number: 42,
        created_before: now() + Duration::minutes(1),
        pr_closed: true,
        new_version: Some("next".into()),
    }
}

#[test]
fn pull_request_abort_cancels_every_finalized_patch() {
    let fx = fixture();
    for id in ["p1", "p3"] {
        let id = insert_patch(&fx, pr_patch(id, 42));
        finalize_patch(&fx.env, &id, Requester::GithubPr).expect("finalize");
    }
    // p2 claims a version that doesn't exist.
    let mut broken = pr_patch("p2", 42);
    broken.version = Some(VersionId::from("p2"));
    insert_patch(&fx, broken);
    // p4 is unfinalized and left alone.
    insert_patch(&fx, pr_patch("p4", 42));
    // p5 belongs to another pull request.
    let other = insert_patch(&fx, pr_patch("p5", 7));
    finalize_patch(&fx.env, &other, Requester::GithubPr).expect("finalize other");

    let err = abort_patches_with_github_patch_data(&fx.env, &pr_abort()).expect_err("p2 fails");

    match &err {
        CancelError::Batch { failures } => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].0, PatchId::from("p2"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.to_string().starts_with("aborting patches: patch 'p2': "));

    for id in ["p1", "p3"] {
        let version = fx.store.find_version(&VersionId::from(id)).expect("version");
        assert!(!version.activated, "{id} still active");
    }
    assert!(fx.store.find_version(&VersionId::from("p5")).expect("p5").activated);
    assert!(fx.store.find_patch(&PatchId::from("p4")).is_some());

    let aborted: Vec<Job> = fx
        .jobs
        .jobs()
        .into_iter()
        .filter(|j| matches!(j, Job::VersionAborted { .. }))
        .collect();
    assert_eq!(
        aborted,
        vec![
            Job::VersionAborted {
                version: VersionId::from("p1"),
                user: GITHUB_PATCH_USER.into(),
            },
            Job::VersionAborted {
                version: VersionId::from("p3"),
                user: GITHUB_PATCH_USER.into(),
            },
        ]
    );
}

#[test]
fn pull_request_abort_records_reason_on_running_tasks() {
    let fx = fixture();
    let id = insert_patch(&fx, pr_patch("p1", 42));
    finalize_patch(&fx.env, &id, Requester::GithubPr).expect("finalize");
    start_first_task(&fx, "p1");

    let cancelled = abort_patches_with_github_patch_data(&fx.env, &pr_abort()).expect("abort");

    assert_eq!(cancelled, 1);
    let info = fx.store.read(|docs| {
        docs.tasks_by_version(&VersionId::from("p1"))
            .into_iter()
            .find_map(|t| t.abort_info.clone())
    });
    assert_eq!(
        info,
        Some(AbortInfo {
            user: GITHUB_PATCH_USER.into(),
            new_version: Some("next".into()),
            pr_closed: true,
        })
    );
}

#[test]
fn patches_created_later_are_kept() {
    let fx = fixture();
    let id = insert_patch(&fx, pr_patch("p1", 42));
    finalize_patch(&fx.env, &id, Requester::GithubPr).expect("finalize");

    let request = GithubPrAbort {
        created_before: now(),
        ..pr_abort()
    };
    let cancelled = abort_patches_with_github_patch_data(&fx.env, &request).expect("abort");

    assert_eq!(cancelled, 0);
    assert!(fx.store.find_version(&VersionId::from("p1")).expect("version").activated);
}
