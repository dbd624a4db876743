//! Snapshot persistence tests for the document store.

use assert_fs::prelude::*;
use chrono::Utc;
use predicates::prelude::*;
use tempfile::TempDir;

use patchflow_core::paths;
use patchflow_core::records::User;
use patchflow_core::{Patch, PatchId, Store, StoreError};

fn make_home() -> TempDir {
    TempDir::new().expect("tempdir")
}

#[test]
fn committed_documents_survive_reopen() {
    let home = make_home();
    {
        let store = Store::open_at(home.path()).expect("open");
        store
            .transaction(|docs| {
                docs.insert_patch(Patch::new("p1", "proj", "abc", Utc::now()))?;
                docs.upsert_user(User::new("alice", "alice@example.com"));
                Ok::<_, StoreError>(())
            })
            .expect("commit");
    }

    let reopened = Store::open_at(home.path()).expect("reopen");
    assert!(reopened.find_patch(&PatchId::from("p1")).is_some());
    let email = reopened.read(|docs| docs.user("alice").map(|u| u.email.clone()));
    assert_eq!(email.as_deref(), Some("alice@example.com"));
}

#[test]
fn failed_transaction_writes_nothing() {
    let home = make_home();
    let store = Store::open_at(home.path()).expect("open");
    let res = store.transaction(|docs| {
        docs.insert_patch(Patch::new("p1", "proj", "abc", Utc::now()))?;
        Err::<(), _>(StoreError::NotFound {
            collection: "version",
            id: "missing".into(),
        })
    });
    assert!(res.is_err());
    assert!(!paths::store_path_at(home.path()).exists());
}

#[test]
fn snapshot_is_atomic_and_private() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let store = Store::open_at(home.path()).expect("open");
    store
        .transaction(|docs| docs.insert_patch(Patch::new("p1", "proj", "abc", Utc::now())))
        .expect("commit");

    let snapshot = home.child(".patchflow/store.json");
    snapshot.assert(predicate::path::exists());
    snapshot.assert(predicate::str::contains("\"p1\""));
    home.child(".patchflow/store.json.tmp")
        .assert(predicate::path::missing());

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(snapshot.path())
            .expect("metadata")
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(mode, 0o600);
    }
}

#[test]
fn corrupt_snapshot_reports_path() {
    let home = make_home();
    std::fs::create_dir_all(paths::root_at(home.path())).expect("mkdir");
    std::fs::write(paths::store_path_at(home.path()), "{ not json").expect("write");
    let err = Store::open_at(home.path()).unwrap_err();
    assert!(matches!(err, StoreError::Parse { .. }));
    assert!(err.to_string().contains("store.json"));
}
