//! The durable state document: wire shape, atomicity, and reload fidelity.

mod common;

use common::*;
use serde_json::Value;
use std::sync::Arc;
use vibeprocess::{Status, Store};

#[tokio::test]
async fn state_file_has_the_documented_shape() {
    let (dir, manager, _check) = scripted_manager();
    add_template(&manager, "sleeper", "sleep 60 # ${tcpport}", &["tcpport"], &[]);
    manager.start("sleeper", "web1", &vars(&[])).await.unwrap();

    let raw = std::fs::read_to_string(dir.path().join("state.json")).unwrap();
    let doc: Value = serde_json::from_str(&raw).unwrap();

    for key in [
        "instances",
        "templates",
        "resources",
        "counters",
        "types",
        "remotes_allowed",
    ] {
        assert!(doc.get(key).is_some(), "missing top-level key {}", key);
    }

    let inst = &doc["instances"]["web1"];
    // The template id serializes under "template".
    assert_eq!(inst["template"], "sleeper");
    assert_eq!(inst["status"], "running");
    assert_eq!(inst["managed"], true);
    assert_eq!(inst["resources"]["tcpport"], "3000");
    // Zero CPU time is omitted entirely.
    assert!(inst.get("cputime").is_none());

    let claim = &doc["resources"]["tcpport:3000"];
    assert_eq!(claim["type"], "tcpport");
    assert_eq!(claim["value"], "3000");
    assert_eq!(claim["owner"], "web1");

    assert_eq!(doc["counters"]["tcpport"], 3001);

    manager.stop("web1").await.unwrap();
}

#[tokio::test]
async fn instances_survive_a_supervisor_restart() {
    let dir = tempfile::tempdir().unwrap();

    let (pid, port) = {
        let store = Arc::new(Store::open(dir.path()));
        let manager = vibeprocess::Manager::with_check(store, ScriptedCheck::new());
        add_template(&manager, "sleeper", "sleep 60 # ${tcpport}", &["tcpport"], &[]);
        let inst = manager.start("sleeper", "survivor", &vars(&[])).await.unwrap();
        (inst.pid, inst.resources["tcpport"].clone())
        // Store dropped: the "supervisor" is gone, the process is not.
    };

    // A fresh supervisor sees the instance, its claim, and its cursor.
    let store = Arc::new(Store::open(dir.path()));
    let manager = vibeprocess::Manager::with_check(store, ScriptedCheck::new());

    let inst = manager.store().instance("survivor").unwrap();
    assert_eq!(inst.pid, pid);
    assert_eq!(inst.status, Status::Running);
    assert_eq!(inst.resources["tcpport"], port);
    manager
        .store()
        .with(|doc| assert_eq!(doc.counters["tcpport"], 3001));

    // And can still stop it.
    manager.stop("survivor").await.unwrap();
    assert_eq!(
        manager.store().instance("survivor").unwrap().status,
        Status::Stopped
    );
}

#[tokio::test]
async fn counters_reset_only_with_fresh_state() {
    let dir = tempfile::tempdir().unwrap();

    {
        let manager = vibeprocess::Manager::with_check(
            Arc::new(Store::open(dir.path())),
            ScriptedCheck::new(),
        );
        add_template(&manager, "sleeper", "sleep 60 # ${tcpport}", &["tcpport"], &[]);
        manager.start("sleeper", "a", &vars(&[])).await.unwrap();
        manager.stop("a").await.unwrap();
        manager.delete("a").await.unwrap();
    }

    // Same state file: the cursor persists even with nothing allocated.
    let store = Store::open(dir.path());
    store.with(|doc| assert_eq!(doc.counters["tcpport"], 3001));

    // Wiping the file starts the world over, cursors included.
    std::fs::remove_file(dir.path().join("state.json")).unwrap();
    let store = Store::open(dir.path());
    store.with(|doc| assert!(doc.counters.is_empty()));
}

#[test]
fn unparseable_state_is_not_fatal_and_next_save_recovers() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("state.json"), "{\"instances\": [oops").unwrap();

    let store = Store::open(dir.path());
    store.with(|doc| {
        assert!(doc.instances.is_empty());
        assert!(doc.templates.contains_key("postgres"));
    });

    store.save().unwrap();
    let raw = std::fs::read_to_string(dir.path().join("state.json")).unwrap();
    assert!(serde_json::from_str::<Value>(&raw).is_ok());
}

#[test]
fn no_temp_file_lingers_after_save() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path());
    store.save().unwrap();

    let leftovers: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .flatten()
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name != "state.json")
        .collect();
    assert!(leftovers.is_empty(), "stray files: {:?}", leftovers);
}
