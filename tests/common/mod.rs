//! Shared helpers for the integration suites.
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use vibeprocess::registry::{AvailabilityCheck, ResourceType};
use vibeprocess::{Manager, Store, Template};

/// Scripted availability: everything is available unless marked busy.
/// Lets the suites control allocation outcomes without shelling out.
pub struct ScriptedCheck {
    busy: Mutex<HashSet<(String, String)>>,
    /// Optional artificial latency, to widen race windows in
    /// concurrency tests.
    delay: Option<Duration>,
}

impl ScriptedCheck {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            busy: Mutex::new(HashSet::new()),
            delay: None,
        })
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            busy: Mutex::new(HashSet::new()),
            delay: Some(delay),
        })
    }

    pub fn mark_busy(&self, rtype: &str, value: &str) {
        self.busy
            .lock()
            .unwrap()
            .insert((rtype.to_string(), value.to_string()));
    }

    pub fn mark_free(&self, rtype: &str, value: &str) {
        self.busy
            .lock()
            .unwrap()
            .remove(&(rtype.to_string(), value.to_string()));
    }
}

#[async_trait]
impl AvailabilityCheck for ScriptedCheck {
    async fn is_available(&self, rtype: &ResourceType, value: &str) -> bool {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        !self
            .busy
            .lock()
            .unwrap()
            .contains(&(rtype.name.clone(), value.to_string()))
    }
}

/// A manager over a temp-dir store and a scripted check. The TempDir must
/// stay alive for the duration of the test.
pub fn scripted_manager() -> (TempDir, Manager, Arc<ScriptedCheck>) {
    let dir = tempfile::tempdir().expect("temp dir");
    let store = Arc::new(Store::open(dir.path()));
    let check = ScriptedCheck::new();
    let manager = Manager::with_check(store, check.clone());
    (dir, manager, check)
}

/// A manager using the real shell-out check.
pub fn shell_manager() -> (TempDir, Manager) {
    let dir = tempfile::tempdir().expect("temp dir");
    let store = Arc::new(Store::open(dir.path()));
    (dir, Manager::new(store))
}

/// Install a template directly into the store.
pub fn add_template(
    manager: &Manager,
    id: &str,
    command: &str,
    resources: &[&str],
    vars: &[(&str, &str)],
) {
    let template = Template {
        id: id.to_string(),
        label: id.to_string(),
        command: command.to_string(),
        resources: resources.iter().map(|r| r.to_string()).collect(),
        vars: vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        action: String::new(),
    };
    manager.store().with_mut(|doc| {
        doc.templates.insert(id.to_string(), template);
    });
}

/// Install a template that also carries an action string.
pub fn add_template_with_action(
    manager: &Manager,
    id: &str,
    command: &str,
    resources: &[&str],
    action: &str,
) {
    add_template(manager, id, command, resources, &[]);
    manager.store().with_mut(|doc| {
        doc.templates.get_mut(id).unwrap().action = action.to_string();
    });
}

/// Define a counter resource type with no check command of its own (the
/// scripted check decides availability anyway).
pub fn add_counter_type(manager: &Manager, name: &str, start: i64, end: i64) {
    manager.store().with_mut(|doc| {
        doc.types.insert(
            name.to_string(),
            ResourceType {
                name: name.to_string(),
                check: String::new(),
                counter: true,
                start,
                end,
            },
        );
    });
}

/// All claims as (type, value, owner) triples, sorted.
pub fn claims(manager: &Manager) -> Vec<(String, String, String)> {
    let mut all = manager.store().with(|doc| {
        doc.resources
            .values()
            .map(|r| (r.rtype.clone(), r.value.clone(), r.owner.clone()))
            .collect::<Vec<_>>()
    });
    all.sort();
    all
}

/// Current variable map literal.
pub fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Wait until the instance reaches the given status, or panic after ~5s.
pub async fn wait_for_status(manager: &Manager, name: &str, status: vibeprocess::Status) {
    for _ in 0..100 {
        if manager
            .store()
            .instance(name)
            .map(|i| i.status == status)
            .unwrap_or(false)
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    let actual = manager.store().instance(name).map(|i| i.status);
    panic!("'{}' never reached {:?} (last: {:?})", name, status, actual);
}
