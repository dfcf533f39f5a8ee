//! The durable state store: a single JSON document holding instances,
//! templates, resource types, live claims and counter cursors.
//!
//! One `parking_lot::Mutex` guards every read-modify-write on the document.
//! The mutex is never held across an await point; anything slow (check
//! commands, child waits) happens outside the critical section. Saves
//! serialize under the same mutex and go to disk via write-then-rename, so a
//! crash mid-save never corrupts the previous snapshot.

mod types;

pub use types::{Instance, Status, Template, DISCOVERED_TEMPLATE};

use crate::error::{Error, Result};
use crate::registry::{claim_key, default_resource_types, Resource, ResourceType};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const STATE_FILE: &str = "state.json";

/// The persisted document. Field names are the wire format.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct StateDoc {
    #[serde(default)]
    pub instances: HashMap<String, Instance>,
    #[serde(default)]
    pub templates: HashMap<String, Template>,
    /// Live claims, keyed `type:value`.
    #[serde(default)]
    pub resources: HashMap<String, Resource>,
    /// Counter cursors: next candidate value per counter type.
    #[serde(default)]
    pub counters: HashMap<String, i64>,
    #[serde(default)]
    pub types: HashMap<String, ResourceType>,
    /// Reserved for the HTTP collaborator; carried opaquely.
    #[serde(default)]
    pub remotes_allowed: HashMap<String, bool>,
}

/// Handle to the state document and its on-disk location.
///
/// Cheap to share behind an `Arc`; every operation takes the handle
/// explicitly rather than reaching for a global.
pub struct Store {
    doc: Mutex<StateDoc>,
    path: PathBuf,
}

impl Store {
    /// The default state directory: `$HOME/.vibeprocess`, falling back to
    /// `/tmp` when no home directory can be determined.
    pub fn default_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".vibeprocess")
    }

    /// Open the store rooted at `dir`, loading `state.json` if present.
    ///
    /// A missing file yields defaults; an unparseable file is logged and
    /// replaced by defaults on the next save. Built-in resource types are
    /// merged into whatever was loaded, and the default templates seed an
    /// empty template map.
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let path = dir.join(STATE_FILE);
        let mut doc = Self::load_doc(&path);
        seed_defaults(&mut doc);
        Self {
            doc: Mutex::new(doc),
            path,
        }
    }

    fn load_doc(path: &Path) -> StateDoc {
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return StateDoc::default(),
            Err(e) => {
                tracing::warn!("cannot read {}: {}; starting from defaults", path.display(), e);
                return StateDoc::default();
            }
        };

        match serde_json::from_slice(&data) {
            Ok(doc) => doc,
            Err(e) => {
                tracing::warn!(
                    "cannot parse {}: {}; starting from defaults",
                    path.display(),
                    e
                );
                StateDoc::default()
            }
        }
    }

    /// Run a closure against the document under the mutex (read-only intent).
    pub fn with<R>(&self, f: impl FnOnce(&StateDoc) -> R) -> R {
        f(&self.doc.lock())
    }

    /// Run a closure against the document under the mutex (mutating).
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut StateDoc) -> R) -> R {
        f(&mut self.doc.lock())
    }

    /// Serialize and write the document: temp file, owner-only mode, fsync,
    /// rename over the old snapshot.
    pub fn save(&self) -> Result<()> {
        let contents = {
            let doc = self.doc.lock();
            serde_json::to_string_pretty(&*doc)?
        };

        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)
                .map_err(|e| Error::Persist(format!("create {}: {}", dir.display(), e)))?;
        }

        let tmp_path = self.path.with_extension("json.tmp");
        {
            use std::os::unix::fs::OpenOptionsExt;
            let mut file = fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(&tmp_path)
                .map_err(|e| Error::Persist(format!("create {}: {}", tmp_path.display(), e)))?;
            file.write_all(contents.as_bytes())
                .map_err(|e| Error::Persist(format!("write {}: {}", tmp_path.display(), e)))?;
            file.sync_all()
                .map_err(|e| Error::Persist(format!("sync {}: {}", tmp_path.display(), e)))?;
        }
        // The file may pre-exist with wider permissions from an older run.
        let _ = fs::set_permissions(&tmp_path, {
            use std::os::unix::fs::PermissionsExt;
            fs::Permissions::from_mode(0o600)
        });

        fs::rename(&tmp_path, &self.path)
            .map_err(|e| Error::Persist(format!("rename to {}: {}", self.path.display(), e)))?;

        Ok(())
    }

    /// Save, logging instead of failing. Lifecycle paths use this: the
    /// in-memory document stays authoritative until the next good save.
    pub fn persist(&self) {
        if let Err(e) = self.save() {
            tracing::error!("state save failed: {}", e);
        }
    }

    pub fn state_path(&self) -> &Path {
        &self.path
    }

    // Convenience lookups (clones, so no lock is held by callers).

    pub fn instance(&self, name: &str) -> Option<Instance> {
        self.with(|doc| doc.instances.get(name).cloned())
    }

    pub fn template(&self, id: &str) -> Option<Template> {
        self.with(|doc| doc.templates.get(id).cloned())
    }

    pub fn resource_type(&self, name: &str) -> Option<ResourceType> {
        self.with(|doc| doc.types.get(name).cloned())
    }

    /// Record a claim directly (adoption path: the process already owns the
    /// value, no availability arbitration applies).
    pub fn claim(&self, rtype: &str, value: &str, owner: &str) {
        self.with_mut(|doc| {
            doc.resources.insert(
                claim_key(rtype, value),
                Resource {
                    rtype: rtype.to_string(),
                    value: value.to_string(),
                    owner: owner.to_string(),
                },
            );
        });
    }

    /// Drop every claim held by `owner`. Idempotent; never rewinds counter
    /// cursors.
    pub fn release_all(&self, owner: &str) {
        self.with_mut(|doc| {
            doc.resources.retain(|_, r| r.owner != owner);
        });
    }
}

/// Merge built-in resource types and, on an empty map, the default
/// templates. A fresh empty state also starts with fresh cursors.
fn seed_defaults(doc: &mut StateDoc) {
    for (name, rt) in default_resource_types() {
        doc.types.entry(name).or_insert(rt);
    }
    if doc.templates.is_empty() {
        doc.templates = default_templates();
    }
}

/// The default template set, seeded on empty state.
pub fn default_templates() -> HashMap<String, Template> {
    let mut templates = HashMap::new();

    templates.insert(
        "postgres".to_string(),
        Template {
            id: "postgres".to_string(),
            label: "PostgreSQL Database".to_string(),
            command: "postgres -D ${datadir} -p ${tcpport}".to_string(),
            resources: vec!["tcpport".to_string(), "datadir".to_string()],
            vars: HashMap::from([("datadir".to_string(), "/tmp/pgdata".to_string())]),
            action: String::new(),
        },
    );

    templates.insert(
        "node-express".to_string(),
        Template {
            id: "node-express".to_string(),
            label: "Node.js Express Server".to_string(),
            command: "node server.js --port ${tcpport}".to_string(),
            resources: vec!["tcpport".to_string()],
            vars: HashMap::new(),
            action: String::new(),
        },
    );

    templates.insert(
        "qemu".to_string(),
        Template {
            id: "qemu".to_string(),
            label: "QEMU Virtual Machine".to_string(),
            command: "qemu-system-x86_64 -vnc :${vncport} -serial tcp::${serialport},server,nowait ${args}"
                .to_string(),
            resources: vec!["vncport".to_string(), "serialport".to_string()],
            vars: HashMap::from([("args".to_string(), "-m 2G".to_string())]),
            action: String::new(),
        },
    );

    templates
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn open_missing_file_seeds_defaults() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path());
        store.with(|doc| {
            assert!(doc.instances.is_empty());
            assert!(doc.types.contains_key("tcpport"));
            assert!(doc.templates.contains_key("postgres"));
            assert!(doc.templates.contains_key("node-express"));
            assert!(doc.templates.contains_key("qemu"));
            assert!(doc.counters.is_empty());
        });
    }

    #[test]
    fn save_and_reload_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path());
        store.with_mut(|doc| {
            let mut inst = Instance::new("web1", "node-express");
            inst.status = Status::Running;
            inst.pid = 999;
            inst.managed = true;
            doc.instances.insert("web1".to_string(), inst);
            doc.counters.insert("tcpport".to_string(), 3001);
        });
        store.claim("tcpport", "3000", "web1");
        store.save().unwrap();

        let reloaded = Store::open(dir.path());
        reloaded.with(|doc| {
            assert_eq!(doc.instances["web1"].pid, 999);
            assert_eq!(doc.counters["tcpport"], 3001);
            let claim = &doc.resources["tcpport:3000"];
            assert_eq!(claim.owner, "web1");
            assert_eq!(claim.value, "3000");
        });
    }

    #[test]
    fn saved_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path());
        store.save().unwrap();

        let mode = fs::metadata(store.state_path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn corrupt_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(STATE_FILE), b"{not json at all").unwrap();

        let store = Store::open(dir.path());
        store.with(|doc| {
            assert!(doc.instances.is_empty());
            assert!(doc.types.contains_key("tcpport"));
            // Fresh state resets cursors.
            assert!(doc.counters.is_empty());
        });
        // And the next save replaces the corrupt file cleanly.
        store.save().unwrap();
        let reloaded = Store::open(dir.path());
        reloaded.with(|doc| assert!(doc.templates.contains_key("postgres")));
    }

    #[test]
    fn builtin_types_merged_into_existing_state() {
        let dir = TempDir::new().unwrap();
        // A state file with one custom type and no tcpport.
        fs::write(
            dir.path().join(STATE_FILE),
            r#"{"types":{"gpu":{"name":"gpu","check":"","counter":true,"start":0,"end":3}},
                "templates":{"t":{"id":"t","label":"T","command":"true"}}}"#,
        )
        .unwrap();

        let store = Store::open(dir.path());
        store.with(|doc| {
            assert!(doc.types.contains_key("gpu"));
            assert!(doc.types.contains_key("tcpport"));
            // Non-empty template map is left alone.
            assert!(!doc.templates.contains_key("postgres"));
            assert!(doc.templates.contains_key("t"));
        });
    }

    #[test]
    fn release_all_is_idempotent_and_scoped() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path());
        store.claim("tcpport", "3000", "a");
        store.claim("tcpport", "3001", "b");
        store.claim("workdir", "/tmp", "a");

        store.release_all("a");
        store.release_all("a");

        store.with(|doc| {
            assert_eq!(doc.resources.len(), 1);
            assert!(doc.resources.contains_key("tcpport:3001"));
        });
    }
}
