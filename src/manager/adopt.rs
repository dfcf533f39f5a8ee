//! Adoption and discovery of processes the supervisor did not start.

use super::Manager;
use crate::error::{Error, Result};
use crate::probe::{self, is_process_running, read_process_info, ProcessInfo};
use crate::state::{Instance, Status, Store, DISCOVERED_TEMPLATE};
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::sync::Arc;
use std::time::Duration;

/// Poll interval of the per-instance death watcher.
const WATCH_INTERVAL: Duration = Duration::from_secs(2);

/// A discovered process together with its launch-script attribution.
#[derive(Debug, Clone)]
pub struct Discovery {
    pub process: ProcessInfo,
    /// Nearest ancestor whose parent is a shell — "who launched this".
    pub launch_script: Option<ProcessInfo>,
}

impl Manager {
    /// Adopt a live external process under `name`.
    ///
    /// The instance is populated from the process snapshot: its command line
    /// becomes the command, its listening ports are claimed as `tcpport`
    /// (indexed keys for extras) and its working directory as `workdir`.
    /// Adopted instances are never managed: the supervisor will not signal
    /// them, and their claims survive until delete.
    pub async fn monitor(&self, pid: i32, name: &str) -> Result<Instance> {
        if self.store().instance(name).is_some() {
            return Err(Error::AlreadyExists(name.to_string()));
        }
        if !is_process_running(pid) {
            return Err(Error::ProcessNotRunning(pid));
        }
        let info = read_process_info(pid).ok_or(Error::ProbeFailure(pid))?;
        if info.cmdline.is_empty() {
            return Err(Error::ProbeFailure(pid));
        }

        let mut resources = HashMap::new();
        for (i, port) in info.ports.iter().enumerate() {
            let key = if i == 0 {
                "tcpport".to_string()
            } else {
                format!("tcpport{}", i)
            };
            resources.insert(key, port.to_string());
        }
        if !info.cwd.is_empty() {
            resources.insert("workdir".to_string(), info.cwd.clone());
        }

        let inst = Instance {
            name: name.to_string(),
            template: DISCOVERED_TEMPLATE.to_string(),
            command: info.cmdline.clone(),
            pid,
            status: Status::Running,
            resources: resources.clone(),
            started: Utc::now().timestamp(),
            cwd: info.cwd.clone(),
            managed: false,
            cputime: 0.0,
            error: String::new(),
            action: String::new(),
        };

        let inserted = self.store().with_mut(|doc| {
            if doc.instances.contains_key(name) {
                return false;
            }
            doc.instances.insert(name.to_string(), inst.clone());
            true
        });
        if !inserted {
            return Err(Error::AlreadyExists(name.to_string()));
        }

        for (key, value) in &resources {
            self.store().claim(key, value, name);
        }
        self.store().persist();

        spawn_death_watch(Arc::clone(self.store()), name.to_string(), pid);

        tracing::info!("adopted pid {} as '{}'", pid, name);
        Ok(inst)
    }

    /// Discover a process and its launch context without mutating state.
    pub fn discover(&self, pid: i32) -> Result<Discovery> {
        let chain = probe::parent_chain(pid);
        if chain.is_empty() {
            return Err(Error::ProbeFailure(pid));
        }
        let launch_script = probe::find_launch_script(&chain).cloned();
        let process = chain.into_iter().next().expect("non-empty chain");
        Ok(Discovery {
            process,
            launch_script,
        })
    }

    /// Discover whatever is listening on `port`.
    pub fn discover_on_port(&self, port: u16) -> Result<Discovery> {
        let pids = probe::pids_on_port(port);
        let pid = *pids.first().ok_or(Error::NoProcessOnPort(port))?;
        self.discover(pid)
    }

    /// Wrap a discovered process as an unmanaged instance.
    pub async fn import(&self, pid: i32, name: &str) -> Result<Instance> {
        let discovery = self.discover(pid)?;
        self.record_import(name, discovery.process, None)
    }

    /// Wrap the process listening on `port` as an unmanaged instance,
    /// recording the port as its `tcpport` resource.
    pub async fn import_on_port(&self, port: u16, name: &str) -> Result<Instance> {
        let discovery = self.discover_on_port(port)?;
        self.record_import(name, discovery.process, Some(port))
    }

    fn record_import(&self, name: &str, info: ProcessInfo, port: Option<u16>) -> Result<Instance> {
        if self.store().instance(name).is_some() {
            return Err(Error::AlreadyExists(name.to_string()));
        }

        let mut resources = HashMap::new();
        if let Some(port) = port {
            resources.insert("tcpport".to_string(), port.to_string());
        }

        let inst = Instance {
            name: name.to_string(),
            template: DISCOVERED_TEMPLATE.to_string(),
            command: info.cmdline.clone(),
            pid: info.pid,
            status: Status::Running,
            resources: resources.clone(),
            started: Utc::now().timestamp(),
            cwd: info.cwd.clone(),
            managed: false,
            cputime: 0.0,
            error: String::new(),
            action: String::new(),
        };

        let inserted = self.store().with_mut(|doc| {
            if doc.instances.contains_key(name) {
                return false;
            }
            doc.instances.insert(name.to_string(), inst.clone());
            true
        });
        if !inserted {
            return Err(Error::AlreadyExists(name.to_string()));
        }
        for (key, value) in &resources {
            self.store().claim(key, value, name);
        }
        self.store().persist();

        tracing::info!("imported pid {} as '{}'", inst.pid, name);
        Ok(inst)
    }

    /// Enumerate every user process on the host that is not already one of
    /// our instances. Kernel threads are dropped; with `ports_only`, so are
    /// processes with no listening ports.
    pub fn discover_all(&self, ports_only: bool) -> Vec<ProcessInfo> {
        let known: HashSet<i32> = self.store().with(|doc| {
            doc.instances
                .values()
                .filter(|i| i.pid > 0)
                .map(|i| i.pid)
                .collect()
        });

        let mut found = Vec::new();
        let Ok(entries) = fs::read_dir("/proc") else {
            return found;
        };

        for entry in entries.flatten() {
            let Some(pid) = entry
                .file_name()
                .to_str()
                .and_then(|n| n.parse::<i32>().ok())
            else {
                continue;
            };
            if known.contains(&pid) {
                continue;
            }
            // A PID can exit between the directory listing and the read.
            let Some(info) = read_process_info(pid) else {
                continue;
            };
            if info.kernel_thread {
                continue;
            }
            if ports_only && info.ports.is_empty() {
                continue;
            }
            found.push(info);
        }

        found.sort_by_key(|info| info.pid);
        found
    }
}

/// Poll-based death watcher for adopted instances: every two seconds, check
/// liveness; when the process is gone, flip the instance to stopped. Exits
/// quietly if the instance is deleted or its pid is replaced.
fn spawn_death_watch(store: Arc<Store>, name: String, pid: i32) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(WATCH_INTERVAL).await;

            let still_ours = store.with(|doc| {
                doc.instances
                    .get(&name)
                    .map(|i| i.pid == pid)
                    .unwrap_or(false)
            });
            if !still_ours {
                break;
            }

            if !is_process_running(pid) {
                let flipped = store.with_mut(|doc| match doc.instances.get_mut(&name) {
                    Some(inst) if inst.pid == pid => {
                        inst.status = Status::Stopped;
                        inst.pid = 0;
                        true
                    }
                    _ => false,
                });
                if flipped {
                    tracing::debug!("watcher: adopted '{}' (pid {}) is gone", name, pid);
                    store.persist();
                }
                break;
            }
        }
    });
}
