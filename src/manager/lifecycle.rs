//! Instance lifecycle: start, stop, restart, delete, and the per-instance
//! reaper task.

use super::interpolate::{indexed_resource_key, next_counter_token, substitute_vars};
use super::Manager;
use crate::error::{validate_pid, Error, Result};
use crate::probe::is_process_running;
use crate::registry::{allocate, allocate_as, base_type_name};
use crate::state::{Instance, Status, Store};
use chrono::Utc;
use nix::sys::signal::{self, killpg, Signal};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};

/// Graceful-stop window: SIGTERM, then poll at 100 ms for up to 2 s.
const STOP_GRACE: Duration = Duration::from_secs(2);
const STOP_POLL: Duration = Duration::from_millis(100);

impl Manager {
    /// Start a new instance from a template.
    ///
    /// Resources are allocated in the template's declaration order; each
    /// chosen value is claimed, recorded on the instance, and fed back into
    /// the variable map so later interpolations see it. Any failure releases
    /// everything this attempt claimed and leaves no instance behind.
    pub async fn start(
        &self,
        template_id: &str,
        name: &str,
        vars: &HashMap<String, String>,
    ) -> Result<Instance> {
        let template = self
            .store()
            .template(template_id)
            .ok_or_else(|| Error::TemplateNotFound(template_id.to_string()))?;

        // Reserve the name under the lock so concurrent starts cannot race
        // past each other.
        let reserved = self.store().with_mut(|doc| {
            if doc.instances.contains_key(name) {
                return false;
            }
            doc.instances
                .insert(name.to_string(), Instance::new(name, template_id));
            true
        });
        if !reserved {
            return Err(Error::AlreadyExists(name.to_string()));
        }

        match self.start_reserved(&template, name, vars).await {
            Ok(inst) => Ok(inst),
            Err(e) => {
                // No partial instance, no orphan claims.
                self.store().release_all(name);
                self.store().with_mut(|doc| {
                    doc.instances.remove(name);
                });
                self.store().persist();
                Err(e)
            }
        }
    }

    async fn start_reserved(
        &self,
        template: &crate::state::Template,
        name: &str,
        vars: &HashMap<String, String>,
    ) -> Result<Instance> {
        // Template defaults first, caller wins.
        let mut final_vars = template.vars.clone();
        for (k, v) in vars {
            final_vars.insert(k.clone(), v.clone());
        }

        let mut resources: HashMap<String, String> = HashMap::new();

        for rtype in &template.resources {
            let requested = final_vars.get(rtype).cloned().unwrap_or_default();
            let value =
                allocate(self.store(), self.check.as_ref(), rtype, &requested, name).await?;
            resources.insert(rtype.clone(), value.clone());
            final_vars.insert(rtype.clone(), value);
        }

        let mut command = substitute_vars(&template.command, &final_vars);

        // Each remaining %counter token allocates a fresh value and replaces
        // that one occurrence, left to right.
        while let Some((range, counter)) = next_counter_token(&command) {
            let alias = indexed_resource_key(&resources, &counter);
            let value =
                allocate_as(self.store(), self.check.as_ref(), &counter, "", name, &alias).await?;
            command.replace_range(range, &value);
            resources.insert(alias, value);
        }

        let action = if template.action.is_empty() {
            String::new()
        } else {
            let mut action_vars = final_vars.clone();
            for (k, v) in &resources {
                action_vars.insert(k.clone(), v.clone());
            }
            substitute_vars(&template.action, &action_vars)
        };

        if command.trim().is_empty() {
            return Err(Error::EmptyCommand);
        }

        let child = spawn_shell(&command, resources.get("workdir").map(String::as_str))
            .map_err(|e| Error::SpawnFailed(name.to_string(), e.to_string()))?;
        let pid = child.id().map(|p| p as i32).unwrap_or(0);

        let inst = Instance {
            name: name.to_string(),
            template: template.id.clone(),
            command,
            pid,
            status: Status::Running,
            resources,
            started: Utc::now().timestamp(),
            cwd: std::env::current_dir()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default(),
            managed: true,
            cputime: 0.0,
            error: String::new(),
            action,
        };

        self.store().with_mut(|doc| {
            doc.instances.insert(name.to_string(), inst.clone());
        });
        self.store().persist();
        spawn_reaper(Arc::clone(self.store()), name.to_string(), pid, child);

        tracing::info!("started '{}' (pid {})", name, pid);
        Ok(inst)
    }

    /// Stop a managed instance: SIGTERM the process group, poll for up to
    /// two seconds, SIGKILL the group if it is still up, then release every
    /// claim the instance holds. The `resources` map survives for restart.
    pub async fn stop(&self, name: &str) -> Result<()> {
        let inst = self
            .store()
            .instance(name)
            .ok_or_else(|| Error::InstanceNotFound(name.to_string()))?;

        if !inst.managed {
            // Adoption did not consume the process; the supervisor never
            // signals it (and its claims stay until delete).
            return Err(Error::NotManaged(name.to_string()));
        }
        if inst.pid <= 0 {
            return Err(Error::NotRunning {
                name: name.to_string(),
            });
        }

        self.store().with_mut(|doc| {
            if let Some(i) = doc.instances.get_mut(name) {
                i.status = Status::Stopping;
            }
        });
        self.store().persist();

        let pid = validate_pid(inst.pid, name)?;

        // The child was started in its own process group, so the group id is
        // the pid; fall back to the single process if group delivery fails.
        let _ = killpg(pid, Signal::SIGTERM).or_else(|_| signal::kill(pid, Signal::SIGTERM));

        let polls = (STOP_GRACE.as_millis() / STOP_POLL.as_millis()).max(1);
        for _ in 0..polls {
            if !is_process_running(inst.pid) {
                break;
            }
            tokio::time::sleep(STOP_POLL).await;
        }

        if is_process_running(inst.pid) {
            tracing::warn!("'{}' (pid {}) survived SIGTERM, sending SIGKILL", name, inst.pid);
            let _ = killpg(pid, Signal::SIGKILL).or_else(|_| signal::kill(pid, Signal::SIGKILL));
            tokio::time::sleep(STOP_POLL).await;
        }

        if is_process_running(inst.pid) {
            // Leave the instance in `stopping`; the operator can re-invoke.
            self.store().persist();
            return Err(Error::StopFailed(name.to_string()));
        }

        self.store().with_mut(|doc| {
            if let Some(i) = doc.instances.get_mut(name) {
                i.status = Status::Stopped;
                i.pid = 0;
            }
        });
        self.store().release_all(name);
        self.store().persist();

        tracing::info!("stopped '{}'", name);
        Ok(())
    }

    /// Restart a stopped instance: re-verify and re-claim every previously
    /// held resource, then run the stored command again (no
    /// re-interpolation).
    pub async fn restart(&self, name: &str) -> Result<Instance> {
        let inst = self
            .store()
            .instance(name)
            .ok_or_else(|| Error::InstanceNotFound(name.to_string()))?;

        if !inst.managed {
            return Err(Error::NotManaged(name.to_string()));
        }
        if inst.status != Status::Stopped {
            return Err(Error::NotStopped {
                name: name.to_string(),
                status: inst.status.to_string(),
            });
        }

        match self.restart_stopped(&inst).await {
            Ok(inst) => Ok(inst),
            Err(e) => {
                self.store().release_all(name);
                self.store().with_mut(|doc| {
                    if let Some(i) = doc.instances.get_mut(name) {
                        i.status = Status::Error;
                        i.error = e.to_string();
                    }
                });
                self.store().persist();
                Err(e)
            }
        }
    }

    async fn restart_stopped(&self, inst: &Instance) -> Result<Instance> {
        let name = inst.name.as_str();

        let mut keys: Vec<&String> = inst.resources.keys().collect();
        keys.sort();

        for key in keys {
            let value = &inst.resources[key];
            let rt_name =
                self.store()
                    .with(|doc| base_type_name(&doc.types, key));
            let rt = self
                .store()
                .resource_type(&rt_name)
                .ok_or_else(|| Error::UnknownResourceType(rt_name.clone()))?;

            let conflict = Error::ResourceConflict {
                rtype: rt_name.clone(),
                value: value.clone(),
            };

            // Taken by another instance since we stopped?
            let other_owner = self.store().with(|doc| {
                crate::registry::claim_owner(doc, &rt_name, value)
                    .map(|owner| owner != name)
                    .unwrap_or(false)
            });
            if other_owner {
                return Err(conflict);
            }

            if !self.check.is_available(&rt, value).await {
                return Err(conflict);
            }

            self.store().claim(key, value, name);
        }

        if inst.command.trim().is_empty() {
            return Err(Error::EmptyCommand);
        }

        let child = spawn_shell(&inst.command, inst.resources.get("workdir").map(String::as_str))
            .map_err(|e| Error::SpawnFailed(name.to_string(), e.to_string()))?;
        let pid = child.id().map(|p| p as i32).unwrap_or(0);

        let updated = self
            .store()
            .with_mut(|doc| {
                doc.instances.get_mut(name).map(|i| {
                    i.pid = pid;
                    i.status = Status::Running;
                    i.started = Utc::now().timestamp();
                    i.error.clear();
                    i.clone()
                })
            })
            .ok_or_else(|| Error::InstanceNotFound(name.to_string()))?;
        self.store().persist();
        spawn_reaper(Arc::clone(self.store()), name.to_string(), pid, child);

        tracing::info!("restarted '{}' (pid {})", name, pid);
        Ok(updated)
    }

    /// Forget an instance: stop it first when it is a live managed process,
    /// release every claim, and drop the record.
    pub async fn delete(&self, name: &str) -> Result<()> {
        let inst = self
            .store()
            .instance(name)
            .ok_or_else(|| Error::InstanceNotFound(name.to_string()))?;

        if inst.managed && inst.pid > 0 && is_process_running(inst.pid) {
            self.stop(name).await?;
        }

        self.store().release_all(name);
        self.store().with_mut(|doc| {
            doc.instances.remove(name);
        });
        self.store().persist();

        tracing::info!("deleted '{}'", name);
        Ok(())
    }

    /// Run the instance's interpolated action as a detached background
    /// shell command. Returns once the shell accepted it.
    pub async fn execute_action(&self, name: &str) -> Result<()> {
        let inst = self
            .store()
            .instance(name)
            .ok_or_else(|| Error::InstanceNotFound(name.to_string()))?;
        if inst.action.is_empty() {
            return Err(Error::EmptyAction);
        }

        let mut child = Command::new("/bin/sh")
            .arg("-c")
            .arg(format!("{} &", inst.action))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(false)
            .spawn()
            .map_err(|e| Error::SpawnFailed(name.to_string(), e.to_string()))?;

        // The wrapper shell exits as soon as the action is backgrounded;
        // reap it so it does not linger as a zombie.
        tokio::spawn(async move {
            let _ = child.wait().await;
        });

        tracing::info!("launched action for '{}': {}", name, inst.action);
        Ok(())
    }
}

/// Spawn `/bin/sh -c <command>` detached in its own process group.
///
/// A `workdir` resource becomes a `cd` prefix inside the shell so a missing
/// directory surfaces as child exit 126 (and a missing executable as the
/// shell's own 127) instead of a spawn error in the supervisor.
fn spawn_shell(command: &str, workdir: Option<&str>) -> std::io::Result<Child> {
    let shell_cmd = match workdir {
        Some(dir) if !dir.is_empty() => format!(
            "cd {} || exit 126; {}",
            shell_escape::escape(dir.into()),
            command
        ),
        _ => command.to_string(),
    };

    Command::new("/bin/sh")
        .arg("-c")
        .arg(&shell_cmd)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .process_group(0)
        .kill_on_drop(false)
        .spawn()
}

/// Arm the reaper: block on the child's exit, then flip the instance to
/// stopped — but only while its recorded pid still matches. A restart swaps
/// the pid and turns this task into a no-op.
fn spawn_reaper(store: Arc<Store>, name: String, pid: i32, mut child: Child) {
    tokio::spawn(async move {
        let _ = child.wait().await;
        let flipped = store.with_mut(|doc| match doc.instances.get_mut(&name) {
            Some(inst) if inst.pid == pid => {
                inst.status = Status::Stopped;
                inst.pid = 0;
                true
            }
            _ => false,
        });
        if flipped {
            tracing::debug!("reaper: '{}' (pid {}) exited", name, pid);
            store.persist();
        }
    });
}
