//! The reconcile sweep: the single source of truth for catching processes
//! that died (or reappeared) between reaper and watcher wake-ups.

use super::Manager;
use crate::probe::{is_process_running, read_process_info};
use crate::registry::base_type_name;
use crate::state::Status;
use chrono::Utc;
use std::collections::HashSet;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// What one sweep did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// Running instances whose CPU time was refreshed.
    pub refreshed: usize,
    /// Running instances found dead and flipped to stopped.
    pub stopped: usize,
    /// Stopped instances re-attached to a live matching process.
    pub rematched: usize,
}

impl Manager {
    /// Sweep every known instance.
    ///
    /// Running instances with a live pid get their cumulative CPU seconds
    /// refreshed from the probe; dead ones are flipped to stopped with pid 0
    /// and CPU 0. Stopped instances are then re-matched against discovered
    /// processes (same executable name, listening on every recorded port).
    /// State is persisted once at the end. Sweeping an unchanged system is
    /// a no-op beyond the CPU refresh.
    pub fn reconcile(&self) -> ReconcileSummary {
        let mut summary = ReconcileSummary::default();

        let running: Vec<(String, i32)> = self.store().with(|doc| {
            doc.instances
                .values()
                .filter(|i| i.status == Status::Running)
                .map(|i| (i.name.clone(), i.pid))
                .collect()
        });

        for (name, pid) in running {
            if is_process_running(pid) {
                if let Some(info) = read_process_info(pid) {
                    self.store().with_mut(|doc| {
                        if let Some(inst) = doc.instances.get_mut(&name) {
                            if inst.pid == pid {
                                inst.cputime = info.cputime;
                            }
                        }
                    });
                    summary.refreshed += 1;
                }
            } else {
                let flipped = self.store().with_mut(|doc| match doc.instances.get_mut(&name) {
                    Some(inst) if inst.pid == pid => {
                        inst.status = Status::Stopped;
                        inst.pid = 0;
                        inst.cputime = 0.0;
                        true
                    }
                    _ => false,
                });
                if flipped {
                    tracing::info!("reconcile: '{}' (pid {}) is gone, marked stopped", name, pid);
                    summary.stopped += 1;
                }
            }
        }

        summary.rematched = self.rematch_stopped();

        self.store().persist();
        summary
    }

    /// Re-attach stopped instances to live processes that look like them:
    /// the executable name matches the first word of the stored command and
    /// every recorded port is among the process's listening ports. Each PID
    /// is matched at most once per sweep.
    fn rematch_stopped(&self) -> usize {
        let stopped: Vec<(String, String, Vec<u16>)> = self.store().with(|doc| {
            doc.instances
                .values()
                .filter(|i| i.status == Status::Stopped)
                .map(|i| {
                    let ports = i
                        .resources
                        .iter()
                        .filter(|(key, _)| {
                            base_type_name(&doc.types, key) == "tcpport" || key.as_str() == "port"
                        })
                        .filter_map(|(_, value)| value.parse::<u16>().ok())
                        .collect();
                    (
                        i.name.clone(),
                        executable_name(&i.command),
                        ports,
                    )
                })
                .collect()
        });

        if stopped.is_empty() {
            return 0;
        }

        let processes = self.discover_all(false);
        let mut matched_pids: HashSet<i32> = HashSet::new();
        let mut rematched = 0;

        for (name, expected, ports) in stopped {
            if expected.is_empty() {
                continue;
            }

            for info in &processes {
                if matched_pids.contains(&info.pid) || info.name != expected {
                    continue;
                }
                if !ports.iter().all(|p| info.ports.contains(p)) {
                    continue;
                }

                matched_pids.insert(info.pid);
                self.store().with_mut(|doc| {
                    if let Some(inst) = doc.instances.get_mut(&name) {
                        inst.pid = info.pid;
                        inst.status = Status::Running;
                        inst.started = Utc::now().timestamp();
                        inst.cputime = info.cputime;
                    }
                });
                tracing::info!("reconcile: re-attached '{}' to pid {}", name, info.pid);
                rematched += 1;
                break;
            }
        }

        rematched
    }

    /// Run the sweep periodically until cancelled.
    pub fn spawn_reconcile_loop(
        &self,
        interval: Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!("reconcile loop shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        let summary = manager.reconcile();
                        if summary.stopped > 0 || summary.rematched > 0 {
                            tracing::info!(
                                "reconcile: {} stopped, {} re-attached",
                                summary.stopped,
                                summary.rematched
                            );
                        }
                    }
                }
            }
        })
    }
}

/// First word of a command, with any path prefix removed.
fn executable_name(command: &str) -> String {
    command
        .split_whitespace()
        .next()
        .map(|exe| exe.rsplit('/').next().unwrap_or(exe).to_string())
        .unwrap_or_default()
}
