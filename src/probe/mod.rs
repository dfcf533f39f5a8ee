//! Read-only process introspection against a Linux `/proc` filesystem.
//!
//! Nothing in this module mutates anything: it answers "is PID alive", "what
//! does PID look like", "who listens on port P", and "who launched PID". A
//! process can vanish at any point during a scan, so every parse or open
//! failure is treated as "skip" — the probe never fails on a vanished PID.

mod net;

pub use net::{pids_on_port, port_to_pid_map, ports_for_pid};

use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Snapshot of one process, assembled from `/proc/<pid>`.
///
/// Ephemeral: never persisted, handed to callers and dropped.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessInfo {
    pub pid: i32,
    pub ppid: i32,
    /// Process name (the parenthesised field of the stat line).
    pub name: String,
    /// Full command line, NUL separators flattened to spaces.
    pub cmdline: String,
    pub exe: String,
    pub cwd: String,
    pub environ: HashMap<String, String>,
    /// TCP ports this process listens on.
    pub ports: Vec<u16>,
    /// Cumulative CPU time (user + system) in seconds.
    pub cputime: f64,
    /// True for kernel threads; exe/cwd/environ/ports are left empty.
    #[serde(skip)]
    pub kernel_thread: bool,
}

/// Shells whose children count as "launch scripts" for attribution.
const SHELL_NAMES: &[&str] = &["sh", "bash", "zsh", "fish", "dash", "ksh", "tcsh", "csh"];

/// Hard cap on parent-chain length, against corrupt ppid data.
const MAX_CHAIN_LEN: usize = 100;

/// Query the kernel clock tick rate (jiffies per second) at runtime.
///
/// Falls back to 100 (the common default) if sysconf fails.
fn clock_ticks_per_sec() -> u64 {
    nix::unistd::sysconf(nix::unistd::SysconfVar::CLK_TCK)
        .ok()
        .flatten()
        .map(|v| v as u64)
        .unwrap_or(100)
}

pub fn is_shell(name: &str) -> bool {
    SHELL_NAMES.contains(&name)
}

/// Liveness probe via signal 0. Returns false for pid <= 0.
pub fn is_process_running(pid: i32) -> bool {
    use nix::sys::signal::kill;

    let Some(nix_pid) = crate::error::validate_pid_for_check(pid) else {
        return false;
    };

    match kill(nix_pid, None) {
        Ok(_) => true,
        Err(nix::errno::Errno::EPERM) => true, // exists, owned by someone else
        Err(_) => false,
    }
}

/// Parse the stat line: `pid (name) state ppid ... utime stime ...`.
///
/// The name can contain spaces and parentheses, so fields are taken after
/// the last `)`. Relative to that point, ppid is field 1 and utime/stime are
/// fields 11 and 12 (the kernel's fields 14 and 15).
fn parse_stat(stat: &str) -> Option<(String, i32, f64)> {
    let close = stat.rfind(')')?;
    let open = stat.find('(')?;
    if close <= open {
        return None;
    }
    let name = stat[open + 1..close].to_string();

    let fields: Vec<&str> = stat[close + 1..].split_whitespace().collect();
    let ppid = fields.get(1)?.parse::<i32>().ok()?;

    let utime: u64 = fields.get(11).and_then(|f| f.parse().ok()).unwrap_or(0);
    let stime: u64 = fields.get(12).and_then(|f| f.parse().ok()).unwrap_or(0);
    let cputime = (utime + stime) as f64 / clock_ticks_per_sec() as f64;

    Some((name, ppid, cputime))
}

/// Parse a NUL-separated `environ` blob into key/value pairs.
fn parse_environ(raw: &[u8]) -> HashMap<String, String> {
    let mut environ = HashMap::new();
    for pair in String::from_utf8_lossy(raw).split('\0') {
        if pair.is_empty() {
            continue;
        }
        if let Some((key, value)) = pair.split_once('=') {
            environ.insert(key.to_string(), value.to_string());
        }
    }
    environ
}

/// Read a full snapshot of `/proc/<pid>`.
///
/// Returns `None` when the PID directory does not exist or the stat line is
/// unreadable. Kernel threads (ppid 0 or 2 with an empty cmdline, or PID 2
/// itself) are returned with `kernel_thread` set and the expensive reads
/// (exe, cwd, environ, ports) skipped.
pub fn read_process_info(pid: i32) -> Option<ProcessInfo> {
    let proc_dir = format!("/proc/{}", pid);
    if !Path::new(&proc_dir).exists() {
        return None;
    }

    let stat = fs::read_to_string(format!("{}/stat", proc_dir)).ok()?;
    let (name, ppid, cputime) = parse_stat(&stat)?;

    let cmdline = fs::read(format!("{}/cmdline", proc_dir))
        .map(|raw| {
            String::from_utf8_lossy(&raw)
                .replace('\0', " ")
                .trim_end()
                .to_string()
        })
        .unwrap_or_default();

    let kernel_thread = pid == 2 || (cmdline.is_empty() && (ppid == 0 || ppid == 2));

    let mut info = ProcessInfo {
        pid,
        ppid,
        name,
        cmdline,
        exe: String::new(),
        cwd: String::new(),
        environ: HashMap::new(),
        ports: Vec::new(),
        cputime,
        kernel_thread,
    };

    if !kernel_thread {
        if let Ok(exe) = fs::read_link(format!("{}/exe", proc_dir)) {
            info.exe = exe.to_string_lossy().into_owned();
        }
        if let Ok(cwd) = fs::read_link(format!("{}/cwd", proc_dir)) {
            info.cwd = cwd.to_string_lossy().into_owned();
        }
        if let Ok(raw) = fs::read(format!("{}/environ", proc_dir)) {
            info.environ = parse_environ(&raw);
        }
        info.ports = ports_for_pid(pid);
    }

    Some(info)
}

/// Walk the parent chain starting at `pid`.
///
/// The first element is `pid` itself; the walk stops at PID 1, a ppid of 0,
/// a cycle, a vanished ancestor, or the length cap.
pub fn parent_chain(pid: i32) -> Vec<ProcessInfo> {
    let mut chain = Vec::new();
    let mut seen = std::collections::HashSet::new();
    let mut current = pid;

    while current > 0 && seen.insert(current) {
        let Some(info) = read_process_info(current) else {
            break;
        };
        let ppid = info.ppid;
        chain.push(info);

        if current == 1 || ppid == 0 || chain.len() >= MAX_CHAIN_LEN {
            break;
        }
        current = ppid;
    }

    chain
}

/// Pick the "launch script" out of a parent chain: the first entry whose
/// immediate parent is a shell. A process is attributed to the script that
/// launched it, not to the shell itself or to init.
///
/// Fallback: the deepest ancestor that is neither PID 1 nor systemd.
pub fn find_launch_script(chain: &[ProcessInfo]) -> Option<&ProcessInfo> {
    for (entry, parent) in chain.iter().zip(chain.iter().skip(1)) {
        let parent_exe = Path::new(&parent.exe)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("");
        if is_shell(&parent.name) || is_shell(parent_exe) {
            return Some(entry);
        }
    }

    chain
        .iter()
        .rev()
        .find(|info| info.pid != 1 && info.name != "systemd")
}

/// Discover a process with its launch context resolved from the parent chain.
pub fn discover_process(pid: i32) -> Option<ProcessInfo> {
    let chain = parent_chain(pid);
    chain.into_iter().next()
}

/// Discover the process listening on `port`. When several PIDs share the
/// socket an arbitrary one is reported.
pub fn discover_process_on_port(port: u16) -> crate::error::Result<ProcessInfo> {
    let pids = pids_on_port(port);
    let pid = *pids.first().ok_or(crate::error::Error::NoProcessOnPort(port))?;
    discover_process(pid).ok_or(crate::error::Error::ProbeFailure(pid))
}
