//! Kernel TCP table parsing: which ports are listened on, and by whom.
//!
//! The kernel exposes sockets in `/proc/net/tcp` and `/proc/net/tcp6` keyed
//! by inode, not by PID. Mapping a port back to its owners therefore takes
//! two passes: collect `inode -> port` for every LISTEN socket, then walk
//! each process's fd directory resolving `socket:[INODE]` links.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// TCP state code for LISTEN in the kernel tables.
const TCP_LISTEN: &str = "0A";

/// Parse one kernel TCP table into `inode -> local port` for LISTEN sockets.
///
/// Lines that fail to parse are skipped; the table format is stable but a
/// socket can disappear between the header read and the body read.
fn parse_tcp_table(contents: &str, out: &mut HashMap<u64, u16>) {
    for line in contents.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 10 {
            continue;
        }

        if fields[3] != TCP_LISTEN {
            continue;
        }

        // local_address is ADDR:PORT with both parts in hex
        let Some((_, port_hex)) = fields[1].rsplit_once(':') else {
            continue;
        };
        let Ok(port) = u16::from_str_radix(port_hex, 16) else {
            continue;
        };

        let Ok(inode) = fields[9].parse::<u64>() else {
            continue;
        };

        out.insert(inode, port);
    }
}

/// Collect `inode -> port` for every listening IPv4 and IPv6 TCP socket.
fn listening_inodes() -> HashMap<u64, u16> {
    let mut inode_to_port = HashMap::new();
    for table in ["/proc/net/tcp", "/proc/net/tcp6"] {
        if let Ok(contents) = fs::read_to_string(table) {
            parse_tcp_table(&contents, &mut inode_to_port);
        }
    }
    inode_to_port
}

/// Extract the socket inode from an fd symlink target like `socket:[12345]`.
fn socket_inode(link: &Path) -> Option<u64> {
    let link = link.to_str()?;
    link.strip_prefix("socket:[")?
        .strip_suffix(']')?
        .parse()
        .ok()
}

/// Ports a single process is listening on, given the inode table.
fn ports_for_pid_with(pid: i32, inode_to_port: &HashMap<u64, u16>) -> Vec<u16> {
    let fd_dir = format!("/proc/{}/fd", pid);
    let Ok(entries) = fs::read_dir(&fd_dir) else {
        return Vec::new();
    };

    let mut ports = Vec::new();
    for entry in entries.flatten() {
        let Ok(link) = fs::read_link(entry.path()) else {
            continue;
        };
        if let Some(inode) = socket_inode(&link) {
            if let Some(&port) = inode_to_port.get(&inode) {
                if !ports.contains(&port) {
                    ports.push(port);
                }
            }
        }
    }
    ports.sort_unstable();
    ports
}

/// Find all TCP ports a specific process is listening on.
pub fn ports_for_pid(pid: i32) -> Vec<u16> {
    ports_for_pid_with(pid, &listening_inodes())
}

/// Build the full `port -> PIDs` map for every listening socket on the host.
///
/// A port can map to several PIDs (forked workers sharing a socket); the
/// order of PIDs within a port is unspecified. Processes whose fd directory
/// cannot be read (permissions, or the process exited mid-scan) are skipped.
pub fn port_to_pid_map() -> HashMap<u16, Vec<i32>> {
    let inode_to_port = listening_inodes();
    let mut port_to_pids: HashMap<u16, Vec<i32>> = HashMap::new();

    let Ok(entries) = fs::read_dir("/proc") else {
        return port_to_pids;
    };

    for entry in entries.flatten() {
        let Some(pid) = entry
            .file_name()
            .to_str()
            .and_then(|name| name.parse::<i32>().ok())
        else {
            continue;
        };

        for port in ports_for_pid_with(pid, &inode_to_port) {
            let pids = port_to_pids.entry(port).or_default();
            if !pids.contains(&pid) {
                pids.push(pid);
            }
        }
    }

    port_to_pids
}

/// PIDs of all processes listening on a specific port.
pub fn pids_on_port(port: u16) -> Vec<i32> {
    port_to_pid_map().remove(&port).unwrap_or_default()
}
