//! Probe behavior against the live /proc of the test machine.

use std::net::TcpListener;
use std::process::{Command, Stdio};
use vibeprocess::probe;

#[test]
fn own_snapshot_is_complete() {
    let me = std::process::id() as i32;
    let info = probe::read_process_info(me).expect("own process");

    assert_eq!(info.pid, me);
    assert!(info.ppid > 0);
    assert!(!info.name.is_empty());
    assert!(!info.cmdline.is_empty());
    assert!(!info.exe.is_empty());
    assert!(!info.cwd.is_empty());
    assert!(!info.environ.is_empty());
    assert!(!info.kernel_thread);
}

#[test]
fn bound_listener_shows_up_in_ports() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let me = std::process::id() as i32;

    let info = probe::read_process_info(me).unwrap();
    assert!(
        info.ports.contains(&port),
        "port {} missing from {:?}",
        port,
        info.ports
    );

    let pids = probe::pids_on_port(port);
    assert!(pids.contains(&me));

    drop(listener);
}

#[test]
fn vanished_pid_yields_none_not_panic() {
    // Spawn and fully reap a process, then probe its stale pid.
    let mut child = Command::new("true")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();
    let pid = child.id() as i32;
    child.wait().unwrap();

    // Either the pid directory is already gone (None) or a racing reuse
    // produced a fresh snapshot; both are acceptable, panicking is not.
    let _ = probe::read_process_info(pid);
    assert!(!probe::is_process_running(0));
}

#[test]
fn parent_chain_of_spawned_child_leads_here() {
    let mut child = Command::new("sleep")
        .arg("30")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();
    let pid = child.id() as i32;
    let me = std::process::id() as i32;

    let chain = probe::parent_chain(pid);
    assert!(chain.len() >= 2);
    assert_eq!(chain[0].pid, pid);
    assert_eq!(chain[0].ppid, me);
    assert_eq!(chain[1].pid, me);

    let _ = child.kill();
    let _ = child.wait();
}

#[test]
fn discovery_on_port_finds_the_listener() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let me = std::process::id() as i32;

    let info = probe::discover_process_on_port(port).unwrap();
    assert_eq!(info.pid, me);

    drop(listener);
}

#[test]
fn unused_port_has_no_owner() {
    // Bind and immediately release to learn a port that is now free.
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    assert!(probe::pids_on_port(port).is_empty());
    assert!(probe::discover_process_on_port(port).is_err());
}

#[test]
fn full_port_map_is_consistent_with_single_lookups() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let me = std::process::id() as i32;

    let map = probe::port_to_pid_map();
    let pids = map.get(&port).cloned().unwrap_or_default();
    assert!(pids.contains(&me));
    assert!(probe::ports_for_pid(me).contains(&port));

    drop(listener);
}

#[test]
fn init_is_walkable_when_readable() {
    // PID 1 always exists; its chain is just itself.
    if let Some(info) = probe::read_process_info(1) {
        assert_eq!(info.pid, 1);
        let chain = probe::parent_chain(1);
        assert_eq!(chain.len(), 1);
    }
}
