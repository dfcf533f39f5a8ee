use std::time::Duration;
use tokio_util::sync::CancellationToken;
use vibeprocess::probe::ProcessInfo;
use vibeprocess::{Discovery, Manager};

fn print_discovery(discovery: &Discovery) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(&discovery.process)?);
    if let Some(script) = &discovery.launch_script {
        if script.pid != discovery.process.pid {
            println!("Launched by: {} (pid {})", script.cmdline, script.pid);
        }
    }
    Ok(())
}

pub fn run_discover(manager: &Manager, pid: i32) -> anyhow::Result<()> {
    let discovery = manager.discover(pid)?;
    print_discovery(&discovery)
}

pub fn run_discover_port(manager: &Manager, port: u16) -> anyhow::Result<()> {
    let discovery = manager.discover_on_port(port)?;
    print_discovery(&discovery)
}

pub fn run_discover_all(manager: &Manager, ports_only: bool) -> anyhow::Result<()> {
    let processes = manager.discover_all(ports_only);
    if processes.is_empty() {
        println!("Nothing to discover.");
        return Ok(());
    }
    println!("{:<8} {:<8} {:<18} {:<22} {}", "PID", "PPID", "NAME", "PORTS", "COMMAND");
    for info in &processes {
        println!(
            "{:<8} {:<8} {:<18} {:<22} {}",
            info.pid,
            info.ppid,
            info.name,
            format_ports(info),
            info.cmdline
        );
    }
    Ok(())
}

fn format_ports(info: &ProcessInfo) -> String {
    if info.ports.is_empty() {
        "-".to_string()
    } else {
        info.ports
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }
}

pub async fn run_monitor(manager: &Manager, pid: i32, name: &str) -> anyhow::Result<()> {
    let inst = manager.monitor(pid, name).await?;
    println!("Monitoring {} (PID {})", inst.name, inst.pid);
    if !inst.resources.is_empty() {
        println!("Resources:");
        let mut keys: Vec<&String> = inst.resources.keys().collect();
        keys.sort();
        for key in keys {
            println!("  {} = {}", key, inst.resources[key]);
        }
    }
    Ok(())
}

pub async fn run_import(
    manager: &Manager,
    name: &str,
    pid: Option<i32>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let inst = match (pid, port) {
        (Some(pid), None) => manager.import(pid, name).await?,
        (None, Some(port)) => manager.import_on_port(port, name).await?,
        _ => anyhow::bail!("import needs exactly one of --pid or --port"),
    };
    println!("Imported {} (PID {})", inst.name, inst.pid);
    Ok(())
}

pub async fn run_reconcile(manager: &Manager, every: Option<u64>) -> anyhow::Result<()> {
    match every {
        None => {
            let summary = manager.reconcile();
            println!(
                "Reconciled: {} refreshed, {} stopped, {} re-attached",
                summary.refreshed, summary.stopped, summary.rematched
            );
        }
        Some(secs) => {
            let interval = Duration::from_secs(secs.max(1));
            let cancel = CancellationToken::new();
            let handle = manager.spawn_reconcile_loop(interval, cancel.clone());
            println!("Reconciling every {}s (Ctrl-C to stop)", interval.as_secs());
            tokio::signal::ctrl_c().await?;
            cancel.cancel();
            let _ = handle.await;
        }
    }
    Ok(())
}
