use vibeprocess::{Error, Manager};

/// Tabular (or JSON) listing of every known instance.
pub fn run_ps(manager: &Manager, json: bool) -> anyhow::Result<()> {
    let mut instances = manager
        .store()
        .with(|doc| doc.instances.values().cloned().collect::<Vec<_>>());
    instances.sort_by(|a, b| a.name.cmp(&b.name));

    if json {
        println!("{}", serde_json::to_string_pretty(&instances)?);
        return Ok(());
    }

    if instances.is_empty() {
        println!("No instances. Start one with: vp start <template> <name>");
        return Ok(());
    }

    println!(
        "{:<20} {:<14} {:<9} {:>7} {:>9}  {}",
        "NAME", "TEMPLATE", "STATUS", "PID", "CPU(s)", "COMMAND"
    );
    for inst in &instances {
        let mut flags = String::new();
        if !inst.managed {
            flags.push_str(" (adopted)");
        }
        println!(
            "{:<20} {:<14} {:<9} {:>7} {:>9.1}  {}{}",
            inst.name,
            inst.template,
            inst.status.as_str(),
            inst.pid,
            inst.cputime,
            inst.command,
            flags
        );
    }
    Ok(())
}

/// One instance, pretty-printed as JSON.
pub fn run_inspect(manager: &Manager, name: &str) -> anyhow::Result<()> {
    let inst = manager
        .store()
        .instance(name)
        .ok_or_else(|| Error::InstanceNotFound(name.to_string()))?;
    println!("{}", serde_json::to_string_pretty(&inst)?);
    Ok(())
}
