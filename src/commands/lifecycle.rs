use std::collections::HashMap;
use vibeprocess::{Instance, Manager};

fn print_instance_summary(inst: &Instance) {
    println!("Command: {}", inst.command);
    if !inst.resources.is_empty() {
        println!("Resources:");
        let mut keys: Vec<&String> = inst.resources.keys().collect();
        keys.sort();
        for key in keys {
            println!("  {} = {}", key, inst.resources[key]);
        }
    }
}

pub async fn run_start(
    manager: &Manager,
    template: &str,
    name: &str,
    vars: HashMap<String, String>,
) -> anyhow::Result<()> {
    let inst = manager.start(template, name, &vars).await?;
    println!("Started {} (PID {})", inst.name, inst.pid);
    print_instance_summary(&inst);
    Ok(())
}

pub async fn run_stop(manager: &Manager, name: &str) -> anyhow::Result<()> {
    manager.stop(name).await?;
    println!("Stopped {}", name);
    Ok(())
}

pub async fn run_restart(manager: &Manager, name: &str) -> anyhow::Result<()> {
    let inst = manager.restart(name).await?;
    println!("Restarted {} (PID {})", inst.name, inst.pid);
    print_instance_summary(&inst);
    Ok(())
}

pub async fn run_delete(manager: &Manager, name: &str) -> anyhow::Result<()> {
    manager.delete(name).await?;
    println!("Deleted {}", name);
    Ok(())
}

pub async fn run_action(manager: &Manager, name: &str) -> anyhow::Result<()> {
    manager.execute_action(name).await?;
    println!("Action launched for {}", name);
    Ok(())
}
