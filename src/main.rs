mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use std::sync::Arc;
use vibeprocess::{Error as VpError, Manager, Store};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        if let Some(vp_error) = e.downcast_ref::<VpError>() {
            eprintln!("Error: {}", vp_error);
            if let Some(suggestion) = vp_error.suggestion() {
                eprintln!("\nHint: {}", suggestion);
            }
        } else {
            eprintln!("Error: {:#}", e);
        }
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    let state_dir = cli.state_dir.clone().unwrap_or_else(Store::default_dir);
    let store = Arc::new(Store::open(state_dir));
    let manager = Manager::new(store);

    // Refresh the view of the world before anything that reads or mutates
    // instance status: processes may have died or reappeared since the last
    // invocation.
    match &cli.command {
        None
        | Some(
            Commands::Start { .. }
            | Commands::Stop { .. }
            | Commands::Restart { .. }
            | Commands::Delete { .. }
            | Commands::Ps { .. }
            | Commands::Inspect { .. },
        ) => {
            manager.reconcile();
        }
        _ => {}
    }

    match cli.command {
        None => commands::run_ps(&manager, false)?,
        Some(Commands::Start {
            template,
            name,
            vars,
        }) => {
            let vars = cli::parse_vars(&vars);
            commands::run_start(&manager, &template, &name, vars).await?;
        }
        Some(Commands::Stop { name }) => commands::run_stop(&manager, &name).await?,
        Some(Commands::Restart { name }) => commands::run_restart(&manager, &name).await?,
        Some(Commands::Delete { name }) => commands::run_delete(&manager, &name).await?,
        Some(Commands::Ps { json }) => commands::run_ps(&manager, json)?,
        Some(Commands::Inspect { name }) => commands::run_inspect(&manager, &name)?,
        Some(Commands::Discover { pid }) => commands::run_discover(&manager, pid)?,
        Some(Commands::DiscoverPort { port }) => commands::run_discover_port(&manager, port)?,
        Some(Commands::DiscoverAll { ports }) => commands::run_discover_all(&manager, ports)?,
        Some(Commands::Monitor { pid, name }) => {
            commands::run_monitor(&manager, pid, &name).await?
        }
        Some(Commands::Import { name, pid, port }) => {
            commands::run_import(&manager, &name, pid, port).await?
        }
        Some(Commands::Reconcile { every }) => commands::run_reconcile(&manager, every).await?,
        Some(Commands::Action { name }) => commands::run_action(&manager, &name).await?,
        Some(Commands::Template(cmd)) => commands::run_template(&manager, &cmd)?,
        Some(Commands::ResourceType(cmd)) => commands::run_resource_type(&manager, &cmd)?,
    }

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
}
