use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "vp",
    version,
    about = "Per-user process supervisor: templated instances, resource allocation, /proc discovery",
    arg_required_else_help = false
)]
pub struct Cli {
    /// State directory (defaults to ~/.vibeprocess)
    #[arg(long, global = true, value_name = "DIR")]
    pub state_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start an instance from a template
    Start {
        /// Template id
        template: String,
        /// Instance name
        name: String,
        /// Variable bindings as key=value
        #[arg(value_name = "KEY=VALUE")]
        vars: Vec<String>,
    },

    /// Stop a managed instance (terminates its whole process group)
    Stop {
        name: String,
    },

    /// Restart a stopped instance with its stored command and resources
    Restart {
        name: String,
    },

    /// Stop (if needed) and forget an instance, releasing its resources
    Delete {
        name: String,
    },

    /// List instances (the default when no command is given)
    Ps {
        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show one instance as JSON
    Inspect {
        name: String,
    },

    /// Discover a process and its launch script by PID
    Discover {
        pid: i32,
    },

    /// Discover the process listening on a TCP port
    DiscoverPort {
        port: u16,
    },

    /// List processes not yet tracked as instances
    DiscoverAll {
        /// Only processes with listening ports
        #[arg(long)]
        ports: bool,
    },

    /// Adopt a live external process as an unmanaged instance
    Monitor {
        pid: i32,
        name: String,
    },

    /// Import a discovered process as an unmanaged instance
    Import {
        name: String,
        /// Process id to import
        #[arg(long, conflicts_with = "port")]
        pid: Option<i32>,
        /// Import whatever listens on this port instead
        #[arg(long)]
        port: Option<u16>,
    },

    /// Run one reconcile sweep, or keep sweeping with --every
    Reconcile {
        /// Sweep every N seconds until interrupted
        #[arg(long, value_name = "SECONDS")]
        every: Option<u64>,
    },

    /// Run an instance's action command in the background
    Action {
        name: String,
    },

    /// Manage templates
    #[command(subcommand)]
    Template(TemplateCommands),

    /// Manage resource types
    #[command(subcommand, name = "resource-type")]
    ResourceType(ResourceTypeCommands),
}

#[derive(Subcommand)]
pub enum TemplateCommands {
    /// List template ids and labels
    List,
    /// Add (or replace) a template from a JSON file
    Add {
        file: PathBuf,
    },
    /// Print a template as JSON
    Show {
        id: String,
    },
    /// Remove a template
    Remove {
        id: String,
    },
}

#[derive(Subcommand)]
pub enum ResourceTypeCommands {
    /// List resource types
    List,
    /// Define a resource type
    Add {
        name: String,
        /// Availability check command (${value} placeholder; non-zero exit = available)
        #[arg(long, default_value = "")]
        check: String,
        /// Auto-allocate out of an integer range
        #[arg(long)]
        counter: bool,
        #[arg(long, default_value_t = 0)]
        start: i64,
        #[arg(long, default_value_t = 0)]
        end: i64,
    },
    /// Remove a resource type (refused while claims of it exist)
    Remove {
        name: String,
    },
}

/// Parse `key=value` variable bindings from the command line.
pub fn parse_vars(args: &[String]) -> std::collections::HashMap<String, String> {
    let mut vars = std::collections::HashMap::new();
    for arg in args {
        let arg = arg.strip_prefix("--").unwrap_or(arg);
        if let Some((key, value)) = arg.split_once('=') {
            vars.insert(key.to_string(), value.to_string());
        }
    }
    vars
}
