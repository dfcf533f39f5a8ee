use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Template id recorded on instances that were adopted or imported rather
/// than started from a real template.
pub const DISCOVERED_TEMPLATE: &str = "discovered";

/// Instance lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Starting,
    Running,
    Stopping,
    Stopped,
    Error,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Starting => "starting",
            Status::Running => "running",
            Status::Stopping => "stopping",
            Status::Stopped => "stopped",
            Status::Error => "error",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn is_zero_f64(v: &f64) -> bool {
    *v == 0.0
}

/// A managed or adopted process under the supervisor's purview.
///
/// A running instance has `pid > 0`; a stopped one has `pid == 0`. The
/// `managed` flag is set only for processes this supervisor forked — adopted
/// instances are never managed and never signaled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub name: String,
    /// Source template id, or [`DISCOVERED_TEMPLATE`] for adopted processes.
    #[serde(default)]
    pub template: String,
    /// Final interpolated command line.
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub pid: i32,
    pub status: Status,
    /// Claimed resources, keyed by type name (indexed keys like `tcpport1`
    /// when an instance holds several values of one type).
    #[serde(default)]
    pub resources: HashMap<String, String>,
    /// Unix timestamp of the last (re)start.
    #[serde(default)]
    pub started: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cwd: String,
    #[serde(default)]
    pub managed: bool,
    /// Cumulative CPU seconds, refreshed by the reconcile sweep.
    #[serde(rename = "cputime", default, skip_serializing_if = "is_zero_f64")]
    pub cputime: f64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    /// Interpolated action command, runnable on demand.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub action: String,
}

impl Instance {
    /// Fresh record in `starting` state, stamped now.
    pub fn new(name: &str, template: &str) -> Self {
        Self {
            name: name.to_string(),
            template: template.to_string(),
            command: String::new(),
            pid: 0,
            status: Status::Starting,
            resources: HashMap::new(),
            started: Utc::now().timestamp(),
            cwd: String::new(),
            managed: false,
            cputime: 0.0,
            error: String::new(),
            action: String::new(),
        }
    }
}

/// Blueprint for launching a process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub id: String,
    pub label: String,
    /// Command with `${var}` and `%counter` placeholders.
    pub command: String,
    /// Resource types to allocate before interpolation, in order.
    #[serde(default)]
    pub resources: Vec<String>,
    /// Default variable bindings; callers override per start.
    #[serde(default)]
    pub vars: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub action: String,
}
