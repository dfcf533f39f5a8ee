use miette::Diagnostic;
use std::io;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    #[error("Instance '{0}' already exists")]
    #[diagnostic(
        code(vp::instance::already_exists),
        help("Pick another name or remove the old instance with `vp delete {0}`")
    )]
    AlreadyExists(String),

    #[error("Instance not found: {0}")]
    #[diagnostic(
        code(vp::instance::not_found),
        help("List known instances with `vp ps`")
    )]
    InstanceNotFound(String),

    #[error("Template not found: {0}")]
    #[diagnostic(
        code(vp::template::not_found),
        help("List available templates with `vp template list`")
    )]
    TemplateNotFound(String),

    #[error("Unknown resource type: {0}")]
    #[diagnostic(
        code(vp::resource::unknown_type),
        help("List defined types with `vp resource-type list`")
    )]
    UnknownResourceType(String),

    #[error("Resource type '{0}' requires an explicit value")]
    #[diagnostic(
        code(vp::resource::explicit_value),
        help("Non-counter resources must be supplied as a variable, e.g. --{0}=/some/path")
    )]
    ExplicitValueRequired(String),

    #[error("No available {rtype} in range {start}-{end}")]
    #[diagnostic(code(vp::resource::exhausted))]
    NoAvailable {
        rtype: String,
        start: i64,
        end: i64,
    },

    #[error("{rtype} {value} not available")]
    #[diagnostic(
        code(vp::resource::not_available),
        help("Something already holds this value; pick another or free it first")
    )]
    NotAvailable { rtype: String, value: String },

    #[error("Resource {rtype}={value} is no longer available")]
    #[diagnostic(
        code(vp::resource::conflict),
        help("Another process or instance took the value while this instance was stopped")
    )]
    ResourceConflict { rtype: String, value: String },

    #[error("Instance '{0}' failed to start: {1}")]
    #[diagnostic(code(vp::spawn::failed))]
    SpawnFailed(String, String),

    #[error("Instance '{name}' is not running")]
    #[diagnostic(code(vp::instance::not_running))]
    NotRunning { name: String },

    #[error("Instance '{name}' is not stopped (status: {status})")]
    #[diagnostic(
        code(vp::instance::not_stopped),
        help("Only stopped instances can be restarted; stop it first with `vp stop {name}`")
    )]
    NotStopped { name: String, status: String },

    #[error("Instance '{0}' did not exit after SIGKILL")]
    #[diagnostic(
        code(vp::instance::stop_failed),
        help("The instance stays in 'stopping'; re-invoke `vp stop {0}`")
    )]
    StopFailed(String),

    #[error("Instance '{0}' was not started by this supervisor")]
    #[diagnostic(
        code(vp::instance::not_managed),
        help("Adopted instances are never signaled; use `vp delete {0}` to forget it")
    )]
    NotManaged(String),

    #[error("Cannot read process {0}")]
    #[diagnostic(
        code(vp::probe::unreadable),
        help("The process may have exited, or /proc is not accessible")
    )]
    ProbeFailure(i32),

    #[error("Process {0} is not running")]
    #[diagnostic(code(vp::probe::not_running))]
    ProcessNotRunning(i32),

    #[error("No process listening on port {0}")]
    #[diagnostic(code(vp::probe::port_unowned))]
    NoProcessOnPort(u16),

    #[error("Invalid PID {pid}: {reason}")]
    InvalidPid { pid: i32, reason: String },

    #[error("Failed to persist state: {0}")]
    #[diagnostic(
        code(vp::state::persist),
        help("Check permissions and free space under the state directory")
    )]
    Persist(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Empty command")]
    #[diagnostic(code(vp::template::empty_command))]
    EmptyCommand,

    #[error("Empty action")]
    #[diagnostic(code(vp::instance::empty_action))]
    EmptyAction,

    #[error("Resource type '{rtype}' is still referenced by {count} claim(s)")]
    #[diagnostic(code(vp::resource::type_in_use))]
    ResourceTypeInUse { rtype: String, count: usize },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns a helpful suggestion for resolving this error, if available.
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Error::InstanceNotFound(name) => Some(format!(
                "Check `vp ps` for known instances. Did you mean to `vp start <template> {}` first?",
                name
            )),
            Error::TemplateNotFound(_) => {
                Some("List available templates with: vp template list".to_string())
            }
            Error::NotStopped { name, .. } => {
                Some(format!("Stop the instance first with: vp stop {}", name))
            }
            Error::NoAvailable { rtype, start, end } => Some(format!(
                "The {} range {}-{} is exhausted. Free instances holding one, or widen the range with `vp resource-type add`.",
                rtype, start, end
            )),
            Error::NotAvailable { rtype, value } => Some(format!(
                "Find what holds {} {} (for ports: lsof -i :{}) or request a different value.",
                rtype, value, value
            )),
            Error::ResourceConflict { rtype, value } => Some(format!(
                "{} {} was taken while the instance was stopped. Start the instance fresh to allocate a new value.",
                rtype, value
            )),
            Error::NotManaged(name) => Some(format!(
                "'{}' was adopted, not started here, so vp will not signal it. Use `vp delete {}` to stop tracking it.",
                name, name
            )),
            _ => None,
        }
    }

    /// Formats the error with its suggestion (if any) for user-friendly display.
    pub fn with_suggestion(&self) -> String {
        match self.suggestion() {
            Some(suggestion) => format!("{}\n\nHint: {}", self, suggestion),
            None => self.to_string(),
        }
    }
}

/// Validates and converts a raw PID to nix::unistd::Pid for signal operations.
/// Returns Err for PID <= 0 (process group / invalid) and PID 1 (init).
pub fn validate_pid(pid: i32, instance_name: &str) -> Result<nix::unistd::Pid> {
    if pid <= 0 {
        return Err(Error::InvalidPid {
            pid,
            reason: format!(
                "non-positive PID for instance '{}' (refers to a group or nothing)",
                instance_name
            ),
        });
    }
    if pid == 1 {
        return Err(Error::InvalidPid {
            pid,
            reason: format!(
                "refusing to operate on PID 1 (init) for instance '{}'",
                instance_name
            ),
        });
    }
    Ok(nix::unistd::Pid::from_raw(pid))
}

/// Same as validate_pid but for read-only existence checks: PID 1 is allowed.
pub fn validate_pid_for_check(pid: i32) -> Option<nix::unistd::Pid> {
    if pid <= 0 {
        return None;
    }
    Some(nix::unistd::Pid::from_raw(pid))
}
