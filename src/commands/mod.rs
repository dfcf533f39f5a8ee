mod admin;
mod discover;
mod lifecycle;
mod status;

pub use admin::{run_resource_type, run_template};
pub use discover::{run_discover, run_discover_all, run_discover_port, run_import, run_monitor, run_reconcile};
pub use lifecycle::{run_action, run_delete, run_restart, run_start, run_stop};
pub use status::{run_inspect, run_ps};
