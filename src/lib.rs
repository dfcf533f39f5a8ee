//! # vibeprocess
//!
//! A per-user process supervisor and discovery engine for developer
//! workstations. User-defined commands start as templated instances; each
//! instance claims the scarce local resources its template demands (TCP/VNC/
//! serial ports, data files, directories); the supervisor watches running
//! processes — including ones it did not start — and persists its view of
//! the world so instances survive restarts of the supervisor itself.
//!
//! ## Subsystems
//!
//! - **Process probe** ([`probe`]): read-only queries against `/proc` and
//!   the kernel TCP tables. Liveness, snapshots, port ownership, parent
//!   chains and launch-script attribution.
//! - **Resource registry** ([`registry`]): typed named resources with
//!   shell-authored availability checks and monotonic counters; enforces
//!   one owner per `(type, value)`.
//! - **Instance manager** ([`manager`]): template interpolation, fork/exec
//!   into fresh process groups, reaper supervision, adoption of foreign
//!   processes, and the reconcile sweep.
//! - **Durable state** ([`state`]): one JSON document under a single mutex,
//!   written atomically with owner-only permissions.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use vibeprocess::{Manager, Store};
//!
//! # async fn example() -> Result<(), vibeprocess::Error> {
//! let store = Arc::new(Store::open(Store::default_dir()));
//! let manager = Manager::new(store);
//!
//! // Start a templated instance; a free port is allocated automatically.
//! let inst = manager.start("node-express", "web1", &Default::default()).await?;
//! println!("{} listening via {:?}", inst.name, inst.resources);
//!
//! // Later: stop it (resources are released, the record survives).
//! manager.stop("web1").await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency model
//!
//! One `parking_lot` mutex guards the state document; it is never held
//! across an await point. Availability checks and child waits run outside
//! the critical section. Each started instance gets a reaper task, each
//! adopted one a poll watcher; the periodic [`Manager::reconcile`] sweep is
//! the backstop for anything both of those miss.

pub mod error;
pub mod manager;
pub mod probe;
pub mod registry;
pub mod state;

pub use error::{Error, Result};
pub use manager::{Discovery, Manager, ReconcileSummary};
pub use state::{Instance, Status, Store, Template, DISCOVERED_TEMPLATE};
