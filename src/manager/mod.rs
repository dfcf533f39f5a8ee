//! The instance manager: template-driven starts, reaper supervision,
//! adoption of foreign processes, and the reconcile sweep.
//!
//! All persistent entities live in the [`Store`]; the manager holds only the
//! store handle and the availability check used for allocations. Every
//! operation is safe to call concurrently — for a single instance the
//! sequence {resources claimed, pid recorded, reaper armed, state persisted}
//! completes before any later call can observe the instance.

mod adopt;
mod interpolate;
mod lifecycle;
mod reconcile;

pub use adopt::Discovery;
pub use reconcile::ReconcileSummary;

use crate::registry::{AvailabilityCheck, ShellCheck};
use crate::state::Store;
use std::sync::Arc;

#[derive(Clone)]
pub struct Manager {
    store: Arc<Store>,
    check: Arc<dyn AvailabilityCheck>,
}

impl Manager {
    /// Manager with the production shell-out availability check.
    pub fn new(store: Arc<Store>) -> Self {
        Self::with_check(store, Arc::new(ShellCheck))
    }

    /// Manager with an injected availability check (tests script these).
    pub fn with_check(store: Arc<Store>, check: Arc<dyn AvailabilityCheck>) -> Self {
        Self { store, check }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }
}
