//! Hardware backends.
//!
//! Only the simulation backend ships with the workspace. Vendor backends
//! implement [`DaqDevice`](qscan_common::hal::driver::DaqDevice) and
//! [`PhotonCounter`](qscan_common::hal::driver::PhotonCounter) and register
//! themselves here.

use crate::backend_registry::BackendRegistry;

pub mod simulation;

/// Register every built-in backend.
pub fn register_all(registry: &mut BackendRegistry) {
    registry.register(simulation::BACKEND_NAME, simulation::create_backend);
}
