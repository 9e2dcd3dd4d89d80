//! Shim modules.
//!
//! Thin adapters that present external components to the core through
//! the contract surface. The simulated camera stands in for real
//! camera drivers, and the relay stands in for detector inference;
//! both drive the end-to-end scenarios without any computer vision or
//! device code.

mod camera_sim;
mod relay;

pub use camera_sim::CameraSimModule;
pub use relay::{RelayModule, RelaySettings};
