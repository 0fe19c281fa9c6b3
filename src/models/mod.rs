//! Data models for iSolarCloud entities

mod device;
mod plant;
mod telemetry;

pub use device::*;
pub use plant::*;
pub use telemetry::*;
