//! Shared helpers: clock, identifiers and telemetry.

pub mod clock;
pub mod ids;
pub mod telemetry;

pub use clock::*;
pub use ids::*;
pub use telemetry::*;
