//! In-process stand-ins for the platform collaborators.
//!
//! Used by this crate's tests and handy for demos and for exercising an
//! embedding application without audio hardware.

pub mod backend;
pub mod fixtures;

pub use backend::{ReadStep, SimulatedBackend, SimulatedSource};
pub use fixtures::{CollectingSink, EventLog, StaticPermission};
