//! One-shot task planning.
//!
//! The [`Scheduler`] keeps planned tasks keyed by identity and fires each
//! one once its [`Schedule`] has passed.

pub mod registry;
pub mod schedule;

pub use registry::{CollisionPolicy, PlannedTask, Scheduler};
pub use schedule::Schedule;
