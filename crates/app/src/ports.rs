//! Port definitions: traits that adapters implement.
//!
//! Ports are the boundaries between the agent core and the outside world.
//! They are defined here (in `app`) so that both the dispatcher and the
//! adapter layer can depend on them without creating circular dependencies.

pub mod scheduler;
pub mod transport;

pub use scheduler::{ScheduleCallback, ScheduleHandle, Scheduler};
pub use transport::Transport;
