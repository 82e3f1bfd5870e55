//! Discrete-event simulation kernel.
//!
//! Two building blocks:
//! - `queue`: a min-ordered event queue with monotonic identifiers and lazy
//!   (tombstone-set) cancellation
//! - `scheduler`: the simulated clock, handler binding and the dispatch loop
//!
//! The kernel is generic over the event vocabulary so both the radio
//! simulation and the synthetic probe workload run on the same machinery.

pub mod queue;
pub mod scheduler;

pub use queue::{Event, EventId, EventQueue};
pub use scheduler::{Context, Handler, Kernel, Scheduler};
