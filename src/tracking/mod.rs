//! Tracking lifecycle state machine.

mod machine;
mod state;

pub use machine::{TrackingMachine, Transition};
pub use state::{TrackingSnapshot, TrackingState, Trigger};
