//! Host-facing command contract and the stdio bridge the native shell talks to.

pub mod contract;
pub mod handler;
pub mod stdio;

pub use handler::HostCommandHandler;
