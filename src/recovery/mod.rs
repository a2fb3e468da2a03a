//! Detection of and bounded recovery from OS termination of the sampler.

mod supervisor;

pub use supervisor::{RecoveryRecord, RecoveryStep, RecoverySupervisor};
