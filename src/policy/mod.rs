//! Eligibility policy: the document, where it comes from, how it is cached,
//! and how it turns into a tracking decision.

mod cache;
mod gate;
mod provider;
mod types;

pub use cache::{PolicyCache, PolicySnapshot, PolicyStatus};
pub use gate::{Eligibility, EligibilityGate, evaluate};
pub use provider::{HttpPolicyProvider, PolicyProvider, StaticPolicyProvider};
pub use types::{Policy, TimeOfDay, TimeOfDayParseError, WorkingDay, WorkingWindow};
