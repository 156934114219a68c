pub mod dedup;
pub mod deps;
pub mod infra;
pub mod notify;
pub mod reports;
pub mod review;
pub mod scheduling;
pub mod scout;
pub mod source;
pub mod traits;
pub mod triage;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use dedup::{DedupGate, Reconciled};
pub use deps::ScoutDeps;
pub use scheduling::coordinator::{Coordinator, CoordinatorError};
pub use scout::{Scout, ScoutStats};
