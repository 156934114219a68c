pub mod coordinator;
pub mod scheduler;

pub use coordinator::{Coordinator, CoordinatorError};
pub use scheduler::Scheduler;
