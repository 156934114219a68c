pub mod config;
pub mod error;
pub mod lifecycle;
pub mod requirements;
pub mod types;
pub mod workflow;

pub use config::{load_config, AppConfig, FileConfig};
pub use error::{StoreError, StoreResult, TransitionError};
pub use lifecycle::{apply, derive_status, ReviewAction, Transition};
pub use requirements::{missing_fields, required_fields, Requirement};
pub use types::*;
pub use workflow::{Field, FieldAssignment, FieldValue, WorkflowFields, WorkflowState};
