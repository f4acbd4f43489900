pub mod api;
pub mod config;
pub mod error;
pub mod scheduler;
pub mod tasks;
pub mod testing;
pub mod validation;

pub mod prelude {
    pub use crate::api::{Operation, OperationParams, OperationRegistry};
    pub use crate::config::EngineConfig;
    pub use crate::error::{EngineError, Result};
    pub use crate::scheduler::clock::{Clock, SystemClock};
    pub use crate::scheduler::store::{FileTaskStore, InMemoryTaskStore, TaskStore};
    pub use crate::scheduler::{
        Assignment, AssignmentScheduler, FailurePolicy, NoneAvailableReason, ProgressStatus,
    };
    pub use crate::tasks::{Task, TaskPhase, TaskStatus};
}
