//! Shared kernel for the amber-loom workflow platform.
//!
//! Holds the typed id newtypes and the error-handling foundation that every
//! other crate in the workspace builds on.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{ExecutionId, NodeExecutionId, ParseIdError, UserId, WorkflowId};
