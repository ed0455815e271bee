//! Postgres adapters for the engine's persistence seams.
//!
//! Two tables back the engine: `workflows` holds the definition documents
//! the engine reads at execution start, `workflow_executions` holds one row
//! per run, overwritten wholesale at every checkpoint.

pub mod execution;
pub mod workflow;

pub use execution::PgExecutionStore;
pub use workflow::{PgWorkflowSource, WorkflowRepository};

use amber_loom_workflow::store::StoreError;

/// Maps a sqlx failure onto the engine's store error taxonomy.
pub(crate) fn to_store_error(e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::Decode(e) => StoreError::Serialization {
            message: e.to_string(),
        },
        e => StoreError::Backend {
            message: e.to_string(),
        },
    }
}
