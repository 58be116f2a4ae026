// Port Layer - Interfaces for external dependencies

pub mod id_provider; // For deterministic testing
pub mod job_store;
pub mod task_handler;
pub mod time_provider;
pub mod transaction;
pub mod work_source;

// Re-exports
pub use id_provider::IdProvider;
pub use job_store::JobStore;
pub use task_handler::{HandlerError, TaskHandler};
pub use time_provider::TimeProvider;
pub use transaction::{JobStoreTransaction, Transaction, TransactionalJobStore};
pub use work_source::{SourceError, WorkSource};
