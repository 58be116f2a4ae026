// Annobatch Infrastructure - SQLite Adapter
// Implements: JobStore, TransactionalJobStore

mod connection;
mod error;
mod job_store;
mod migration;
mod transaction;

pub use connection::create_pool;
pub use job_store::SqliteJobStore;
pub use migration::{current_version, run_migrations};
pub use transaction::SqliteJobTransaction;
