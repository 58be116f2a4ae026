// Transaction port for atomic operations

use crate::domain::{Job, Task};
use crate::error::Result;
use async_trait::async_trait;

/// Transaction trait for atomic multi-step operations
#[async_trait]
pub trait Transaction: Send {
    /// Commit the transaction
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Rollback the transaction
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Transactional JobStore operations
#[async_trait]
pub trait TransactionalJobStore: Send + Sync {
    /// Begin a new transaction
    async fn begin_transaction(&self) -> Result<Box<dyn JobStoreTransaction>>;
}

/// JobStore operations within a transaction
#[async_trait]
pub trait JobStoreTransaction: Transaction {
    /// Insert job (within transaction)
    async fn insert_job(&mut self, job: &Job) -> Result<()>;

    /// Insert task (within transaction)
    async fn insert_task(&mut self, task: &Task) -> Result<()>;
}
