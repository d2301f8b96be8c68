//! Statement trigger: runs the EXPORT/IMPORT statement on its own task.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use super::session::TransferSession;
use crate::error::{BoxError, TransferError};

/// The database client used to run statements.
///
/// Implemented by whatever client library the application uses; this crate
/// only needs statement execution.
#[async_trait]
pub trait SqlExecutor: Send {
    /// Executes one statement and returns the affected row count.
    async fn execute(&mut self, sql: &str) -> Result<u64, BoxError>;
}

/// A client shared between the caller and the trigger task.
pub type SharedExecutor = Arc<Mutex<dyn SqlExecutor>>;

/// Executes the session's statement, recording a failure in the error slot.
///
/// The client stays locked for the whole statement, which for a transfer is
/// the whole data exchange.
pub async fn run_trigger(executor: SharedExecutor, session: Arc<TransferSession>) {
    let mut client = executor.lock().await;
    debug!(direction = %session.direction(), sql = session.statement(), "executing statement");

    match client.execute(session.statement()).await {
        Ok(rows) => debug!(rows, "statement finished"),
        Err(e) => {
            session.error_slot().set(TransferError::Statement {
                message: e.to_string(),
            });
        }
    }
}
