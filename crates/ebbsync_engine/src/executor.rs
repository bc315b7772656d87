//! Translation of queued operations into remote store calls.

use crate::error::ExecError;
use crate::transport::RemoteStore;
use ebbsync_protocol::{Operation, Record};
use std::sync::Arc;

/// Executes operations against the remote store.
///
/// The executor has no retry policy of its own. Every remote failure is
/// caught and classified into an [`ExecError`].
#[derive(Clone)]
pub struct RemoteExecutor {
    remote: Arc<dyn RemoteStore>,
}

impl RemoteExecutor {
    /// Creates an executor over `remote`.
    pub fn new(remote: Arc<dyn RemoteStore>) -> Self {
        Self { remote }
    }

    /// Runs `operation` and returns the records the server reports as affected.
    ///
    /// # Errors
    ///
    /// Returns an [`ExecError`] classified as transient (network, timeout,
    /// server failure) or permanent (rejection, authorization).
    pub async fn execute(&self, operation: &Operation) -> Result<Vec<Record>, ExecError> {
        let result = match operation {
            Operation::Insert { table, data } => self.remote.create(table, data).await,
            Operation::Update {
                table,
                data,
                filters,
            } => self.remote.update(table, data, filters).await,
            Operation::Delete { table, filters } => self.remote.delete(table, filters).await,
            Operation::Upsert {
                table,
                data,
                on_conflict,
            } => {
                self.remote
                    .upsert(table, data, on_conflict.as_deref())
                    .await
            }
        };
        result.map_err(ExecError::from)
    }
}
