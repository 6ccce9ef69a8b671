use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use treesync_core::Operation;

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("endpoint error: {0}")]
    Endpoint(String),
    #[error("node missing on source: {0}")]
    MissingNode(String),
}

/// Byte counter handed to a handler while it applies one operation.
#[derive(Debug, Clone)]
pub struct ProgressSender {
    tx: mpsc::UnboundedSender<u64>,
}

impl ProgressSender {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<u64>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn report(&self, bytes: u64) {
        if bytes > 0 {
            let _ = self.tx.send(bytes);
        }
    }
}

/// Storage side of a patch run: performs the actual writes on the
/// destination endpoint. `operation_id` identifies the whole run.
///
/// Implementations must not keep the [`ProgressSender`] alive after the
/// call returns; the processor waits for it to be dropped before it
/// reports the operation as finished.
#[async_trait]
pub trait OperationApplier: Send + Sync {
    async fn create_folder(
        &self,
        op: &Operation,
        operation_id: &str,
        progress: ProgressSender,
    ) -> Result<(), ApplyError>;

    /// Creates or replaces a file.
    async fn put_file(
        &self,
        op: &Operation,
        operation_id: &str,
        progress: ProgressSender,
    ) -> Result<(), ApplyError>;

    async fn move_node(
        &self,
        op: &Operation,
        operation_id: &str,
        progress: ProgressSender,
    ) -> Result<(), ApplyError>;

    async fn delete_node(
        &self,
        op: &Operation,
        operation_id: &str,
        progress: ProgressSender,
    ) -> Result<(), ApplyError>;

    async fn refresh_uuid(&self, op: &Operation) -> Result<(), ApplyError> {
        let _ = op;
        Ok(())
    }
}
