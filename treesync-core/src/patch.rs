use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::node::Node;
use crate::operation::{Operation, OperationType};
use crate::status::ProcessStatus;

#[derive(Debug, Error)]
pub enum PatchError {
    #[error("endpoint does not support indexation sessions")]
    SessionUnsupported,
    #[error("target lookup failed for {path}: {message}")]
    Target { path: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A finalized set of operations for one sync cycle, as produced by the
/// tree diff and consumed once by the processor.
#[async_trait]
pub trait Patch: Send + Sync {
    /// Number of operations in the patch.
    fn size(&self) -> usize;

    /// Total number of bytes the patch will transfer.
    fn progress_total(&self) -> u64;

    fn pending_by_type(&self) -> HashMap<OperationType, usize>;

    /// Whether operations move real content rather than index metadata.
    fn has_transfers(&self) -> bool;

    fn operations_by_type(&self, types: &[OperationType]) -> Vec<Arc<Operation>>;

    /// Visits operations of the given types. Types are visited in the order
    /// given; the relative order inside a type is fixed by the patch.
    fn walk_operations(&self, types: &[OperationType], visitor: &mut dyn FnMut(&Arc<Operation>));

    /// Drops operations the destination already satisfies.
    async fn filter_to_target(&self) -> Result<(), PatchError>;

    fn status(&self, status: ProcessStatus);

    fn done(&self);

    async fn start_session(&self, root: &str) -> Result<SessionId, PatchError>;

    async fn flush_session(&self, session: &SessionId) -> Result<(), PatchError>;

    async fn finish_session(&self, session: &SessionId) -> Result<(), PatchError>;
}

/// Batched-write scope offered by an endpoint.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn start_session(&self, root: &str) -> Result<SessionId, PatchError>;

    async fn flush_session(&self, session: &SessionId) -> Result<(), PatchError>;

    async fn finish_session(&self, session: &SessionId) -> Result<(), PatchError>;
}

/// Read access to the destination tree.
#[async_trait]
pub trait TargetIndex: Send + Sync {
    async fn load_node(&self, path: &str) -> Result<Option<Node>, PatchError>;
}
