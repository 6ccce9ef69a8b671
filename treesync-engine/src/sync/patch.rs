use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::{debug, warn};
use treesync_core::{
    Node, Operation, OperationType, Patch, PatchError, PatchEvent, ProcessStatus, SessionId,
    SessionProvider, StatusSink, TargetIndex,
};

use super::moves::Move;
use super::paths::depth;

/// In-memory [`Patch`] owning its operations.
///
/// Every enqueued operation reports through the patch's [`StatusSink`].
/// Folder creations are walked shallow-first; other types keep insertion
/// order.
pub struct OperationPatch {
    operations: Mutex<Vec<Arc<Operation>>>,
    sink: StatusSink,
    transfers: bool,
    target: Option<Arc<dyn TargetIndex>>,
    sessions: Option<Arc<dyn SessionProvider>>,
    done_calls: AtomicUsize,
}

impl OperationPatch {
    pub fn new(sink: StatusSink) -> Self {
        Self {
            operations: Mutex::new(Vec::new()),
            sink,
            transfers: false,
            target: None,
            sessions: None,
            done_calls: AtomicUsize::new(0),
        }
    }

    /// Whether file operations carry content between endpoints.
    pub fn with_transfers(mut self, transfers: bool) -> Self {
        self.transfers = transfers;
        self
    }

    pub fn with_target_index(mut self, target: Arc<dyn TargetIndex>) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_session_provider(mut self, sessions: Arc<dyn SessionProvider>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    pub fn enqueue(&self, op: Operation) -> Arc<Operation> {
        let op = Arc::new(op);
        op.attach_status_sink(self.sink.clone());
        self.lock().push(Arc::clone(&op));
        op
    }

    /// Replaces each delete/create pair by a single move of the pair's node.
    pub fn enqueue_moves(&self, moves: &[Move]) -> Vec<Arc<Operation>> {
        let mut created = Vec::with_capacity(moves.len());
        for mv in moves {
            {
                let mut operations = self.lock();
                operations.retain(|op| {
                    !Arc::ptr_eq(op, mv.delete_operation())
                        && !Arc::ptr_eq(op, mv.create_operation())
                });
            }
            let op_type = if mv.node().is_leaf() {
                OperationType::MoveFile
            } else {
                OperationType::MoveFolder
            };
            let create = mv.create_operation();
            let op = Operation::new(op_type, create.key())
                .with_ref_path(create.ref_path())
                .with_move_origin(mv.delete_operation().ref_path())
                .with_node(mv.node().clone())
                .with_target(create.target().clone());
            debug!(from = mv.delete_key(), to = mv.create_key(), "recorded move");
            created.push(self.enqueue(op));
        }
        created
    }

    /// Times `done` was called.
    pub fn done_count(&self) -> usize {
        self.done_calls.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Arc<Operation>>> {
        self.operations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn snapshot(&self) -> Vec<Arc<Operation>> {
        self.lock().clone()
    }

    fn sessions(&self) -> Result<&Arc<dyn SessionProvider>, PatchError> {
        self.sessions.as_ref().ok_or(PatchError::SessionUnsupported)
    }
}

/// Etags decide when both sides carry one; otherwise size and modification
/// time must both match.
fn same_content(current: &Node, wanted: &Node) -> bool {
    match (current.etag.as_deref(), wanted.etag.as_deref()) {
        (Some(current), Some(wanted)) => current == wanted,
        _ => {
            current.modified.is_some()
                && current.modified == wanted.modified
                && current.size == wanted.size
        }
    }
}

/// Whether the destination already reflects `op`.
async fn satisfied_by_target(target: &dyn TargetIndex, op: &Operation) -> Result<bool, PatchError> {
    let satisfied = match op.op_type() {
        OperationType::CreateFolder => target.load_node(op.ref_path()).await?.is_some(),
        OperationType::CreateFile | OperationType::UpdateFile => {
            let existing = target.load_node(op.ref_path()).await?;
            match (existing.as_ref(), op.node()) {
                (Some(current), Some(wanted)) => same_content(current, wanted),
                _ => false,
            }
        }
        OperationType::MoveFile | OperationType::MoveFolder => {
            let origin_gone = match op.move_origin_path() {
                Some(origin) => target.load_node(origin).await?.is_none(),
                None => false,
            };
            origin_gone && target.load_node(op.ref_path()).await?.is_some()
        }
        OperationType::Delete => target.load_node(op.ref_path()).await?.is_none(),
        OperationType::RefreshUuid | OperationType::Unknown => false,
    };
    Ok(satisfied)
}

#[async_trait]
impl Patch for OperationPatch {
    fn size(&self) -> usize {
        self.lock().len()
    }

    fn progress_total(&self) -> u64 {
        self.lock()
            .iter()
            .filter(|op| op.op_type().is_file_write())
            .filter_map(|op| op.node())
            .map(|node| node.size)
            .sum()
    }

    fn pending_by_type(&self) -> HashMap<OperationType, usize> {
        let mut pending = HashMap::new();
        for op in self.lock().iter().filter(|op| !op.is_processed()) {
            *pending.entry(op.op_type()).or_insert(0) += 1;
        }
        pending
    }

    fn has_transfers(&self) -> bool {
        self.transfers
    }

    fn operations_by_type(&self, types: &[OperationType]) -> Vec<Arc<Operation>> {
        self.lock()
            .iter()
            .filter(|op| types.contains(&op.op_type()))
            .cloned()
            .collect()
    }

    fn walk_operations(&self, types: &[OperationType], visitor: &mut dyn FnMut(&Arc<Operation>)) {
        let snapshot = self.snapshot();
        for op_type in types {
            let mut batch: Vec<&Arc<Operation>> = snapshot
                .iter()
                .filter(|op| op.op_type() == *op_type)
                .collect();
            if *op_type == OperationType::CreateFolder {
                batch.sort_by_key(|op| depth(op.ref_path()));
            }
            for op in batch {
                visitor(op);
            }
        }
    }

    async fn filter_to_target(&self) -> Result<(), PatchError> {
        let Some(target) = &self.target else {
            return Ok(());
        };
        let mut satisfied = Vec::new();
        for op in self.snapshot() {
            match satisfied_by_target(target.as_ref(), &op).await {
                Ok(true) => satisfied.push(op),
                Ok(false) => {}
                Err(err) => {
                    warn!(operation = %op, error = %err, "target lookup failed, keeping operation")
                }
            }
        }
        if !satisfied.is_empty() {
            debug!(dropped = satisfied.len(), "operations already applied on target");
            self.lock()
                .retain(|op| !satisfied.iter().any(|done| Arc::ptr_eq(op, done)));
        }
        Ok(())
    }

    fn status(&self, status: ProcessStatus) {
        self.sink.send(PatchEvent::Status(status));
    }

    fn done(&self) {
        self.done_calls.fetch_add(1, Ordering::SeqCst);
        self.sink.send(PatchEvent::Done);
    }

    async fn start_session(&self, root: &str) -> Result<SessionId, PatchError> {
        self.sessions()?.start_session(root).await
    }

    async fn flush_session(&self, session: &SessionId) -> Result<(), PatchError> {
        self.sessions()?.flush_session(session).await
    }

    async fn finish_session(&self, session: &SessionId) -> Result<(), PatchError> {
        self.sessions()?.finish_session(session).await
    }
}
