use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;
use treesync_core::{Operation, OperationType};

use super::ProcessorLocker;

const DEFAULT_GRACE: Duration = Duration::from_secs(1);
const DEFAULT_TTL: Duration = Duration::from_secs(600);

#[derive(Debug, Clone)]
struct LockEntry {
    session_id: String,
    op_type: OperationType,
    locked_at: Instant,
    released_at: Option<Instant>,
}

/// In-memory [`ProcessorLocker`] recording which paths the processor is
/// writing.
///
/// A released path stays locked for a short grace period because the
/// watcher usually reports the write after the handler returned. Entries
/// that are never released expire after `ttl`.
#[derive(Debug)]
pub struct EchoFilter {
    grace: Duration,
    ttl: Duration,
    entries: Mutex<HashMap<String, LockEntry>>,
}

impl Default for EchoFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl EchoFilter {
    pub fn new() -> Self {
        Self::with_timings(DEFAULT_GRACE, DEFAULT_TTL)
    }

    pub fn with_timings(grace: Duration, ttl: Duration) -> Self {
        Self {
            grace,
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Session holding a lock on `path`, if any.
    pub fn lock_owner(&self, path: &str) -> Option<String> {
        let mut entries = self.entries();
        purge(&mut entries, self.grace, self.ttl);
        entries.get(path).map(|entry| entry.session_id.clone())
    }

    /// Operation type that locked `path`, if any.
    pub fn locked_by(&self, path: &str) -> Option<OperationType> {
        let mut entries = self.entries();
        purge(&mut entries, self.grace, self.ttl);
        entries.get(path).map(|entry| entry.op_type)
    }

    /// Whether a change observed on `path` was caused by the processor.
    pub fn is_echo(&self, path: &str) -> bool {
        self.lock_owner(path).is_some()
    }

    pub fn len(&self) -> usize {
        let mut entries = self.entries();
        purge(&mut entries, self.grace, self.ttl);
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, LockEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn purge(entries: &mut HashMap<String, LockEntry>, grace: Duration, ttl: Duration) {
    let now = Instant::now();
    entries.retain(|_, entry| {
        let released = entry
            .released_at
            .is_some_and(|at| now.duration_since(at) >= grace);
        !released && now.duration_since(entry.locked_at) < ttl
    });
}

impl ProcessorLocker for EchoFilter {
    fn lock_file(&self, op: &Operation, path: &str, session_id: &str) {
        debug!(path, session_id, op = %op.op_type(), "locking path");
        self.entries().insert(
            path.to_string(),
            LockEntry {
                session_id: session_id.to_string(),
                op_type: op.op_type(),
                locked_at: Instant::now(),
                released_at: None,
            },
        );
    }

    fn unlock_file(&self, _op: &Operation, path: &str) {
        if let Some(entry) = self.entries().get_mut(path) {
            entry.released_at = Some(Instant::now());
        }
    }
}
