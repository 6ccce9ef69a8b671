//! Path locking around operation handlers.

mod echo;
mod session;

pub use echo::EchoFilter;
pub use session::{
    ACL_CHILD_LOCK, ACL_LOCK, AclAction, AclService, LockError, LockSession, has_child_locks,
};

use treesync_core::Operation;

/// Marks paths as being written by the processor so that a watcher on the
/// same endpoint can ignore the resulting events.
pub trait ProcessorLocker: Send + Sync {
    fn lock_file(&self, op: &Operation, path: &str, session_id: &str);

    fn unlock_file(&self, op: &Operation, path: &str);
}
