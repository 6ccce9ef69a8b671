use std::collections::HashMap;

use serde::Serialize;
use tokio::sync::mpsc;
use treesync_core::{OperationType, PatchEvent};

use super::processor::INTERRUPTED_STATUS;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedOperation {
    pub op_type: OperationType,
    pub ref_path: String,
    pub status: String,
    pub error: String,
}

/// Outcome of a patch run, rebuilt from its status stream.
///
/// The last status of each operation decides its outcome: a processed
/// operation always ends on a non-error status and a failed one on its
/// single error status. Failures are kept in the order they arrived.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PatchReport {
    pub processed: usize,
    pub failed: Vec<FailedOperation>,
    pub interrupted: bool,
    /// Patch-level error other than an interrupt.
    pub patch_error: Option<String>,
    pub done: bool,
    pub last_status: Option<String>,
    #[serde(skip)]
    outcomes: HashMap<(OperationType, String), bool>,
}

impl PatchReport {
    /// Drains `events` until the patch reports done or the stream closes.
    pub async fn collect(events: &mut mpsc::UnboundedReceiver<PatchEvent>) -> Self {
        let mut report = Self::default();
        while let Some(event) = events.recv().await {
            report.record(&event);
            if report.done {
                break;
            }
        }
        report
    }

    pub fn record(&mut self, event: &PatchEvent) {
        match event {
            PatchEvent::Status(status) => {
                if status.status_string == INTERRUPTED_STATUS {
                    self.interrupted = true;
                } else if status.is_error && self.patch_error.is_none() {
                    self.patch_error = Some(
                        status
                            .error
                            .clone()
                            .unwrap_or_else(|| status.status_string.clone()),
                    );
                }
                self.last_status = Some(status.status_string.clone());
            }
            PatchEvent::Operation {
                op_type,
                ref_path,
                status,
            } => {
                let key = (*op_type, ref_path.clone());
                let was_failed = self.outcomes.insert(key, status.is_error) == Some(true);
                if was_failed {
                    self.failed
                        .retain(|f| f.op_type != *op_type || f.ref_path != *ref_path);
                }
                if status.is_error {
                    self.failed.push(FailedOperation {
                        op_type: *op_type,
                        ref_path: ref_path.clone(),
                        status: status.status_string.clone(),
                        error: status.error.clone().unwrap_or_default(),
                    });
                }
                self.processed = self.outcomes.len() - self.failed.len();
            }
            PatchEvent::Done => self.done = true,
        }
    }

    /// Earliest failure in stream order.
    pub fn first_error(&self) -> Option<&FailedOperation> {
        self.failed.first()
    }

    pub fn is_success(&self) -> bool {
        self.done && !self.interrupted && self.patch_error.is_none() && self.failed.is_empty()
    }
}
