use std::fmt::Display;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::operation::OperationType;

/// Status vocabulary shared by patch-level and operation-level reporting.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProcessStatus {
    pub status_string: String,
    pub progress: f32,
    pub error: Option<String>,
    pub is_error: bool,
}

impl ProcessStatus {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            status_string: message.into(),
            ..Self::default()
        }
    }

    pub fn progress(message: impl Into<String>, progress: f32) -> Self {
        Self {
            status_string: message.into(),
            progress,
            ..Self::default()
        }
    }

    pub fn failed(message: impl Into<String>, error: &dyn Display, progress: f32) -> Self {
        Self {
            status_string: message.into(),
            progress,
            error: Some(error.to_string()),
            is_error: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PatchEvent {
    Status(ProcessStatus),
    Operation {
        op_type: OperationType,
        ref_path: String,
        status: ProcessStatus,
    },
    Done,
}

/// Sending half of a patch status stream. Sends never block and are
/// dropped silently once the observer has gone away.
#[derive(Debug, Clone)]
pub struct StatusSink {
    tx: mpsc::UnboundedSender<PatchEvent>,
}

impl StatusSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<PatchEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn send(&self, event: PatchEvent) {
        let _ = self.tx.send(event);
    }
}
