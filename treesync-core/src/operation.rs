use std::fmt;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

use crate::node::Node;
use crate::status::{PatchEvent, ProcessStatus, StatusSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationType {
    CreateFolder,
    CreateFile,
    UpdateFile,
    MoveFile,
    MoveFolder,
    Delete,
    RefreshUuid,
    Unknown,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::CreateFolder => "CreateFolder",
            OperationType::CreateFile => "CreateFile",
            OperationType::UpdateFile => "UpdateFile",
            OperationType::MoveFile => "MoveFile",
            OperationType::MoveFolder => "MoveFolder",
            OperationType::Delete => "Delete",
            OperationType::RefreshUuid => "RefreshUuid",
            OperationType::Unknown => "Unknown",
        }
    }

    pub fn is_move(&self) -> bool {
        matches!(self, OperationType::MoveFile | OperationType::MoveFolder)
    }

    pub fn is_file_write(&self) -> bool {
        matches!(self, OperationType::CreateFile | OperationType::UpdateFile)
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Descriptor of the endpoint an operation is applied to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointInfo {
    pub uri: String,
}

impl EndpointInfo {
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }
}

/// Atomic unit of change. Shared behind an `Arc` between the patch that
/// owns it and the workers applying it; only the processed flag and the
/// status sink are mutable.
#[derive(Debug)]
pub struct Operation {
    op_type: OperationType,
    key: String,
    ref_path: String,
    move_origin_path: Option<String>,
    node: Option<Node>,
    target: EndpointInfo,
    processed: AtomicBool,
    status_sink: OnceLock<StatusSink>,
}

impl Operation {
    pub fn new(op_type: OperationType, key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            op_type,
            ref_path: key.clone(),
            key,
            move_origin_path: None,
            node: None,
            target: EndpointInfo::default(),
            processed: AtomicBool::new(false),
            status_sink: OnceLock::new(),
        }
    }

    pub fn with_ref_path(mut self, ref_path: impl Into<String>) -> Self {
        self.ref_path = ref_path.into();
        self
    }

    pub fn with_move_origin(mut self, origin: impl Into<String>) -> Self {
        self.move_origin_path = Some(origin.into());
        self
    }

    pub fn with_node(mut self, node: Node) -> Self {
        self.node = Some(node);
        self
    }

    pub fn with_target(mut self, target: EndpointInfo) -> Self {
        self.target = target;
        self
    }

    pub fn op_type(&self) -> OperationType {
        self.op_type
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn ref_path(&self) -> &str {
        &self.ref_path
    }

    pub fn move_origin_path(&self) -> Option<&str> {
        self.move_origin_path.as_deref()
    }

    pub fn node(&self) -> Option<&Node> {
        self.node.as_ref()
    }

    pub fn target(&self) -> &EndpointInfo {
        &self.target
    }

    pub fn is_processed(&self) -> bool {
        self.processed.load(Ordering::SeqCst)
    }

    /// Marks the operation as applied. Returns `false` when it already was.
    pub fn set_processed(&self) -> bool {
        !self.processed.swap(true, Ordering::SeqCst)
    }

    /// Binds the operation to a patch status stream. Only the first sink
    /// is kept.
    pub fn attach_status_sink(&self, sink: StatusSink) -> bool {
        self.status_sink.set(sink).is_ok()
    }

    pub fn status(&self, status: ProcessStatus) {
        if let Some(sink) = self.status_sink.get() {
            sink.send(PatchEvent::Operation {
                op_type: self.op_type,
                ref_path: self.ref_path.clone(),
                status,
            });
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.move_origin_path {
            Some(origin) => write!(f, "{} {} -> {}", self.op_type, origin, self.ref_path),
            None => write!(f, "{} {}", self.op_type, self.ref_path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ref_path_defaults_to_key() {
        let op = Operation::new(OperationType::CreateFile, "/Docs/A.txt");
        assert_eq!(op.ref_path(), "/Docs/A.txt");
        assert!(op.move_origin_path().is_none());
        assert!(op.node().is_none());
    }

    #[test]
    fn processed_flag_is_set_once() {
        let op = Operation::new(OperationType::Delete, "/Old");
        assert!(!op.is_processed());
        assert!(op.set_processed());
        assert!(!op.set_processed());
        assert!(op.is_processed());
    }

    #[tokio::test]
    async fn status_is_routed_through_attached_sink() {
        let op = Operation::new(OperationType::MoveFile, "/New.txt").with_move_origin("/Old.txt");
        let (sink, mut rx) = StatusSink::channel();
        op.status(ProcessStatus::info("dropped: no sink yet"));
        assert!(op.attach_status_sink(sink.clone()));
        assert!(!op.attach_status_sink(sink));
        op.status(ProcessStatus::info("Moved file"));

        match rx.recv().await.unwrap() {
            PatchEvent::Operation {
                op_type,
                ref_path,
                status,
            } => {
                assert_eq!(op_type, OperationType::MoveFile);
                assert_eq!(ref_path, "/New.txt");
                assert_eq!(status.status_string, "Moved file");
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn display_includes_move_origin() {
        let op = Operation::new(OperationType::MoveFolder, "/B").with_move_origin("/A");
        assert_eq!(op.to_string(), "MoveFolder /A -> /B");
    }
}
