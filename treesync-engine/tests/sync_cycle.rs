use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use treesync_core::{Node, Operation, OperationType, Patch, StatusSink};
use treesync_engine::config::ProcessorConfig;
use treesync_engine::sync::apply::{ApplyError, OperationApplier, ProgressSender};
use treesync_engine::sync::moves::{Move, sort_closest_moves};
use treesync_engine::sync::patch::OperationPatch;
use treesync_engine::sync::processor::Processor;
use treesync_engine::sync::report::PatchReport;

#[derive(Default)]
struct MemoryTree {
    nodes: Mutex<BTreeMap<String, Node>>,
    uploads: Mutex<Vec<String>>,
}

impl MemoryTree {
    fn with(nodes: Vec<Node>) -> Self {
        let tree = Self::default();
        {
            let mut map = tree.nodes.lock().unwrap();
            for node in nodes {
                map.insert(node.path.clone(), node);
            }
        }
        tree
    }

    fn paths(&self) -> Vec<String> {
        self.nodes.lock().unwrap().keys().cloned().collect()
    }
}

fn is_within(path: &str, root: &str) -> bool {
    path == root || path.starts_with(&format!("{root}/"))
}

#[async_trait]
impl OperationApplier for MemoryTree {
    async fn create_folder(
        &self,
        op: &Operation,
        _operation_id: &str,
        _progress: ProgressSender,
    ) -> Result<(), ApplyError> {
        self.nodes
            .lock()
            .unwrap()
            .insert(op.ref_path().to_string(), Node::folder(op.ref_path()));
        Ok(())
    }

    async fn put_file(
        &self,
        op: &Operation,
        _operation_id: &str,
        progress: ProgressSender,
    ) -> Result<(), ApplyError> {
        let node = op
            .node()
            .ok_or_else(|| ApplyError::MissingNode(op.ref_path().to_string()))?;
        progress.report(node.size);
        self.uploads.lock().unwrap().push(op.ref_path().to_string());
        self.nodes
            .lock()
            .unwrap()
            .insert(op.ref_path().to_string(), Node::file(op.ref_path(), node.size));
        Ok(())
    }

    async fn move_node(
        &self,
        op: &Operation,
        _operation_id: &str,
        _progress: ProgressSender,
    ) -> Result<(), ApplyError> {
        let origin = op.move_origin_path().unwrap_or_default().to_string();
        let mut nodes = self.nodes.lock().unwrap();
        let moved: Vec<String> = nodes
            .keys()
            .filter(|path| is_within(path, &origin))
            .cloned()
            .collect();
        if moved.is_empty() {
            return Err(ApplyError::MissingNode(origin));
        }
        for path in moved {
            if let Some(mut node) = nodes.remove(&path) {
                let renamed = format!("{}{}", op.ref_path(), &path[origin.len()..]);
                node.path = renamed.clone();
                nodes.insert(renamed, node);
            }
        }
        Ok(())
    }

    async fn delete_node(
        &self,
        op: &Operation,
        _operation_id: &str,
        _progress: ProgressSender,
    ) -> Result<(), ApplyError> {
        self.nodes
            .lock()
            .unwrap()
            .retain(|path, _| !is_within(path, op.ref_path()));
        Ok(())
    }
}

#[tokio::test]
async fn inferred_move_replaces_upload_and_tree_converges() {
    let target = Arc::new(MemoryTree::with(vec![
        Node::folder("/docs"),
        Node::file("/docs/a.txt", 3),
        Node::file("/docs/b.txt", 7),
        Node::folder("/old"),
        Node::file("/old/c.txt", 1),
    ]));

    let (sink, mut rx) = StatusSink::channel();
    let patch = Arc::new(OperationPatch::new(sink).with_transfers(true));
    patch.enqueue(Operation::new(OperationType::CreateFolder, "/archive"));
    let created = patch.enqueue(
        Operation::new(OperationType::CreateFile, "/archive/a.txt")
            .with_node(Node::file("/archive/a.txt", 3)),
    );
    let fresh = patch.enqueue(
        Operation::new(OperationType::CreateFile, "/new.txt").with_node(Node::file("/new.txt", 5)),
    );
    let removed = patch.enqueue(
        Operation::new(OperationType::Delete, "/docs/a.txt")
            .with_node(Node::file("/docs/a.txt", 3)),
    );
    patch.enqueue(
        Operation::new(OperationType::Delete, "/old/c.txt").with_node(Node::file("/old/c.txt", 1)),
    );

    let moves = sort_closest_moves(vec![
        Move::new(removed.clone(), fresh, Node::file("/docs/a.txt", 3)),
        Move::new(removed, created, Node::file("/docs/a.txt", 3)),
    ]);
    assert_eq!(moves.len(), 1);
    assert_eq!(moves[0].create_key(), "/archive/a.txt");
    patch.enqueue_moves(&moves);
    assert_eq!(patch.progress_total(), 5);

    Processor::with_config(target.clone(), ProcessorConfig::default().with_concurrency(2))
        .process(patch.clone(), None)
        .await;

    assert_eq!(
        target.paths(),
        vec![
            "/archive",
            "/archive/a.txt",
            "/docs",
            "/docs/b.txt",
            "/new.txt",
            "/old",
        ]
    );
    assert_eq!(*target.uploads.lock().unwrap(), vec!["/new.txt"]);

    let report = PatchReport::collect(&mut rx).await;
    assert!(report.is_success());
    assert_eq!(report.processed, 4);
}

#[tokio::test]
async fn failed_move_is_reported_and_later_phases_still_run() {
    let target = Arc::new(MemoryTree::with(vec![Node::file("/stale.txt", 1)]));
    let (sink, mut rx) = StatusSink::channel();
    let patch = Arc::new(OperationPatch::new(sink));
    patch.enqueue(
        Operation::new(OperationType::MoveFolder, "/b")
            .with_move_origin("/a")
            .with_node(Node::folder("/a")),
    );
    patch.enqueue(
        Operation::new(OperationType::Delete, "/stale.txt").with_node(Node::file("/stale.txt", 1)),
    );

    Processor::new(target.clone())
        .process(patch.clone(), None)
        .await;

    assert!(target.paths().is_empty());
    let report = PatchReport::collect(&mut rx).await;
    assert_eq!(report.processed, 1);
    let failure = report.first_error().unwrap();
    assert_eq!(failure.status, "Error while moving folder - /a - /b");
    assert_eq!(failure.error, "node missing on source: /a");
}
