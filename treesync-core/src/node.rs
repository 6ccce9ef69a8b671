use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    File,
    Folder,
}

/// Snapshot of one filesystem entity, captured once per diff pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub uuid: Uuid,
    pub path: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub size: u64,
    pub etag: Option<String>,
    /// Last modification time, Unix seconds.
    pub modified: Option<i64>,
}

impl Node {
    pub fn file(path: impl Into<String>, size: u64) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            path: path.into(),
            node_type: NodeType::File,
            size,
            etag: None,
            modified: None,
        }
    }

    pub fn folder(path: impl Into<String>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            path: path.into(),
            node_type: NodeType::Folder,
            size: 0,
            etag: None,
            modified: None,
        }
    }

    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    pub fn with_modified(mut self, modified: i64) -> Self {
        self.modified = Some(modified);
        self
    }

    pub fn with_uuid(mut self, uuid: Uuid) -> Self {
        self.uuid = uuid;
        self
    }

    pub fn is_leaf(&self) -> bool {
        self.node_type == NodeType::File
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_type_field_in_lowercase() {
        let node = Node::folder("/Docs").with_uuid(Uuid::nil());
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["type"], "folder");
        assert_eq!(json["path"], "/Docs");
        assert!(!node.is_leaf());
    }

    #[test]
    fn file_nodes_are_leaves() {
        let node = Node::file("/Docs/A.txt", 12).with_etag("abc");
        assert!(node.is_leaf());
        assert_eq!(node.size, 12);
        assert_eq!(node.etag.as_deref(), Some("abc"));
    }
}
