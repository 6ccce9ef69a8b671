use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, info};

/// ACL name of a content lock held on a node.
pub const ACL_LOCK: &str = "content_lock";
/// ACL name prefix of a lock reserving a child name under a folder.
pub const ACL_CHILD_LOCK: &str = "child_lock";

#[derive(Debug, Error)]
pub enum LockError {
    #[error("acl service error: {0}")]
    Service(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclAction {
    pub name: String,
    pub value: String,
}

impl AclAction {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Access-control store holding lock entries. An action name ending in
/// `:*` matches every name sharing the prefix; an empty value matches any
/// value.
#[async_trait]
pub trait AclService: Send + Sync {
    async fn create_acl(&self, node_id: &str, action: &AclAction) -> Result<(), LockError>;

    /// Sets the expiration (unix seconds) of the matching ACLs on `node_id`.
    async fn expire_acl(
        &self,
        node_id: &str,
        action: &AclAction,
        expires_at: i64,
    ) -> Result<(), LockError>;

    async fn delete_acl(&self, action: &AclAction) -> Result<(), LockError>;

    /// Number of live ACLs on `node_id` matching `action`.
    async fn search_acl(&self, node_id: &str, action: &AclAction) -> Result<usize, LockError>;
}

/// Expirable lock held by one upload session on a node, and optionally on
/// a child name reserved under a parent folder.
pub struct LockSession {
    acl: Arc<dyn AclService>,
    node_uuid: String,
    session_uuid: String,
    expire_after: Duration,
    child_target: Option<(String, String)>,
}

impl LockSession {
    pub fn new(
        acl: Arc<dyn AclService>,
        node_uuid: impl Into<String>,
        session_uuid: impl Into<String>,
        expire_after: Duration,
    ) -> Self {
        Self {
            acl,
            node_uuid: node_uuid.into(),
            session_uuid: session_uuid.into(),
            expire_after,
            child_target: None,
        }
    }

    pub fn add_child_target(&mut self, parent_uuid: impl Into<String>, child_name: impl Into<String>) {
        self.child_target = Some((parent_uuid.into(), child_name.into()));
    }

    pub async fn lock(&self) -> Result<(), LockError> {
        if !self.node_uuid.is_empty() {
            let action = self.node_lock();
            self.acl.create_acl(&self.node_uuid, &action).await?;
            self.expire(&self.node_uuid, &action, self.expire_after).await?;
        }
        if let Some((parent, action)) = self.child_lock() {
            self.acl.create_acl(parent, &action).await?;
            self.expire(parent, &action, self.expire_after).await?;
        }
        debug!(node = %self.node_uuid, session = %self.session_uuid, "lock acquired");
        Ok(())
    }

    pub async fn update_expiration(&self, expire_after: Duration) -> Result<(), LockError> {
        if !self.node_uuid.is_empty() {
            self.expire(&self.node_uuid, &self.node_lock(), expire_after)
                .await?;
        }
        if let Some((parent, action)) = self.child_lock() {
            self.expire(parent, &action, expire_after).await?;
        }
        Ok(())
    }

    /// Removes both locks. Both removals are attempted; the first failure
    /// is returned.
    pub async fn unlock(&self) -> Result<(), LockError> {
        let node = self.acl.delete_acl(&self.node_lock()).await;
        let children = self
            .acl
            .delete_acl(&AclAction::new(
                format!("{ACL_CHILD_LOCK}:*"),
                self.session_uuid.clone(),
            ))
            .await;
        node.and(children)
    }

    fn node_lock(&self) -> AclAction {
        AclAction::new(ACL_LOCK, self.session_uuid.clone())
    }

    fn child_lock(&self) -> Option<(&str, AclAction)> {
        let (parent, child) = self.child_target.as_ref()?;
        if parent.is_empty() || child.is_empty() {
            return None;
        }
        Some((
            parent.as_str(),
            AclAction::new(
                format!("{ACL_CHILD_LOCK}:{child}"),
                self.session_uuid.clone(),
            ),
        ))
    }

    async fn expire(
        &self,
        node_id: &str,
        action: &AclAction,
        expire_after: Duration,
    ) -> Result<(), LockError> {
        let seconds = i64::try_from(expire_after.as_secs()).unwrap_or(i64::MAX);
        let expires_at = OffsetDateTime::now_utc()
            .unix_timestamp()
            .saturating_add(seconds);
        self.acl.expire_acl(node_id, action, expires_at).await
    }
}

/// Whether any child name of `node_uuid` is reserved by a running session.
/// Lookup failures count as no lock.
pub async fn has_child_locks(acl: &dyn AclService, node_uuid: &str) -> bool {
    let query = AclAction::new(format!("{ACL_CHILD_LOCK}:*"), "");
    match acl.search_acl(node_uuid, &query).await {
        Ok(count) if count > 0 => {
            info!(node = node_uuid, "found child lock");
            true
        }
        Ok(_) => {
            info!(node = node_uuid, "no child lock");
            false
        }
        Err(err) => {
            debug!(node = node_uuid, error = %err, "child lock lookup failed");
            false
        }
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
