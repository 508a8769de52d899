use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Entity, Reactions};

/// A comment and its locally loaded direct replies.
///
/// `parent_id` is a one-way reference upward; the tree is owned top-down
/// through `replies`, so unchanged subtrees can be shared between snapshots.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommentNode {
    pub id: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub replies: Vec<Arc<CommentNode>>,
    #[serde(default)]
    pub reply_count: u32,
    #[serde(default)]
    pub reactions: Reactions,
    pub created_at: DateTime<Utc>,
    /// Entity-specific fields (text, author, attachments...).
    #[serde(default)]
    pub body: serde_json::Value,
}

impl CommentNode {
    pub fn new(id: impl Into<String>, parent_id: Option<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            parent_id,
            replies: Vec::new(),
            reply_count: 0,
            reactions: Reactions::default(),
            created_at,
            body: serde_json::Value::Null,
        }
    }

    pub fn is_top_level(&self) -> bool { self.parent_id.is_none() }

    /// Depth-first, pre-order search including `self`.
    pub fn find(&self, id: &str) -> Option<&CommentNode> {
        if self.id == id {
            return Some(self);
        }
        self.replies.iter().find_map(|r| r.find(id))
    }
}

impl Entity for CommentNode {
    type Key = String;

    fn key(&self) -> String { self.id.clone() }
}

impl Entity for Arc<CommentNode> {
    type Key = String;

    fn key(&self) -> String { self.id.clone() }
}
