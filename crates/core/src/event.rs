//! Closed set of inbound change events, one enum per container shape.
//!
//! An external router decodes server events and hands each one to the matching
//! container; containers dispatch on the variant with a `match`.

use serde::{Deserialize, Serialize};

use crate::{CommentNode, Entity, PaginationResult, Reaction};

/// Events for a flat, sorted collection of `T`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[serde(bound(
    serialize = "T: Serialize, T::Key: Serialize",
    deserialize = "T: Deserialize<'de>, T::Key: Deserialize<'de>"
))]
pub enum CollectionEvent<T: Entity> {
    Added { item: T },
    Updated { item: T },
    Removed { key: T::Key },
    PageLoaded { page: PaginationResult<T> },
}

impl<T: Entity> CollectionEvent<T> {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Added { .. } => "added",
            Self::Updated { .. } => "updated",
            Self::Removed { .. } => "removed",
            Self::PageLoaded { .. } => "page_loaded",
        }
    }
}

/// Events for a forest of comment threads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ThreadEvent {
    CommentAdded { comment: CommentNode },
    CommentUpdated { comment: CommentNode },
    CommentRemoved { id: String },
    ReactionAdded { comment_id: String, reaction: Reaction },
    ReactionRemoved { comment_id: String, reaction: Reaction },
    /// A page of top-level comments.
    PageLoaded { page: PaginationResult<CommentNode> },
    /// A page of replies under one comment.
    RepliesLoaded { parent_id: String, page: PaginationResult<CommentNode> },
}

impl ThreadEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CommentAdded { .. } => "comment_added",
            Self::CommentUpdated { .. } => "comment_updated",
            Self::CommentRemoved { .. } => "comment_removed",
            Self::ReactionAdded { .. } => "reaction_added",
            Self::ReactionRemoved { .. } => "reaction_removed",
            Self::PageLoaded { .. } => "page_loaded",
            Self::RepliesLoaded { .. } => "replies_loaded",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_event_decodes_tagged_json() {
        let ev: ThreadEvent = serde_json::from_str(
            r#"{"type":"comment_added","comment":{"id":"2","parent_id":"1","created_at":"2024-01-01T00:00:00Z"}}"#,
        )
        .expect("decode");
        match ev {
            ThreadEvent::CommentAdded { comment } => {
                assert_eq!(comment.id, "2");
                assert_eq!(comment.parent_id.as_deref(), Some("1"));
                assert!(comment.replies.is_empty());
            }
            other => panic!("unexpected event {}", other.name()),
        }
    }

    #[test]
    fn collection_event_decodes_removed_key() {
        let ev: CollectionEvent<CommentNode> =
            serde_json::from_str(r#"{"type":"removed","key":"c1"}"#).expect("decode");
        assert_eq!(ev.name(), "removed");
        assert!(matches!(ev, CollectionEvent::Removed { key } if key == "c1"));
    }
}
