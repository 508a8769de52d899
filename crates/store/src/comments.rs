//! Comment thread container: a comment forest behind an atomically swapped snapshot.

use std::sync::Arc;

use arc_swap::ArcSwap;
use feeds_core::{CommentNode, Comparator, Pagination, PaginationResult, Reaction, ThreadEvent};
use metrics::counter;
use tokio::sync::watch;
use tracing::{debug, trace};

use crate::merge::merge_sorted;
use crate::thread::{self, Forest};
use crate::EventSink;

#[derive(Debug, Clone, Default)]
pub struct ThreadSnapshot {
    pub epoch: u64,
    pub comments: Forest,
    pub pagination: Pagination,
}

impl ThreadSnapshot {
    pub fn find(&self, id: &str) -> Option<&CommentNode> { thread::find(&self.comments, id) }
}

/// Update interface for comment threads, one method per event type.
pub trait ThreadHandler {
    fn on_comment_added(&self, comment: CommentNode);
    fn on_comment_updated(&self, comment: CommentNode);
    fn on_comment_removed(&self, id: &str);
    fn on_reaction_added(&self, comment_id: &str, reaction: Reaction);
    fn on_reaction_removed(&self, comment_id: &str, reaction: &Reaction);
    fn on_page_loaded(&self, page: PaginationResult<CommentNode>);
    fn on_replies_loaded(&self, parent_id: &str, page: PaginationResult<CommentNode>);

    fn dispatch(&self, event: ThreadEvent) {
        match event {
            ThreadEvent::CommentAdded { comment } => self.on_comment_added(comment),
            ThreadEvent::CommentUpdated { comment } => self.on_comment_updated(comment),
            ThreadEvent::CommentRemoved { id } => self.on_comment_removed(&id),
            ThreadEvent::ReactionAdded { comment_id, reaction } => self.on_reaction_added(&comment_id, reaction),
            ThreadEvent::ReactionRemoved { comment_id, reaction } => self.on_reaction_removed(&comment_id, &reaction),
            ThreadEvent::PageLoaded { page } => self.on_page_loaded(page),
            ThreadEvent::RepliesLoaded { parent_id, page } => self.on_replies_loaded(&parent_id, page),
        }
    }
}

/// Comments of one object (an activity), with replies nested under their parents.
pub struct CommentThread {
    snap: ArcSwap<ThreadSnapshot>,
    cmp: Comparator<CommentNode>,
    current_user_id: String,
    epoch_tx: watch::Sender<u64>,
}

impl CommentThread {
    /// `cmp` orders top-level comments and each loaded page of replies.
    /// `current_user_id` decides which reactions count as the reader's own.
    pub fn new(cmp: Comparator<CommentNode>, current_user_id: impl Into<String>) -> Self {
        let (epoch_tx, _) = watch::channel(0u64);
        Self {
            snap: ArcSwap::from_pointee(ThreadSnapshot::default()),
            cmp,
            current_user_id: current_user_id.into(),
            epoch_tx,
        }
    }

    pub fn current(&self) -> Arc<ThreadSnapshot> { self.snap.load_full() }

    pub fn comments(&self) -> Forest { self.snap.load().comments.clone() }

    pub fn pagination(&self) -> Pagination { self.snap.load().pagination.clone() }

    pub fn can_load_more(&self) -> bool { self.snap.load().pagination.has_next() }

    pub fn current_user_id(&self) -> &str { &self.current_user_id }

    pub fn subscribe(&self) -> watch::Receiver<u64> { self.epoch_tx.subscribe() }

    fn update<F>(&self, op: &'static str, f: F)
    where
        F: Fn(&ThreadSnapshot) -> (Forest, Pagination),
    {
        let prev = self.snap.rcu(|cur| {
            let (comments, pagination) = f(cur.as_ref());
            ThreadSnapshot { epoch: cur.epoch.saturating_add(1), comments, pagination }
        });
        let epoch = prev.epoch.saturating_add(1);
        self.epoch_tx.send_if_modified(|e| {
            if epoch > *e {
                *e = epoch;
                true
            } else {
                false
            }
        });
        counter!("store_events_applied_total", 1u64);
        debug!(op, epoch, "thread snapshot swapped");
    }

    fn patch<F>(&self, op: &'static str, f: F)
    where
        F: Fn(&Forest) -> Forest,
    {
        self.update(op, |cur| (f(&cur.comments), cur.pagination.clone()))
    }
}

impl ThreadHandler for CommentThread {
    fn on_comment_added(&self, comment: CommentNode) {
        if comment.is_top_level() {
            self.patch("comment_added", |f| thread::upsert_root(f, comment.clone(), |a, b| (self.cmp)(a, b)));
        } else {
            trace!(id = %comment.id, parent = ?comment.parent_id, "reply added");
            self.patch("reply_added", |f| thread::add_reply(f, comment.clone()));
        }
    }

    fn on_comment_updated(&self, comment: CommentNode) {
        self.patch("comment_updated", |f| thread::update_node(f, comment.clone()));
    }

    fn on_comment_removed(&self, id: &str) {
        self.patch("comment_removed", |f| thread::remove_node(f, id));
    }

    fn on_reaction_added(&self, comment_id: &str, reaction: Reaction) {
        self.patch("reaction_added", |f| {
            thread::upsert_reaction(f, comment_id, reaction.clone(), &self.current_user_id)
        });
    }

    fn on_reaction_removed(&self, comment_id: &str, reaction: &Reaction) {
        self.patch("reaction_removed", |f| {
            thread::remove_reaction(f, comment_id, reaction, &self.current_user_id)
        });
    }

    fn on_page_loaded(&self, page: PaginationResult<CommentNode>) {
        let incoming: Forest = page.items.into_iter().map(Arc::new).collect();
        self.update("page_loaded", |cur| {
            let comments = merge_sorted(&cur.comments, &incoming, |c| c.id.clone(), |a, b| (self.cmp)(&**a, &**b));
            (comments, page.pagination.clone())
        });
    }

    fn on_replies_loaded(&self, parent_id: &str, page: PaginationResult<CommentNode>) {
        self.patch("replies_loaded", |f| thread::merge_replies(f, parent_id, &page.items, |a, b| (self.cmp)(a, b)));
    }
}

impl EventSink<ThreadEvent> for CommentThread {
    fn apply(&self, event: ThreadEvent) { self.dispatch(event) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use feeds_core::Sort;

    fn at(secs: i64) -> DateTime<Utc> { DateTime::<Utc>::from_timestamp(secs, 0).expect("ts") }

    fn c(id: &str, parent: Option<&str>, secs: i64) -> CommentNode {
        CommentNode::new(id, parent.map(str::to_string), at(secs))
    }

    fn newest_first() -> Comparator<CommentNode> {
        Sort::desc(|c: &CommentNode| c.created_at).then_asc(|c| c.id.clone()).into_comparator()
    }

    #[test]
    fn top_level_comments_are_sorted_and_replies_nested() {
        let t = CommentThread::new(newest_first(), "me");
        t.dispatch(ThreadEvent::CommentAdded { comment: c("1", None, 10) });
        t.dispatch(ThreadEvent::CommentAdded { comment: c("2", None, 20) });
        t.dispatch(ThreadEvent::CommentAdded { comment: c("3", Some("1"), 30) });
        let snap = t.current();
        let top: Vec<_> = snap.comments.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(top, vec!["2", "1"]);
        assert_eq!(snap.find("1").expect("1").replies[0].id, "3");
        assert_eq!(snap.epoch, 3);
    }

    #[test]
    fn reply_to_unloaded_parent_is_dropped() {
        let t = CommentThread::new(newest_first(), "me");
        t.dispatch(ThreadEvent::CommentAdded { comment: c("1", None, 10) });
        let before = t.current();
        t.dispatch(ThreadEvent::CommentAdded { comment: c("9", Some("404"), 30) });
        let after = t.current();
        assert!(Arc::ptr_eq(&before.comments[0], &after.comments[0]));
        assert!(after.find("9").is_none());
    }

    #[test]
    fn own_reactions_use_current_user() {
        let t = CommentThread::new(newest_first(), "me");
        t.dispatch(ThreadEvent::CommentAdded { comment: c("1", None, 10) });
        let mine = Reaction { kind: "like".into(), user_id: "me".into(), created_at: at(11) };
        let theirs = Reaction { kind: "like".into(), user_id: "bob".into(), created_at: at(12) };
        t.dispatch(ThreadEvent::ReactionAdded { comment_id: "1".into(), reaction: mine.clone() });
        t.dispatch(ThreadEvent::ReactionAdded { comment_id: "1".into(), reaction: theirs });
        let snap = t.current();
        let r = &snap.find("1").expect("1").reactions;
        assert_eq!(r.count, 2);
        assert_eq!(r.own.len(), 1);
        t.dispatch(ThreadEvent::ReactionRemoved { comment_id: "1".into(), reaction: mine });
        assert!(t.current().find("1").expect("1").reactions.own.is_empty());
    }

    #[test]
    fn pages_and_reply_pages_merge() {
        let t = CommentThread::new(newest_first(), "me");
        t.dispatch(ThreadEvent::PageLoaded {
            page: PaginationResult::new(vec![c("1", None, 10), c("2", None, 20)], Pagination { next: Some("n".into()), previous: None }),
        });
        assert!(t.can_load_more());
        t.dispatch(ThreadEvent::RepliesLoaded {
            parent_id: "1".into(),
            page: PaginationResult::new(vec![c("11", Some("1"), 11), c("12", Some("1"), 12)], Pagination::default()),
        });
        let snap = t.current();
        let replies: Vec<_> = snap.find("1").expect("1").replies.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(replies, vec!["12", "11"]);
        t.dispatch(ThreadEvent::CommentRemoved { id: "12".into() });
        assert_eq!(t.current().find("1").expect("1").replies.len(), 1);
    }
}
