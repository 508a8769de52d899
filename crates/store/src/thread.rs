//! Recursive patching of a comment forest.
//!
//! Each operation returns a new forest. Only nodes on the path from a root to
//! the changed node are rebuilt; every other subtree is the same `Arc` as in the
//! input. A node that cannot be found (its parent was never loaded locally) is
//! ignored and the forest comes back unchanged.

use std::cmp::Ordering;
use std::sync::Arc;

use feeds_core::{CommentNode, Reaction};

use crate::merge::{merge_sorted, upsert_sorted};

pub type Forest = Vec<Arc<CommentNode>>;

/// Rebuild `nodes` with the first node that `patch` changes swapped in.
/// Returns `None` when nothing changed.
fn patch_first<F>(nodes: &[Arc<CommentNode>], patch: &F) -> Option<Forest>
where
    F: Fn(&Arc<CommentNode>) -> Option<Arc<CommentNode>>,
{
    nodes.iter().enumerate().find_map(|(i, n)| {
        patch(n).map(|changed| {
            let mut out = nodes.to_vec();
            out[i] = changed;
            out
        })
    })
}

/// Apply `f` to the node with `id`, searching depth first.
fn patch_node<F>(node: &Arc<CommentNode>, id: &str, f: &F) -> Option<Arc<CommentNode>>
where
    F: Fn(&CommentNode) -> CommentNode,
{
    if node.id == id {
        return Some(Arc::new(f(node)));
    }
    let replies = patch_first(&node.replies, &|child| patch_node(child, id, f))?;
    Some(Arc::new(CommentNode { replies, ..(**node).clone() }))
}

fn patch_forest<F>(forest: &[Arc<CommentNode>], id: &str, f: F) -> Forest
where
    F: Fn(&CommentNode) -> CommentNode,
{
    patch_first(forest, &|n| patch_node(n, id, &f)).unwrap_or_else(|| forest.to_vec())
}

/// Attach `reply` under the node whose id is `reply.parent_id`.
///
/// A child with the same id is replaced in place; a new child is appended and
/// bumps the parent's `reply_count`. Replies without a loaded parent are dropped.
pub fn add_reply(forest: &[Arc<CommentNode>], reply: CommentNode) -> Forest {
    let Some(parent_id) = reply.parent_id.clone() else {
        return forest.to_vec();
    };
    let reply = Arc::new(reply);
    patch_forest(forest, &parent_id, |parent| {
        let mut next = parent.clone();
        match next.replies.iter().position(|c| c.id == reply.id) {
            Some(i) => next.replies[i] = Arc::clone(&reply),
            None => {
                next.replies.push(Arc::clone(&reply));
                next.reply_count = next.reply_count.saturating_add(1);
            }
        }
        next
    })
}

/// Replace the fields of the node with `updated.id`, keeping its loaded replies.
pub fn update_node(forest: &[Arc<CommentNode>], updated: CommentNode) -> Forest {
    let id = updated.id.clone();
    patch_forest(forest, &id, |old| CommentNode { replies: old.replies.clone(), ..updated.clone() })
}

/// Remove the node with `id` and its subtree.
///
/// Top-level nodes are removed outright. A nested node is removed from its
/// parent, whose `reply_count` drops by one; ancestors above it keep theirs.
pub fn remove_node(forest: &[Arc<CommentNode>], id: &str) -> Forest {
    if forest.iter().any(|n| n.id == id) {
        return forest.iter().filter(|n| n.id != id).cloned().collect();
    }
    patch_first(forest, &|n| remove_below(n, id)).unwrap_or_else(|| forest.to_vec())
}

fn remove_below(node: &Arc<CommentNode>, id: &str) -> Option<Arc<CommentNode>> {
    if node.replies.iter().any(|c| c.id == id) {
        let mut next = (**node).clone();
        next.replies.retain(|c| c.id != id);
        next.reply_count = next.reply_count.saturating_sub(1);
        return Some(Arc::new(next));
    }
    let replies = patch_first(&node.replies, &|child| remove_below(child, id))?;
    Some(Arc::new(CommentNode { replies, ..(**node).clone() }))
}

pub fn upsert_reaction(
    forest: &[Arc<CommentNode>],
    target_id: &str,
    reaction: Reaction,
    current_user_id: &str,
) -> Forest {
    patch_forest(forest, target_id, |node| {
        let mut next = node.clone();
        next.reactions.upsert(reaction.clone(), current_user_id);
        next
    })
}

pub fn remove_reaction(
    forest: &[Arc<CommentNode>],
    target_id: &str,
    reaction: &Reaction,
    current_user_id: &str,
) -> Forest {
    patch_forest(forest, target_id, |node| {
        let mut next = node.clone();
        next.reactions.remove(reaction, current_user_id);
        next
    })
}

/// Merge a fetched page of replies into the children of `parent_id`.
pub fn merge_replies<C>(
    forest: &[Arc<CommentNode>],
    parent_id: &str,
    page: &[CommentNode],
    cmp: C,
) -> Forest
where
    C: Fn(&CommentNode, &CommentNode) -> Ordering,
{
    let incoming: Forest = page.iter().cloned().map(Arc::new).collect();
    patch_forest(forest, parent_id, |parent| {
        let replies = merge_sorted(&parent.replies, &incoming, |c| c.id.clone(), |a, b| cmp(&**a, &**b));
        CommentNode { replies, ..parent.clone() }
    })
}

/// Insert or replace a top-level comment at its sorted position.
pub fn upsert_root<C>(forest: &[Arc<CommentNode>], comment: CommentNode, cmp: C) -> Forest
where
    C: Fn(&CommentNode, &CommentNode) -> Ordering,
{
    upsert_sorted(forest, Arc::new(comment), |c| c.id.clone(), |a, b| cmp(&**a, &**b))
}

/// Depth-first lookup across the whole forest.
pub fn find<'a>(forest: &'a [Arc<CommentNode>], id: &str) -> Option<&'a CommentNode> {
    forest.iter().find_map(|n| n.find(id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    fn at(secs: i64) -> DateTime<Utc> { DateTime::<Utc>::from_timestamp(secs, 0).expect("ts") }

    fn node(id: &str, parent: Option<&str>) -> CommentNode {
        CommentNode::new(id, parent.map(str::to_string), at(id.len() as i64))
    }

    fn with_replies(mut n: CommentNode, replies: Vec<CommentNode>) -> CommentNode {
        n.reply_count = replies.len() as u32;
        n.replies = replies.into_iter().map(Arc::new).collect();
        n
    }

    fn same_forest(a: &[Arc<CommentNode>], b: &[Arc<CommentNode>]) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| Arc::ptr_eq(x, y))
    }

    #[test]
    fn add_reply_attaches_under_parent() {
        let forest = vec![Arc::new(node("1", None))];
        let out = add_reply(&forest, node("2", Some("1")));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].replies.len(), 1);
        assert_eq!(out[0].replies[0].id, "2");
        assert_eq!(out[0].reply_count, 1);
        // input untouched
        assert!(forest[0].replies.is_empty());
    }

    #[test]
    fn add_reply_twice_replaces_instead_of_duplicating() {
        let forest = vec![Arc::new(node("1", None))];
        let once = add_reply(&forest, node("2", Some("1")));
        let mut again = node("2", Some("1"));
        again.body = serde_json::json!({"text": "edited"});
        let twice = add_reply(&once, again);
        assert_eq!(twice[0].replies.len(), 1);
        assert_eq!(twice[0].reply_count, 1);
        assert_eq!(twice[0].replies[0].body["text"], "edited");
    }

    #[test]
    fn add_reply_with_unknown_parent_returns_same_forest() {
        let forest = vec![
            Arc::new(with_replies(node("1", None), vec![node("11", Some("1"))])),
            Arc::new(node("2", None)),
        ];
        let out = add_reply(&forest, node("x", Some("missing")));
        assert!(same_forest(&forest, &out));
    }

    #[test]
    fn add_reply_deep_shares_untouched_siblings() {
        let forest = vec![
            Arc::new(with_replies(node("1", None), vec![node("11", Some("1")), node("12", Some("1"))])),
            Arc::new(node("2", None)),
        ];
        let out = add_reply(&forest, node("121", Some("12")));
        assert!(Arc::ptr_eq(&forest[1], &out[1]));
        assert!(Arc::ptr_eq(&forest[0].replies[0], &out[0].replies[0]));
        assert_eq!(out[0].replies[1].replies[0].id, "121");
        assert_eq!(out[0].reply_count, 2);
    }

    #[test]
    fn update_node_keeps_replies() {
        let forest = vec![Arc::new(with_replies(node("1", None), vec![node("2", Some("1"))]))];
        let mut updated = node("1", None);
        updated.body = serde_json::json!({"text": "new"});
        updated.reply_count = 7;
        let out = update_node(&forest, updated);
        assert_eq!(out[0].body["text"], "new");
        assert_eq!(out[0].reply_count, 7);
        assert_eq!(out[0].replies.len(), 1);
        assert!(Arc::ptr_eq(&forest[0].replies[0], &out[0].replies[0]));
    }

    #[test]
    fn update_unknown_node_is_noop() {
        let forest = vec![Arc::new(node("1", None))];
        let out = update_node(&forest, node("9", None));
        assert!(same_forest(&forest, &out));
    }

    #[test]
    fn remove_top_level_node() {
        let forest = vec![Arc::new(node("1", None)), Arc::new(node("2", None))];
        let out = remove_node(&forest, "1");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, "2");
    }

    #[test]
    fn remove_nested_adjusts_only_direct_parent() {
        let n3 = node("3", Some("2"));
        let n2 = with_replies(node("2", Some("1")), vec![n3]);
        let n1 = with_replies(node("1", None), vec![n2]);
        let forest = vec![Arc::new(n1)];

        let out = remove_node(&forest, "3");
        assert_eq!(out[0].reply_count, 1);
        assert_eq!(out[0].replies[0].reply_count, 0);
        assert!(out[0].replies[0].replies.is_empty());
    }

    #[test]
    fn remove_unknown_node_is_noop() {
        let forest = vec![Arc::new(with_replies(node("1", None), vec![node("2", Some("1"))]))];
        let out = remove_node(&forest, "nope");
        assert!(same_forest(&forest, &out));
    }

    #[test]
    fn reactions_touch_only_target() {
        let forest = vec![
            Arc::new(with_replies(node("1", None), vec![node("2", Some("1"))])),
            Arc::new(node("3", None)),
        ];
        let like = Reaction { kind: "like".into(), user_id: "me".into(), created_at: at(5) };
        let out = upsert_reaction(&forest, "2", like.clone(), "me");
        let target = find(&out, "2").expect("target");
        assert_eq!(target.reactions.count, 1);
        assert!(target.reactions.has_own("like"));
        assert_eq!(out[0].reactions.count, 0);
        assert!(Arc::ptr_eq(&forest[1], &out[1]));

        let back = remove_reaction(&out, "2", &like, "me");
        assert_eq!(find(&back, "2").expect("target").reactions.count, 0);
    }

    #[test]
    fn merge_replies_into_loaded_parent() {
        let mut b = node("b", Some("1"));
        b.created_at = at(20);
        let forest = vec![Arc::new(with_replies(node("1", None), vec![b]))];
        let mut a = node("a", Some("1"));
        a.created_at = at(10);
        let mut c = node("c", Some("1"));
        c.created_at = at(30);
        let page = vec![c, a];
        let out = merge_replies(&forest, "1", &page, |x, y| x.created_at.cmp(&y.created_at));
        let ids: Vec<_> = out[0].replies.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }
}
