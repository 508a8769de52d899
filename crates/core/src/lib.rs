//! Feeds core types: entities, ordering, pagination cursors.
//!
//! Everything here is plain data plus the ordering primitives the store
//! merges with. Nothing in this crate does I/O.

#![forbid(unsafe_code)]

use std::cmp::Ordering;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub mod comment;
pub mod event;
pub mod reaction;

pub use comment::CommentNode;
pub use event::{CollectionEvent, ThreadEvent};
pub use reaction::{Reaction, ReactionGroup, Reactions};

pub mod prelude {
    pub use super::{
        by_key, CollectionEvent, CommentNode, Comparator, Entity, Pagination, PaginationResult,
        Reaction, ReactionGroup, Reactions, Sort, ThreadEvent,
    };
}

/// A record with a unique key. Records are replaced whole, never patched in place.
pub trait Entity: Clone + Send + Sync + 'static {
    type Key: Clone + Eq + Hash + Debug + Send + Sync + 'static;

    fn key(&self) -> Self::Key;
}

/// Total order over records of one kind. Supplied by the owner of a collection.
pub type Comparator<T> = Arc<dyn Fn(&T, &T) -> Ordering + Send + Sync>;

/// Comparator ordering ascending by a projected field.
pub fn by_key<T, K, F>(f: F) -> Comparator<T>
where
    T: 'static,
    K: Ord + 'static,
    F: Fn(&T) -> K + Send + Sync + 'static,
{
    Arc::new(move |a, b| f(a).cmp(&f(b)))
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

/// Multi-field ordering. Fields are compared in order; later fields break ties.
///
/// ```
/// use feeds_core::Sort;
/// let cmp = Sort::desc(|p: &(i64, u32)| p.0).then_asc(|p| p.1).into_comparator();
/// let mut v = vec![(1, 2), (3, 1), (1, 1)];
/// v.sort_by(|a, b| cmp(a, b));
/// assert_eq!(v, vec![(3, 1), (1, 1), (1, 2)]);
/// ```
pub struct Sort<T> {
    fields: Vec<(Comparator<T>, Direction)>,
}

impl<T: 'static> Sort<T> {
    pub fn asc<K: Ord + 'static, F: Fn(&T) -> K + Send + Sync + 'static>(f: F) -> Self {
        Self { fields: vec![(by_key(f), Direction::Asc)] }
    }

    pub fn desc<K: Ord + 'static, F: Fn(&T) -> K + Send + Sync + 'static>(f: F) -> Self {
        Self { fields: vec![(by_key(f), Direction::Desc)] }
    }

    pub fn then_asc<K: Ord + 'static, F: Fn(&T) -> K + Send + Sync + 'static>(mut self, f: F) -> Self {
        self.fields.push((by_key(f), Direction::Asc));
        self
    }

    pub fn then_desc<K: Ord + 'static, F: Fn(&T) -> K + Send + Sync + 'static>(mut self, f: F) -> Self {
        self.fields.push((by_key(f), Direction::Desc));
        self
    }

    pub fn into_comparator(self) -> Comparator<T> {
        let fields = self.fields;
        Arc::new(move |a, b| {
            for (cmp, dir) in fields.iter() {
                let o = match dir {
                    Direction::Asc => cmp(a, b),
                    Direction::Desc => cmp(b, a),
                };
                if o != Ordering::Equal {
                    return o;
                }
            }
            Ordering::Equal
        })
    }
}

/// Cursor pair from the most recent page; `next = None` means no more pages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Pagination {
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub previous: Option<String>,
}

impl Pagination {
    pub fn has_next(&self) -> bool { self.next.is_some() }
}

/// One fetched page and the cursor that came with it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PaginationResult<T> {
    pub items: Vec<T>,
    #[serde(default)]
    pub pagination: Pagination,
}

impl<T> PaginationResult<T> {
    pub fn new(items: Vec<T>, pagination: Pagination) -> Self { Self { items, pagination } }
}
