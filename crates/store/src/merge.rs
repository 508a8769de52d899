//! Sorted merge/upsert over key-unique ordered collections.
//!
//! All functions are pure: they read the existing collection and return a new
//! one. Sorting is stable, so records comparing equal keep their relative order
//! and re-applying the same input yields the same output.

use std::cmp::Ordering;
use std::hash::Hash;

use rustc_hash::FxHashSet;

/// Union of `existing` and `incoming`, one record per key, sorted by `cmp`.
/// When a key is in both, the incoming record wins.
pub fn merge_sorted<T, K, F, C>(existing: &[T], incoming: &[T], key_of: F, cmp: C) -> Vec<T>
where
    T: Clone,
    K: Eq + Hash,
    F: Fn(&T) -> K,
    C: Fn(&T, &T) -> Ordering,
{
    let fresh: FxHashSet<K> = incoming.iter().map(&key_of).collect();
    let mut out = Vec::with_capacity(existing.len() + incoming.len());
    out.extend(existing.iter().filter(|x| !fresh.contains(&key_of(*x))).cloned());
    out.extend(incoming.iter().cloned());
    out.sort_by(|a, b| cmp(a, b));
    out
}

/// Insert `item`, replacing any record with the same key, at its sorted position.
///
/// `existing` must already be sorted by `cmp`. Among equal records the new one
/// lands last, which is where a stable re-sort would put it.
pub fn upsert_sorted<T, K, F, C>(existing: &[T], item: T, key_of: F, cmp: C) -> Vec<T>
where
    T: Clone,
    K: Eq,
    F: Fn(&T) -> K,
    C: Fn(&T, &T) -> Ordering,
{
    let key = key_of(&item);
    let mut out: Vec<T> = Vec::with_capacity(existing.len() + 1);
    out.extend(existing.iter().filter(|x| key_of(*x) != key).cloned());
    let at = out.partition_point(|x| cmp(x, &item) != Ordering::Greater);
    out.insert(at, item);
    out
}

/// Drop the record with `key`. Unknown keys leave the collection as is.
pub fn remove_by_key<T, K, F>(existing: &[T], key: &K, key_of: F) -> Vec<T>
where
    T: Clone,
    K: Eq,
    F: Fn(&T) -> K,
{
    existing.iter().filter(|x| key_of(*x) != *key).cloned().collect()
}

/// True when `items` is sorted by `cmp` and has no duplicate keys.
pub fn is_sorted_unique<T, K, F, C>(items: &[T], key_of: F, cmp: C) -> bool
where
    K: Eq + Hash,
    F: Fn(&T) -> K,
    C: Fn(&T, &T) -> Ordering,
{
    let mut seen = FxHashSet::default();
    items.windows(2).all(|w| cmp(&w[0], &w[1]) != Ordering::Greater)
        && items.iter().all(|x| seen.insert(key_of(x)))
}
