#![forbid(unsafe_code)]

use std::sync::Arc;

use feeds_core::{by_key, CollectionEvent, Entity, Pagination, PaginationResult};
use feeds_store::{spawn_dispatch, PaginatedCollection};

#[derive(Debug, Clone, PartialEq)]
struct Bookmark { id: String, rank: i64, folder: String }

impl Entity for Bookmark {
    type Key = String;
    fn key(&self) -> String { self.id.clone() }
}

fn bm(id: &str, rank: i64, folder: &str) -> Bookmark {
    Bookmark { id: id.to_string(), rank, folder: folder.to_string() }
}

fn page(items: Vec<Bookmark>, next: Option<&str>) -> CollectionEvent<Bookmark> {
    CollectionEvent::PageLoaded {
        page: PaginationResult::new(items, Pagination { next: next.map(str::to_string), previous: None }),
    }
}

#[tokio::test]
async fn replay_pages_and_realtime_events() {
    let coll = Arc::new(PaginatedCollection::new(by_key(|b: &Bookmark| b.rank)));
    let (tx, handle) = spawn_dispatch(Arc::clone(&coll), 16);

    let events = vec![
        page(vec![bm("a", 1, "x"), bm("c", 3, "x")], Some("p2")),
        // realtime insert lands between existing records
        CollectionEvent::Added { item: bm("b", 2, "x") },
        // duplicate delivery of the same add is harmless
        CollectionEvent::Added { item: bm("b", 2, "x") },
        // second page carries a fresher copy of "c"
        page(vec![bm("c", 3, "y"), bm("d", 4, "y")], None),
        CollectionEvent::Updated { item: bm("a", 10, "z") },
        CollectionEvent::Removed { key: "d".to_string() },
    ];
    for ev in events {
        tx.send(ev).await.expect("send");
    }
    drop(tx);
    assert_eq!(handle.await.expect("join"), 6);

    let snap = coll.current();
    assert_eq!(snap.epoch, 6);
    let ids: Vec<_> = snap.items.iter().map(|b| b.id.as_str()).collect();
    assert_eq!(ids, vec!["b", "c", "a"]);
    assert_eq!(snap.items[1].folder, "y");
    assert!(!coll.can_load_more());
}

#[tokio::test]
async fn readers_always_see_sorted_unique_snapshots() {
    let coll = Arc::new(PaginatedCollection::new(by_key(|b: &Bookmark| b.rank)));
    let (tx, handle) = spawn_dispatch(Arc::clone(&coll), 4);

    let reader = {
        let coll = Arc::clone(&coll);
        tokio::spawn(async move {
            for _ in 0..200 {
                let snap = coll.current();
                assert!(feeds_store::merge::is_sorted_unique(&snap.items, |b| b.id.clone(), |a, b| a.rank.cmp(&b.rank)));
                tokio::task::yield_now().await;
            }
        })
    };

    for i in 0..100i64 {
        let id = format!("k{}", i % 17);
        tx.send(CollectionEvent::Added { item: bm(&id, (i * 7) % 23, "f") }).await.expect("send");
    }
    drop(tx);
    handle.await.expect("join");
    reader.await.expect("reader");
    assert_eq!(coll.current().items.len(), 17);
}
