use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use storetree::error::IndexError;
use storetree::index::{IndexConfig, StoreIndexLifecycle};
use tempfile::TempDir;

fn on_disk(dir: &TempDir) -> IndexConfig {
    IndexConfig {
        root: Some(dir.path().join("index")),
        ..Default::default()
    }
}

#[test]
fn racing_threads_share_one_handle_per_store() {
    let dir = TempDir::new().unwrap();
    let lifecycle = Arc::new(StoreIndexLifecycle::new(on_disk(&dir)));

    let workers: Vec<_> = (0..12)
        .map(|i| {
            let lifecycle = Arc::clone(&lifecycle);
            thread::spawn(move || {
                let store_id = (i % 3) as u64 + 1;
                let handle = lifecycle.get_or_create_index(store_id).unwrap();
                (store_id, Arc::as_ptr(&handle) as usize)
            })
        })
        .collect();
    let results: Vec<(u64, usize)> = workers.into_iter().map(|w| w.join().unwrap()).collect();

    for store_id in 1..=3u64 {
        let pointers: HashSet<usize> = results
            .iter()
            .filter(|(id, _)| *id == store_id)
            .map(|(_, ptr)| *ptr)
            .collect();
        assert_eq!(pointers.len(), 1, "store {} opened more than once", store_id);
    }
    assert_eq!(lifecycle.open_count(), 3);
    assert!(dir.path().join("index").join("store-2").is_dir());
    assert_eq!(lifecycle.close_all(), 3);
}

#[test]
fn a_second_lifecycle_on_the_same_root_cannot_take_the_writer() {
    let dir = TempDir::new().unwrap();
    let first = StoreIndexLifecycle::new(on_disk(&dir));
    let second = StoreIndexLifecycle::new(on_disk(&dir));

    first.get_or_create_index(5).unwrap();
    let err = second.get_or_create_index(5).unwrap_err();
    assert!(matches!(err, IndexError::Lock { store_id: 5 }));
    // a failed open leaves nothing behind
    assert_eq!(second.open_count(), 0);
    // other stores are unaffected
    second.get_or_create_index(6).unwrap();

    assert_eq!(first.close_all(), 1);
    second.get_or_create_index(5).unwrap();
    assert_eq!(second.close_all(), 2);
}

#[test]
fn fresh_index_answers_with_no_hits() {
    let lifecycle = StoreIndexLifecycle::new(IndexConfig::default());
    let handle = lifecycle.get_or_create_index(1).unwrap();
    assert_eq!(handle.store_id(), 1);
    assert_eq!(handle.num_docs(), 0);
    assert!(handle.search("anything", 10).unwrap().is_empty());

    assert_eq!(lifecycle.close_all(), 1);
    assert!(handle.is_closed());
    assert!(lifecycle.get(1).is_none());
}
