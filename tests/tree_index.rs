//! End-to-end scenarios against the public index surface: lifecycle, point
//! operations, range queries, compaction, and cache transparency.

use bucktree::{IndexError, Record, RecordStatus, TreeIndex, TreeIndexOptions};
use tempfile::tempdir;

fn options(node_capacity: usize) -> TreeIndexOptions {
    TreeIndexOptions::default()
        .key_size(8)
        .doc_id_size(8)
        .node_capacity(node_capacity)
}

fn trimmed(bytes: &[u8]) -> Vec<u8> {
    bytes.iter().take_while(|b| **b != 0).copied().collect()
}

fn live_set(index: &mut TreeIndex) -> Vec<(Vec<u8>, Vec<u8>, u32)> {
    index
        .all(None, 0)
        .unwrap()
        .map(|r| {
            let record = r.unwrap();
            (trimmed(&record.doc_id), trimmed(&record.key), record.size)
        })
        .collect()
}

#[test]
fn four_inserts_come_back_in_key_order() {
    let dir = tempdir().unwrap();
    let mut index = TreeIndex::create(dir.path(), "idx", options(4)).unwrap();

    for (doc, key) in [("d1", "5"), ("d2", "3"), ("d3", "8"), ("d4", "1")] {
        index
            .insert(doc.as_bytes(), key.as_bytes(), 0, 0, RecordStatus::Live)
            .unwrap();
    }

    let ordered = live_set(&mut index);
    assert_eq!(
        ordered,
        vec![
            (b"d4".to_vec(), b"1".to_vec(), 0),
            (b"d2".to_vec(), b"3".to_vec(), 0),
            (b"d1".to_vec(), b"5".to_vec(), 0),
            (b"d3".to_vec(), b"8".to_vec(), 0),
        ]
    );
}

#[test]
fn fifth_insert_splits_and_everything_stays_reachable() {
    let dir = tempdir().unwrap();
    let mut index = TreeIndex::create(dir.path(), "idx", options(4)).unwrap();

    for (doc, key) in [("d1", "5"), ("d2", "3"), ("d3", "8"), ("d4", "1")] {
        index
            .insert(doc.as_bytes(), key.as_bytes(), 0, 0, RecordStatus::Live)
            .unwrap();
    }
    index
        .insert(b"d5", b"6", 0, 0, RecordStatus::Live)
        .unwrap();

    assert_eq!(trimmed(&index.get(b"6").unwrap().doc_id), b"d5");
    let keys: Vec<Vec<u8>> = live_set(&mut index).into_iter().map(|(_, k, _)| k).collect();
    assert_eq!(
        keys,
        vec![
            b"1".to_vec(),
            b"3".to_vec(),
            b"5".to_vec(),
            b"6".to_vec(),
            b"8".to_vec()
        ]
    );
}

#[test]
fn deleted_key_disappears_until_reinserted() {
    let dir = tempdir().unwrap();
    let mut index = TreeIndex::create(dir.path(), "idx", options(4)).unwrap();

    for (doc, key) in [("d1", "5"), ("d2", "3"), ("d3", "8"), ("d4", "1"), ("d5", "6")] {
        index
            .insert(doc.as_bytes(), key.as_bytes(), 0, 0, RecordStatus::Live)
            .unwrap();
    }

    index.delete(b"d2", b"3").unwrap();
    assert!(matches!(index.get(b"3"), Err(IndexError::ElemNotFound)));
    let keys: Vec<Vec<u8>> = live_set(&mut index).into_iter().map(|(_, k, _)| k).collect();
    assert_eq!(keys.len(), 4);
    assert!(!keys.contains(&b"3".to_vec()));

    index
        .insert(b"d6", b"3", 0, 0, RecordStatus::Live)
        .unwrap();
    assert_eq!(trimmed(&index.get(b"3").unwrap().doc_id), b"d6");
    assert_eq!(live_set(&mut index).len(), 5);
}

#[test]
fn compaction_drops_tombstones_and_shrinks_the_file() {
    let dir = tempdir().unwrap();
    let mut index = TreeIndex::create(dir.path(), "idx", options(4)).unwrap();

    for i in 0..10u32 {
        let payload = format!("payload-{i}");
        let (start, size) = index.value_store().append(payload.as_bytes()).unwrap();
        index
            .insert(
                format!("d{i}").as_bytes(),
                format!("k{i}").as_bytes(),
                start,
                size,
                RecordStatus::Live,
            )
            .unwrap();
    }
    index.delete(b"d2", b"k2").unwrap();
    index.delete(b"d9", b"k9").unwrap();

    let before: Vec<_> = live_set(&mut index);
    assert_eq!(before.len(), 8);
    let file_before = std::fs::metadata(dir.path().join("idx_buck")).unwrap().len();

    assert!(index.compact(0).is_ok());

    let after = live_set(&mut index);
    assert_eq!(after, before);
    let file_after = std::fs::metadata(dir.path().join("idx_buck")).unwrap().len();
    assert!(file_after <= file_before);

    // Every surviving payload is readable at its relocated address.
    let records: Vec<Record> = index.all(None, 0).unwrap().map(|r| r.unwrap()).collect();
    for record in records {
        let payload = index
            .value_store()
            .read(record.start, record.size)
            .unwrap();
        assert!(payload.starts_with(b"payload-"));
    }
}

#[test]
fn bounded_range_matches_the_reference_scenario() {
    let dir = tempdir().unwrap();
    let mut index = TreeIndex::create(dir.path(), "idx", options(4)).unwrap();

    for (i, key) in ["1", "3", "5", "6", "8"].iter().enumerate() {
        index
            .insert(format!("d{i}").as_bytes(), key.as_bytes(), 0, 0, RecordStatus::Live)
            .unwrap();
    }

    let keys: Vec<Vec<u8>> = index
        .get_between(Some(b"3"), Some(b"8"), Some(2), 0, true, false)
        .unwrap()
        .map(|r| trimmed(&r.unwrap().key))
        .collect();
    assert_eq!(keys, vec![b"3".to_vec(), b"5".to_vec()]);
}

#[test]
fn random_churn_preserves_order_and_lookups() {
    let dir = tempdir().unwrap();
    let mut index = TreeIndex::create(dir.path(), "idx", options(5)).unwrap();

    // Deterministic pseudo-random op mix.
    let mut state = 0x2545f491_u32;
    let mut step = || {
        state = state.wrapping_mul(1103515245).wrapping_add(12345);
        state >> 16
    };

    let mut alive: Vec<u32> = Vec::new();
    for _ in 0..400 {
        let roll = step() % 4;
        if roll < 3 || alive.is_empty() {
            let id = step() % 1000;
            index
                .insert(
                    format!("d{id:03}").as_bytes(),
                    format!("k{id:03}").as_bytes(),
                    id,
                    1,
                    RecordStatus::Live,
                )
                .unwrap();
            alive.push(id);
        } else {
            let victim = alive.swap_remove((step() as usize) % alive.len());
            index
                .delete(
                    format!("d{victim:03}").as_bytes(),
                    format!("k{victim:03}").as_bytes(),
                )
                .unwrap();
        }
    }

    let keys: Vec<Vec<u8>> = index
        .all(None, 0)
        .unwrap()
        .map(|r| r.unwrap().key.to_vec())
        .collect();
    assert_eq!(keys.len(), alive.len());
    assert!(keys.windows(2).all(|w| w[0] <= w[1]));

    let mut expected = alive.clone();
    expected.sort_unstable();
    for id in expected {
        let record = index.get(format!("k{id:03}").as_bytes()).unwrap();
        assert_eq!(record.start, id);
    }
}

#[test]
fn every_inserted_pair_is_retrievable() {
    let dir = tempdir().unwrap();
    let mut index = TreeIndex::create(dir.path(), "idx", options(4)).unwrap();

    // Insertion order scrambled by a fixed stride walk over 0..97.
    let n = 97u32;
    let mut i = 13u32;
    for _ in 0..n {
        index
            .insert(
                format!("d{i:02}").as_bytes(),
                format!("k{i:02}").as_bytes(),
                i * 7,
                i,
                RecordStatus::Live,
            )
            .unwrap();
        i = (i + 41) % n;
    }

    for id in 0..n {
        let record = index.get(format!("k{id:02}").as_bytes()).unwrap();
        assert_eq!(trimmed(&record.doc_id), format!("d{id:02}").into_bytes());
        assert_eq!(record.start, id * 7);
        assert_eq!(record.size, id);
    }
}

#[test]
fn results_are_identical_with_caches_disabled() {
    let dir = tempdir().unwrap();
    let cached = TreeIndex::create(dir.path(), "cached", options(4)).unwrap();
    let uncached = TreeIndex::create(
        dir.path(),
        "uncached",
        options(4)
            .single_cache_capacity(0)
            .two_level_cache_capacity(0),
    )
    .unwrap();
    let mut indexes = [cached, uncached];

    for index in indexes.iter_mut() {
        for i in 0..60u32 {
            index
                .insert(
                    format!("d{i:02}").as_bytes(),
                    format!("k{:02}", (i * 29) % 60).as_bytes(),
                    i,
                    1,
                    RecordStatus::Live,
                )
                .unwrap();
        }
        for i in (0..60u32).step_by(3) {
            index
                .delete(
                    format!("d{i:02}").as_bytes(),
                    format!("k{:02}", (i * 29) % 60).as_bytes(),
                )
                .unwrap();
        }
        for i in (0..60u32).step_by(4) {
            let key = format!("k{:02}", (i * 29) % 60);
            let _ = index.update(format!("d{i:02}").as_bytes(), key.as_bytes(), 900 + i, 2, RecordStatus::Live);
        }
    }

    let [mut cached, mut uncached] = indexes;
    let full_a: Vec<Record> = cached.all(None, 0).unwrap().map(|r| r.unwrap()).collect();
    let full_b: Vec<Record> = uncached.all(None, 0).unwrap().map(|r| r.unwrap()).collect();
    assert_eq!(full_a, full_b);

    for i in 0..60u32 {
        let key = format!("k{i:02}");
        let a = cached.get(key.as_bytes());
        let b = uncached.get(key.as_bytes());
        match (a, b) {
            (Ok(x), Ok(y)) => assert_eq!(x, y),
            (Err(IndexError::ElemNotFound), Err(IndexError::ElemNotFound)) => {}
            (a, b) => panic!("cache changed a result for {key}: {a:?} vs {b:?}"),
        }
    }

    let range_a: Vec<Record> = cached
        .get_between(Some(b"k10"), Some(b"k50"), None, 2, true, false)
        .unwrap()
        .map(|r| r.unwrap())
        .collect();
    let range_b: Vec<Record> = uncached
        .get_between(Some(b"k10"), Some(b"k50"), None, 2, true, false)
        .unwrap()
        .map(|r| r.unwrap())
        .collect();
    assert_eq!(range_a, range_b);
}

#[test]
fn duplicate_key_run_survives_splits_in_insertion_order() {
    let dir = tempdir().unwrap();
    let mut index = TreeIndex::create(dir.path(), "idx", options(4)).unwrap();

    index
        .insert(b"a0", b"aa", 0, 0, RecordStatus::Live)
        .unwrap();
    for i in 0..12u32 {
        index
            .insert(format!("m{i:02}").as_bytes(), b"mm", i, 0, RecordStatus::Live)
            .unwrap();
    }
    index
        .insert(b"z0", b"zz", 0, 0, RecordStatus::Live)
        .unwrap();

    let docs: Vec<Vec<u8>> = index
        .get_many(b"mm", None, 0)
        .unwrap()
        .map(|r| trimmed(&r.unwrap().doc_id))
        .collect();
    let expected: Vec<Vec<u8>> = (0..12).map(|i| format!("m{i:02}").into_bytes()).collect();
    assert_eq!(docs, expected);

    // The same run read through the bounded range query, skipping the edges.
    let ranged: Vec<Vec<u8>> = index
        .get_between(Some(b"mm"), Some(b"mm"), None, 0, true, true)
        .unwrap()
        .map(|r| trimmed(&r.unwrap().doc_id))
        .collect();
    assert_eq!(ranged, expected);
}

#[test]
fn update_then_delete_lifecycle_across_reopen() {
    let dir = tempdir().unwrap();
    {
        let mut index = TreeIndex::create(dir.path(), "idx", options(4)).unwrap();
        let (start, size) = index.value_store().append(b"original").unwrap();
        index
            .insert(b"doc", b"key", start, size, RecordStatus::Live)
            .unwrap();
        let (start, size) = index.value_store().append(b"replacement").unwrap();
        index
            .update(b"doc", b"key", start, size, RecordStatus::Live)
            .unwrap();
        index.close().unwrap();
    }

    let mut index = TreeIndex::open(dir.path(), "idx").unwrap();
    let record = index.get(b"key").unwrap();
    let payload = index.value_store().read(record.start, record.size).unwrap();
    assert_eq!(payload, b"replacement");

    index.delete(b"doc", b"key").unwrap();
    assert!(matches!(index.get(b"key"), Err(IndexError::ElemNotFound)));
}

#[test]
fn node_capacity_below_three_is_rejected() {
    let dir = tempdir().unwrap();
    assert!(matches!(
        TreeIndex::create(dir.path(), "idx", options(2)),
        Err(IndexError::NodeCapacity(2))
    ));
}

#[test]
fn oversized_key_is_a_format_error() {
    let dir = tempdir().unwrap();
    let mut index = TreeIndex::create(dir.path(), "idx", options(4)).unwrap();

    assert!(matches!(
        index.insert(b"d", b"way-too-long-key", 0, 0, RecordStatus::Live),
        Err(IndexError::Format(_))
    ));
}

#[test]
fn corrupted_header_fails_open() {
    let dir = tempdir().unwrap();
    {
        let index = TreeIndex::create(dir.path(), "idx", options(4)).unwrap();
        index.close().unwrap();
    }
    let path = dir.path().join("idx_buck");
    let mut bytes = std::fs::read(&path).unwrap();
    bytes[12] = 0xee; // key_size field
    std::fs::write(&path, bytes).unwrap();

    assert!(matches!(
        TreeIndex::open(dir.path(), "idx"),
        Err(IndexError::Corrupted(_))
    ));
}
