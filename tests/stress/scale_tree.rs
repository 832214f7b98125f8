//! Scale test: large and deep trees through traversal and snapshots.

use std::sync::Arc;
use std::time::Instant;

use phantom_id::storage::format::{HEADER_LEN, RECORD_LEN_V2};
use phantom_id::{
    Account, AdminQuota, IdentityTree, NodeId, SnapshotStore, Sha256Digest, TraversalOrder,
    TreeConfig,
};

/// Complete tree with fan-out `max_children`, built level by level.
fn build_wide(nodes: usize, config: TreeConfig) -> IdentityTree {
    let tree = IdentityTree::new(config, Arc::new(AdminQuota::default()));
    let root = tree
        .insert(&Account::generate(&Sha256Digest), None)
        .unwrap()
        .id()
        .clone();

    let mut frontier = vec![root];
    let mut count = 1;
    'outer: loop {
        let mut next = Vec::new();
        for parent in &frontier {
            for _ in 0..config.max_children {
                if count == nodes {
                    break 'outer;
                }
                let id = tree
                    .insert(&Account::generate(&Sha256Digest), Some(parent))
                    .unwrap()
                    .id()
                    .clone();
                next.push(id);
                count += 1;
            }
        }
        frontier = next;
    }
    tree
}

fn build_chain(len: usize) -> (IdentityTree, NodeId) {
    let tree = IdentityTree::new(TreeConfig::default(), Arc::new(AdminQuota::default()));
    let mut last = tree
        .insert(&Account::generate(&Sha256Digest), None)
        .unwrap()
        .id()
        .clone();
    for _ in 1..len {
        last = tree
            .insert(&Account::generate(&Sha256Digest), Some(&last))
            .unwrap()
            .id()
            .clone();
    }
    (tree, last)
}

#[test]
fn stress_wide_tree_5000_nodes() {
    let start = Instant::now();
    let tree = build_wide(5_000, TreeConfig::default());
    let elapsed = start.elapsed();

    assert_eq!(tree.size(), 5_000);
    // 1 + 10 + 100 + 1000 = 1111 < 5000 <= 11111
    assert_eq!(tree.depth(), 5);

    let mut bfs_depths = Vec::new();
    tree.traverse(TraversalOrder::Bfs, |v| bfs_depths.push(v.depth));
    assert_eq!(bfs_depths.len(), 5_000);
    assert!(bfs_depths.windows(2).all(|w| w[0] <= w[1]));

    eprintln!("built 5000-node tree in {elapsed:?}");
}

#[test]
fn stress_wide_tree_snapshot_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let store = SnapshotStore::new(dir.path().join("wide.state"));
    let config = TreeConfig {
        max_children: 50,
        ..TreeConfig::default()
    };
    let tree = build_wide(3_000, config);

    let start = Instant::now();
    assert_eq!(store.save(&tree).unwrap(), 3_000);
    let save_time = start.elapsed();

    // Several checksum chunks are exercised.
    let len = std::fs::metadata(store.path()).unwrap().len() as usize;
    assert_eq!(len, HEADER_LEN + 3_000 * RECORD_LEN_V2);
    assert!(len > 4096 * 100);

    let start = Instant::now();
    let loaded = store.load(config, Arc::new(AdminQuota::default())).unwrap();
    let load_time = start.elapsed();

    assert_eq!(loaded.size(), 3_000);
    assert_eq!(loaded.depth(), tree.depth());

    let mut expected = Vec::new();
    tree.traverse(TraversalOrder::Dfs, |v| {
        expected.push((v.id().clone(), v.parent.cloned()))
    });
    let mut actual = Vec::new();
    loaded.traverse(TraversalOrder::Dfs, |v| {
        actual.push((v.id().clone(), v.parent.cloned()))
    });
    assert_eq!(actual, expected);

    eprintln!("saved 3000 nodes in {save_time:?}, loaded in {load_time:?}");
}

#[test]
fn stress_deep_chain_10000() {
    let (tree, leaf) = build_chain(10_000);
    assert_eq!(tree.size(), 10_000);
    assert_eq!(tree.depth(), 10_000);
    assert_eq!(tree.ancestors(&leaf).unwrap().len(), 9_999);
    assert_eq!(tree.describe(&leaf).unwrap().depth, 9_999);

    // Traversal is iterative; deep chains must not overflow the stack.
    let mut deepest = 0;
    tree.traverse(TraversalOrder::Dfs, |v| deepest = deepest.max(v.depth));
    assert_eq!(deepest, 9_999);
}

#[test]
fn stress_deep_chain_snapshot_and_drop() {
    let dir = tempfile::tempdir().unwrap();
    let store = SnapshotStore::new(dir.path().join("chain.state"));
    let (tree, leaf) = build_chain(4_000);
    store.save(&tree).unwrap();
    drop(tree);

    let loaded = store
        .load(TreeConfig::default(), Arc::new(AdminQuota::default()))
        .unwrap();
    assert_eq!(loaded.depth(), 4_000);
    assert!(loaded.find(&leaf).is_some());
    drop(loaded);
}

#[test]
fn stress_delete_middle_of_chain_repeatedly() {
    let (tree, leaf) = build_chain(500);
    let root = tree.roots()[0].clone();

    // Removing the root's child each time shortens the chain by one.
    for remaining in (2..500).rev() {
        let child = tree.children(&root).unwrap()[0].clone();
        tree.delete(&child).unwrap();
        assert_eq!(tree.size(), remaining);
    }
    assert_eq!(tree.children(&root).unwrap(), vec![leaf]);
    assert_eq!(tree.depth(), 2);
}
