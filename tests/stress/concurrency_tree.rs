//! Concurrency test: parallel mutation and lookup on one shared tree.
//!
//! Validates that counters, the admin quota, and the structure stay
//! consistent when many threads insert, delete, and read at once.

use std::sync::{Arc, Mutex};
use std::thread;

use phantom_id::{
    Account, AdminQuota, IdentityTree, NodeId, Role, Sha256Digest, TraversalOrder, TreeConfig,
};

fn wide_config() -> TreeConfig {
    TreeConfig {
        max_children: 1_000,
        ..TreeConfig::default()
    }
}

fn count_visited(tree: &IdentityTree) -> u64 {
    let mut visited = 0u64;
    tree.traverse(TraversalOrder::Bfs, |_| visited += 1);
    visited
}

#[test]
fn stress_parallel_inserts_under_root() {
    let tree = Arc::new(IdentityTree::new(wide_config(), Arc::new(AdminQuota::default())));
    let root = tree
        .insert(&Account::generate(&Sha256Digest), None)
        .unwrap()
        .id()
        .clone();

    let mut handles = Vec::new();
    for _ in 0..16 {
        let tree = Arc::clone(&tree);
        let root = root.clone();
        handles.push(thread::spawn(move || {
            for _ in 0..50 {
                tree.insert(&Account::generate(&Sha256Digest), Some(&root))
                    .expect("insert should succeed");
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(tree.size(), 801);
    assert_eq!(count_visited(&tree), 801);
    assert_eq!(tree.children(&root).unwrap().len(), 800);
    assert_eq!(tree.depth(), 2);
}

#[test]
fn stress_capacity_is_never_exceeded() {
    let config = TreeConfig {
        max_children: 25,
        ..TreeConfig::default()
    };
    let tree = Arc::new(IdentityTree::new(config, Arc::new(AdminQuota::default())));
    let root = tree
        .insert(&Account::generate(&Sha256Digest), None)
        .unwrap()
        .id()
        .clone();

    let accepted = Arc::new(Mutex::new(0usize));
    let mut handles = Vec::new();
    for _ in 0..8 {
        let tree = Arc::clone(&tree);
        let root = root.clone();
        let accepted = Arc::clone(&accepted);
        handles.push(thread::spawn(move || {
            for _ in 0..10 {
                if tree
                    .insert(&Account::generate(&Sha256Digest), Some(&root))
                    .is_ok()
                {
                    *accepted.lock().unwrap() += 1;
                }
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(*accepted.lock().unwrap(), 25);
    assert_eq!(tree.children(&root).unwrap().len(), 25);
    assert_eq!(tree.size(), 26);
}

#[test]
fn stress_admin_quota_under_contention() {
    let quota = Arc::new(AdminQuota::new(7));
    let tree = Arc::new(IdentityTree::new(wide_config(), Arc::clone(&quota)));
    let root = tree
        .insert(&Account::generate(&Sha256Digest), None)
        .unwrap()
        .id()
        .clone();

    let mut handles = Vec::new();
    for _ in 0..12 {
        let tree = Arc::clone(&tree);
        let root = root.clone();
        handles.push(thread::spawn(move || {
            (0..20)
                .filter(|_| {
                    tree.insert_with_role(
                        &Account::generate(&Sha256Digest),
                        Some(&root),
                        Role::Admin,
                    )
                    .unwrap()
                    .roles()
                    .is_admin
                })
                .count()
        }));
    }
    let granted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

    // The root took one slot before the threads started.
    assert_eq!(granted, 6);
    assert_eq!(quota.current(), 7);
    assert_eq!(tree.admin_count(), 7);

    let mut flagged = 0;
    tree.traverse(TraversalOrder::Dfs, |v| {
        if v.roles.is_admin {
            flagged += 1;
        }
    });
    assert_eq!(flagged, 7);
}

#[test]
fn stress_shared_quota_across_trees() {
    let quota = Arc::new(AdminQuota::new(4));
    let trees: Vec<_> = (0..4)
        .map(|_| Arc::new(IdentityTree::new(wide_config(), Arc::clone(&quota))))
        .collect();

    let handles: Vec<_> = trees
        .iter()
        .map(|tree| {
            let tree = Arc::clone(tree);
            thread::spawn(move || {
                let root = tree
                    .insert(&Account::generate(&Sha256Digest), None)
                    .unwrap()
                    .id()
                    .clone();
                for _ in 0..5 {
                    tree.insert_with_role(
                        &Account::generate(&Sha256Digest),
                        Some(&root),
                        Role::Admin,
                    )
                    .unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let total: usize = trees.iter().map(|t| t.admin_count()).sum();
    assert_eq!(total, 4);
    assert_eq!(quota.current(), 4);

    drop(trees);
    assert_eq!(quota.current(), 0);
}

#[test]
fn stress_mixed_readers_and_writers() {
    let tree = Arc::new(IdentityTree::new(wide_config(), Arc::new(AdminQuota::default())));
    let root = tree
        .insert(&Account::generate(&Sha256Digest), None)
        .unwrap()
        .id()
        .clone();

    // Writers add a child and delete it again; readers walk the tree.
    let mut handles = Vec::new();
    for _ in 0..6 {
        let tree = Arc::clone(&tree);
        let root = root.clone();
        handles.push(thread::spawn(move || {
            for _ in 0..40 {
                let id: NodeId = tree
                    .insert(&Account::generate(&Sha256Digest), Some(&root))
                    .unwrap()
                    .id()
                    .clone();
                assert!(tree.find(&id).is_some());
                tree.delete(&id).unwrap();
                assert!(tree.find(&id).is_none());
            }
        }));
    }
    for _ in 0..4 {
        let tree = Arc::clone(&tree);
        let root = root.clone();
        handles.push(thread::spawn(move || {
            for _ in 0..40 {
                let locked = tree.lock();
                let mut visited = 0u64;
                locked.traverse(TraversalOrder::Dfs, |_| visited += 1);
                assert_eq!(visited, locked.size());
                drop(locked);
                assert!(tree.find(&root).is_some());
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(tree.size(), 1);
    assert!(tree.children(&root).unwrap().is_empty());
    assert!(tree.revision() >= 1 + 6 * 40 * 2);
}
