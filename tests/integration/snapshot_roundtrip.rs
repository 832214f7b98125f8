//! Integration test: snapshot save/load contract.
//!
//! - load(save(T)) keeps the {id, parent} edge set and role flags
//! - every single-byte corruption of the record region is rejected
//! - version 1 files still load

use std::sync::Arc;

use phantom_id::storage::format::{self, Header, HEADER_LEN, RECORD_LEN_V2};
use phantom_id::{
    Account, AdminQuota, IdentityTree, NodeId, NodeRoles, PhantomError, Role, Sha256Digest,
    SnapshotStore, TraversalOrder, TreeConfig,
};

fn quota() -> Arc<AdminQuota> {
    Arc::new(AdminQuota::default())
}

fn add(tree: &IdentityTree, parent: Option<&NodeId>) -> NodeId {
    tree.insert(&Account::generate(&Sha256Digest), parent)
        .unwrap()
        .id()
        .clone()
}

fn snapshot_of(tree: &IdentityTree) -> Vec<(NodeId, Option<NodeId>, NodeRoles)> {
    let mut out = Vec::new();
    tree.traverse(TraversalOrder::Dfs, |v| {
        out.push((v.id().clone(), v.parent.cloned(), v.roles));
    });
    out
}

/// Three levels with a fan-out of three.
fn layered_tree() -> IdentityTree {
    let tree = IdentityTree::new(TreeConfig::default(), quota());
    let root = add(&tree, None);
    for _ in 0..3 {
        let mid = add(&tree, Some(&root));
        for _ in 0..3 {
            add(&tree, Some(&mid));
        }
    }
    tree
}

#[test]
fn roundtrip_preserves_edges_and_roles() {
    let dir = tempfile::tempdir().unwrap();
    let store = SnapshotStore::new(dir.path().join("phantom.state"));
    let tree = layered_tree();
    let first_mid = tree.children(&tree.roots()[0]).unwrap()[0].clone();
    tree.set_active(&first_mid, false).unwrap();

    assert_eq!(store.save(&tree).unwrap(), 13);
    let loaded = store.load(TreeConfig::default(), quota()).unwrap();

    assert_eq!(snapshot_of(&loaded), snapshot_of(&tree));
    assert_eq!(loaded.size(), tree.size());
    assert_eq!(loaded.depth(), 3);
    assert!(!loaded.find(&first_mid).unwrap().roles().is_active);
}

#[test]
fn roundtrip_twice_is_stable() {
    let dir = tempfile::tempdir().unwrap();
    let first = SnapshotStore::new(dir.path().join("one.state"));
    let second = SnapshotStore::new(dir.path().join("two.state"));

    let tree = layered_tree();
    first.save(&tree).unwrap();
    let loaded = first.load(TreeConfig::default(), quota()).unwrap();
    second.save(&loaded).unwrap();

    let a = std::fs::read(first.path()).unwrap();
    let b = std::fs::read(second.path()).unwrap();
    // Only the timestamp may differ.
    assert_eq!(a[HEADER_LEN..], b[HEADER_LEN..]);
    assert_eq!(
        Header::decode(&a).unwrap().checksum,
        Header::decode(&b).unwrap().checksum
    );
}

#[test]
fn every_corrupted_record_byte_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let store = SnapshotStore::new(dir.path().join("phantom.state"));

    let tree = IdentityTree::new(TreeConfig::default(), quota());
    let root = add(&tree, None);
    add(&tree, Some(&root));
    store.save(&tree).unwrap();
    let pristine = std::fs::read(store.path()).unwrap();
    assert_eq!(pristine.len(), HEADER_LEN + 2 * RECORD_LEN_V2);

    for offset in HEADER_LEN..pristine.len() {
        let mut bytes = pristine.clone();
        bytes[offset] ^= 0x5a;
        std::fs::write(store.path(), &bytes).unwrap();
        match store.load(TreeConfig::default(), quota()) {
            Err(PhantomError::CorruptState(_)) => {}
            other => panic!("offset {offset}: expected CorruptState, got {other:?}"),
        }
    }
}

#[test]
fn admin_flags_survive_and_respect_quota() {
    let dir = tempfile::tempdir().unwrap();
    let store = SnapshotStore::new(dir.path().join("phantom.state"));

    let tree = IdentityTree::new(TreeConfig::default(), quota());
    let root = add(&tree, None);
    for _ in 0..3 {
        tree.insert_with_role(&Account::generate(&Sha256Digest), Some(&root), Role::Admin)
            .unwrap();
    }
    store.save(&tree).unwrap();

    // Reloading into a smaller quota keeps the first two admins in file order.
    let small = Arc::new(AdminQuota::new(2));
    let loaded = store
        .load(TreeConfig::default(), Arc::clone(&small))
        .unwrap();
    assert_eq!(loaded.size(), 4);
    assert_eq!(loaded.admin_count(), 2);
    assert_eq!(small.current(), 2);
    assert!(loaded.find(&root).unwrap().roles().is_admin);
}

#[test]
fn version_one_file_loads_with_admin_from_root() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("legacy.state");

    let tree = IdentityTree::new(TreeConfig::default(), quota());
    let root = add(&tree, None);
    let child = tree
        .insert_with_role(&Account::generate(&Sha256Digest), Some(&root), Role::Admin)
        .unwrap()
        .id()
        .clone();

    // Hand-build a v1 file: same records without the trailing admin byte.
    let mut body = Vec::new();
    tree.traverse(TraversalOrder::Dfs, |v| {
        let record = format::Record {
            id: v.id().clone(),
            parent_id: v.parent.cloned(),
            creation_time: v.node.creation_time(),
            roles: v.roles,
            child_count: v.child_count as u64,
        };
        let mut encoded = Vec::new();
        record.encode_into(&mut encoded);
        body.extend_from_slice(&encoded[..format::RECORD_LEN_V1]);
    });
    let mut header = Header::new(1_700_000_000, 2);
    header.version = 1;
    header.checksum = format::checksum(&body);
    let mut file = header.encode().to_vec();
    file.extend_from_slice(&body);
    std::fs::write(&path, file).unwrap();

    let store = SnapshotStore::new(&path);
    assert_eq!(store.inspect().unwrap().version, 1);
    let loaded = store.load(TreeConfig::default(), quota()).unwrap();
    assert!(loaded.find(&root).unwrap().roles().is_admin);
    assert!(!loaded.find(&child).unwrap().roles().is_admin);
}

#[test]
fn future_version_is_incompatible() {
    let dir = tempfile::tempdir().unwrap();
    let store = SnapshotStore::new(dir.path().join("phantom.state"));
    store.save(&layered_tree()).unwrap();

    let mut bytes = std::fs::read(store.path()).unwrap();
    bytes[4..8].copy_from_slice(&(format::FORMAT_VERSION + 1).to_le_bytes());
    std::fs::write(store.path(), bytes).unwrap();

    assert!(matches!(
        store.load(TreeConfig::default(), quota()),
        Err(PhantomError::IncompatibleFormat(_))
    ));
}
