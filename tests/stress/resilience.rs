//! Resilience test: damaged, foreign, and unsupported snapshot files.
//!
//! Every rejected load must leave no partial tree behind and must hand
//! back any admin slots it took.

use std::path::Path;
use std::sync::Arc;

use phantom_id::storage::format::{
    self, Header, FLAG_COMPRESSED, FLAG_ENCRYPTED, HEADER_LEN, MAGIC,
};
use phantom_id::{
    Account, AdminQuota, DaemonConfig, IdentityTree, PhantomError, Registry, Role, Sha256Digest,
    SnapshotStore, TreeConfig,
};

fn saved_tree(path: &Path) -> usize {
    let tree = IdentityTree::new(TreeConfig::default(), Arc::new(AdminQuota::default()));
    let root = tree
        .insert(&Account::generate(&Sha256Digest), None)
        .unwrap()
        .id()
        .clone();
    for _ in 0..4 {
        tree.insert_with_role(&Account::generate(&Sha256Digest), Some(&root), Role::Admin)
            .unwrap();
    }
    SnapshotStore::new(path).save(&tree).unwrap() as usize
}

fn load(path: &Path, quota: &Arc<AdminQuota>) -> phantom_id::Result<IdentityTree> {
    SnapshotStore::new(path).load(TreeConfig::default(), Arc::clone(quota))
}

fn rewrite(path: &Path, edit: impl FnOnce(&mut Vec<u8>)) {
    let mut bytes = std::fs::read(path).unwrap();
    edit(&mut bytes);
    std::fs::write(path, bytes).unwrap();
}

#[test]
fn resilience_empty_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty.state");
    std::fs::write(&path, b"").unwrap();

    let quota = Arc::new(AdminQuota::default());
    assert!(matches!(load(&path, &quota), Err(PhantomError::CorruptState(_))));
}

#[test]
fn resilience_foreign_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("foreign.state");
    std::fs::write(&path, [0x7fu8; 512]).unwrap();

    let quota = Arc::new(AdminQuota::default());
    assert!(matches!(
        load(&path, &quota),
        Err(PhantomError::IncompatibleFormat(_))
    ));
}

#[test]
fn resilience_truncated_at_every_record_boundary() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("phantom.state");
    let count = saved_tree(&path);
    let pristine = std::fs::read(&path).unwrap();
    let record_len = (pristine.len() - HEADER_LEN) / count;

    for keep in 0..count {
        std::fs::write(&path, &pristine[..HEADER_LEN + keep * record_len]).unwrap();
        let quota = Arc::new(AdminQuota::default());
        match load(&path, &quota) {
            Err(PhantomError::CorruptState(msg)) => assert!(msg.contains("truncated"), "{msg}"),
            other => panic!("keep {keep}: expected CorruptState, got {other:?}"),
        }
        assert_eq!(quota.current(), 0);
    }
}

#[test]
fn resilience_trailing_garbage() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("phantom.state");
    saved_tree(&path);
    rewrite(&path, |b| b.extend_from_slice(b"junk"));

    let quota = Arc::new(AdminQuota::default());
    assert!(matches!(load(&path, &quota), Err(PhantomError::CorruptState(_))));
}

#[test]
fn resilience_flag_bits_are_incompatible() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("phantom.state");
    saved_tree(&path);
    let pristine = std::fs::read(&path).unwrap();

    for flag in [FLAG_COMPRESSED, FLAG_ENCRYPTED] {
        let mut bytes = pristine.clone();
        bytes[8..12].copy_from_slice(&flag.to_le_bytes());
        std::fs::write(&path, bytes).unwrap();

        let quota = Arc::new(AdminQuota::default());
        assert!(matches!(
            load(&path, &quota),
            Err(PhantomError::IncompatibleFormat(_))
        ));
    }
}

#[test]
fn resilience_node_count_overflow() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("phantom.state");
    saved_tree(&path);
    rewrite(&path, |b| b[20..28].copy_from_slice(&u64::MAX.to_le_bytes()));

    let quota = Arc::new(AdminQuota::default());
    assert!(matches!(load(&path, &quota), Err(PhantomError::CorruptState(_))));
}

#[test]
fn resilience_bad_structure_with_valid_checksum() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("phantom.state");
    let count = saved_tree(&path);

    // Swap the first two records so a child precedes its parent, then
    // recompute the checksum so only the structure is wrong.
    rewrite(&path, |b| {
        let record_len = (b.len() - HEADER_LEN) / count;
        let (head, rest) = b[HEADER_LEN..].split_at_mut(record_len);
        head.swap_with_slice(&mut rest[..record_len]);
        let sum = format::checksum(&b[HEADER_LEN..]);
        format::patch_checksum(b, sum);
    });

    let quota = Arc::new(AdminQuota::default());
    let result = load(&path, &quota);
    assert!(matches!(result, Err(PhantomError::CorruptState(_))), "{result:?}");
    assert_eq!(quota.current(), 0);
}

#[test]
fn resilience_failed_load_releases_partial_admins() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("phantom.state");
    let count = saved_tree(&path);

    // Duplicate the second record over the third: the first two records
    // load (both admins) before the duplicate is rejected.
    rewrite(&path, |b| {
        let record_len = (b.len() - HEADER_LEN) / count;
        let second = b[HEADER_LEN + record_len..HEADER_LEN + 2 * record_len].to_vec();
        b[HEADER_LEN + 2 * record_len..HEADER_LEN + 3 * record_len].copy_from_slice(&second);
        let sum = format::checksum(&b[HEADER_LEN..]);
        format::patch_checksum(b, sum);
    });

    let quota = Arc::new(AdminQuota::default());
    assert!(load(&path, &quota).is_err());
    assert_eq!(quota.current(), 0);
}

#[test]
fn resilience_header_survives_inspection_of_bad_body() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("phantom.state");
    saved_tree(&path);
    rewrite(&path, |b| {
        let last = b.len() - 1;
        b[last] ^= 0xff;
    });

    let info = SnapshotStore::new(&path).inspect().unwrap();
    assert_eq!(info.node_count, 5);
    assert!(!info.checksum_valid);

    let header = Header::decode(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(header.magic, MAGIC);
}

#[test]
fn resilience_registry_refuses_corrupt_state() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = DaemonConfig::default();
    config.state.path = dir.path().join("phantom.state");
    saved_tree(&config.state.path);
    rewrite(&config.state.path, |b| b[HEADER_LEN] ^= 1);

    let result = Registry::open(config.clone());
    assert!(matches!(result, Err(PhantomError::CorruptState(_))));

    // The damaged file is left in place for inspection.
    assert!(config.state.path.exists());
}

#[test]
fn resilience_save_leaves_no_temp_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("phantom.state");
    saved_tree(&path);
    saved_tree(&path);

    let names: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    assert_eq!(names, vec!["phantom.state".to_string()]);
}
