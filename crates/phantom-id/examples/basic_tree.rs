//! Basic Tree — build an identity tree, delete a middle node, and snapshot it.
//!
//! Run with:
//!   cargo run --example basic_tree -p phantom-id

use std::sync::Arc;

use phantom_id::{
    Account, AdminQuota, IdentityTree, Role, SnapshotStore, Sha256Digest, TraversalOrder,
    TreeConfig,
};

fn main() -> phantom_id::Result<()> {
    // ── 1. Build a small hierarchy ──────────────────────────────────────────
    //
    // The first node becomes the root and takes an admin slot. Children are
    // members unless they ask for admin and the quota has room.
    let quota = Arc::new(AdminQuota::new(2));
    let tree = IdentityTree::new(TreeConfig::default(), Arc::clone(&quota));

    let root = tree.insert(&Account::generate(&Sha256Digest), None)?;
    let lead = tree.insert_with_role(
        &Account::generate(&Sha256Digest),
        Some(root.id()),
        Role::Admin,
    )?;
    let member = tree.insert(&Account::generate(&Sha256Digest), Some(root.id()))?;
    let grandchild = tree.insert(&Account::generate(&Sha256Digest), Some(lead.id()))?;

    println!("Tree with {} nodes, depth {}", tree.size(), tree.depth());
    print_tree(&tree);
    println!("Admin slots: {}/{}", quota.current(), quota.max());
    println!();

    // ── 2. Delete a middle node ─────────────────────────────────────────────
    //
    // The grandchild moves up to the root and inherits the admin flag.
    tree.delete(lead.id())?;
    let moved = tree
        .describe(grandchild.id())
        .ok_or_else(|| phantom_id::PhantomError::NotFound(grandchild.id().to_string()))?;
    println!("Deleted {}", lead.id().short());
    println!(
        "  {} now under {} as {}",
        moved.id.short(),
        moved.parent.as_ref().map_or("-", |p| p.short()),
        moved.roles.label()
    );
    print_tree(&tree);
    println!();

    // ── 3. Snapshot and reload ──────────────────────────────────────────────
    let dir = std::env::temp_dir().join("phantom-id-example");
    std::fs::create_dir_all(&dir)?;
    let store = SnapshotStore::new(dir.join("phantom.state"));
    let written = store.save(&tree)?;
    let info = store.inspect()?;
    println!(
        "Saved {written} nodes to {} ({} bytes, checksum {:#010x})",
        store.path().display(),
        info.file_len,
        info.checksum
    );

    let reloaded = store.load(TreeConfig::default(), Arc::new(AdminQuota::new(2)))?;
    println!(
        "Reloaded {} nodes; {} still present: {}",
        reloaded.size(),
        member.id().short(),
        reloaded.contains(member.id())
    );

    std::fs::remove_file(store.path())?;
    Ok(())
}

fn print_tree(tree: &IdentityTree) {
    tree.traverse(TraversalOrder::Dfs, |visit| {
        println!(
            "  {}{} ({})",
            "  ".repeat(visit.depth),
            visit.id().short(),
            visit.roles.label()
        );
    });
}
