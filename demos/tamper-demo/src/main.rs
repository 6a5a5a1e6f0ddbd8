//! Tamper demo
//!
//! Shows:
//! 1. A service records audited calls
//! 2. A caller proves its event is in the log
//! 3. A rogue admin rewrites an event in place
//! 4. Inclusion checks and the chain audit catch it

use auditlog::{
    audit_chain, AuditError, AuditEvent, AuditLog, AuditLogConfig, EventStatus, FieldRedactor,
    Inclusion, InMemorySnapshotStore, SnapshotStore,
};
use chrono::Utc;
use serde_json::json;

fn main() -> Result<(), AuditError> {
    println!("╔════════════════════════════════════════════════╗");
    println!("║  Audit Log - Tamper Demo                       ║");
    println!("║  Chained Merkle Trees over Every Call          ║");
    println!("╚════════════════════════════════════════════════╝\n");

    // 1. Record a handful of calls; small trees so rollover shows up
    println!("📝 Step 1: Service records audited calls");
    println!("   ─────────────────────────────────────");

    let store = InMemorySnapshotStore::new();
    let mut log = AuditLog::open(store.clone(), AuditLogConfig { max_leaves_per_tree: 2 })?;
    let redactor = FieldRedactor::new(["password"]);

    let mut payloads = Vec::new();
    for (i, caller) in ["alice", "bob", "carol", "dave", "erin", "frank", "grace", "heidi", "ivan", "judy"]
        .iter()
        .enumerate()
    {
        let event = AuditEvent::new(
            *caller,
            "transfer",
            json!({ "amount": 100 * (i + 1), "password": "hunter2" }),
            EventStatus::Success,
            Utc::now(),
            12,
            &redactor,
        );
        let payload = event.to_payload()?;
        let receipt = log.record(&payload)?;
        if let Some(sealed) = &receipt.sealed {
            println!("   ⛓  Tree {} sealed at {}", sealed.tree_index, short(&sealed.root_hash));
        }
        payloads.push(payload);
    }

    let checkpoint = log.checkpoint();
    println!("   Events: {}", payloads.len());
    println!("   Current tree: {}", checkpoint.tree_index);
    println!("   Root: {}", short(&checkpoint.root_hash));
    println!("   ✓ Passwords stored as [REDACTED]\n");

    // 2. Caller proves its event is present
    println!("🔍 Step 2: Caller checks its event is in the log");
    println!("   ─────────────────────────────────────────────");

    let mine = payloads.last().cloned().unwrap_or_default();
    match log.verify_detailed(&mine) {
        Inclusion::Verified { leaf_index, path_len } => {
            println!("   ✓ Found in leaf {leaf_index}, {path_len} hashes up to the root");
        }
        other => println!("   ✗ Unexpected: {other:?}"),
    }
    println!();

    // 3. Rogue admin rewrites the event
    println!("😈 Step 3: Rogue admin rewrites an event");
    println!("   ──────────────────────────────────────");

    let forged = mine.replace("\"amount\":1000", "\"amount\":1");
    log.tamper_block_for_test(&mine, &forged);
    println!("   Original amount: 1000");
    println!("   Forged amount:   1");
    println!("   ⚠️  Block edited in place, hashes left alone\n");

    // 4. Inclusion check on the forged payload fails
    println!("✓ Step 4: Verify the forged event");
    println!("   ───────────────────────────────");

    match log.verify_detailed(&forged) {
        Inclusion::Mismatch { level } => {
            println!("   ✗ TAMPERING DETECTED at level {level}");
            println!("   ✗ Recomputed hash does not match the stored one");
        }
        other => println!("   ? {other:?}"),
    }
    println!();

    // 5. Rewrite a sealed tree and audit the chain
    println!("🔐 Step 5: Audit the persisted chain");
    println!("   ─────────────────────────────────");

    let mut snapshots = store
        .load_all_snapshots()
        .map_err(|source| AuditError::Persistence {
            recorded: true,
            receipt: None,
            source,
        })?;
    let report = audit_chain(&snapshots);
    println!("   Trees checked: {}, intact: {}", report.trees_checked, report.is_intact());

    if let Some(genesis) = snapshots.iter_mut().find(|s| s.tree_index == 0) {
        if let Some(block) = genesis.leaf_data_blocks.get_mut(0).and_then(|l| l.get_mut(0)) {
            *block = block.replace("alice", "mallory");
        }
    }
    let report = audit_chain(&snapshots);
    for fault in &report.faults {
        println!("   ✗ tree {}: {:?}", fault.tree_index, fault.kind);
    }
    println!();

    println!("╔════════════════════════════════════════════════╗");
    println!("║  Summary                                       ║");
    println!("╠════════════════════════════════════════════════╣");
    println!("║  ✓ Every call lands in a Merkle leaf           ║");
    println!("║  ✓ In-place edits break the hash path          ║");
    println!("║  ✓ Sealed roots chain trees together           ║");
    println!("╚════════════════════════════════════════════════╝");

    Ok(())
}

fn short(hash: &str) -> &str {
    &hash[..hash.len().min(16)]
}
