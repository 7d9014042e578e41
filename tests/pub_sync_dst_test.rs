//! Pub Sync Deterministic Simulation Tests
//!
//! Seeded runs of ANNOUNCE / PUBLISH / db-sync against a fault-injecting
//! store. Every seed must finish with zero invariant violations.

use sos_telemetry::dst::{
    run_pub_sync_batch, summarize_pub_sync_batch, PubSyncDSTConfig, PubSyncDSTHarness,
};

// =============================================================================
// Standard Configuration Tests - 100+ Seeds
// =============================================================================

#[test]
fn test_pub_sync_dst_100_seeds_standard() {
    let results = run_pub_sync_batch(0, 100, 300, PubSyncDSTConfig::new);
    let summary = summarize_pub_sync_batch(&results);
    println!("{}", summary);

    let passed = results.iter().filter(|r| r.is_success()).count();
    assert_eq!(passed, 100, "All 100 seeds should pass with standard config");
}

#[test]
fn test_pub_sync_dst_100_seeds_high_chaos() {
    let results = run_pub_sync_batch(1000, 100, 300, PubSyncDSTConfig::high_chaos);
    let summary = summarize_pub_sync_batch(&results);
    println!("{}", summary);

    let passed = results.iter().filter(|r| r.is_success()).count();
    assert_eq!(passed, 100, "All 100 seeds should pass under store faults");
}

#[test]
fn test_pub_sync_dst_100_seeds_tiny_blocks() {
    let results = run_pub_sync_batch(2000, 100, 300, PubSyncDSTConfig::tiny_blocks);
    let summary = summarize_pub_sync_batch(&results);
    println!("{}", summary);

    let passed = results.iter().filter(|r| r.is_success()).count();
    assert_eq!(passed, 100, "All 100 seeds should pass with tiny GUID blocks");
}

// =============================================================================
// Stress Tests
// =============================================================================

#[test]
fn test_pub_sync_dst_stress_2000_ops() {
    let mut harness = PubSyncDSTHarness::with_seed(42);
    harness.run(2000);
    let result = harness.result();
    println!("{}", result.summary());
    assert!(result.is_success(), "{:?}", result.invariant_violations);
}

#[test]
fn test_pub_sync_dst_same_seed_same_store() {
    let run = |seed| {
        let mut harness = PubSyncDSTHarness::new(PubSyncDSTConfig::high_chaos(seed));
        harness.run(500);
        (harness.result().clone(), harness.store().value_rows())
    };
    let (first, first_rows) = run(7);
    let (second, second_rows) = run(7);
    assert_eq!(first.summary(), second.summary());
    assert_eq!(first_rows.len(), second_rows.len());
    for (a, b) in first_rows.iter().zip(&second_rows) {
        assert_eq!((a.pub_guid, a.guid, a.frame, &a.val), (b.pub_guid, b.guid, b.frame, &b.val));
    }
}
