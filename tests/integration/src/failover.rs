//! Failover scenarios: request, propagate, verify.

use slotwatch_cluster::{
    diff_topology, probe_slots, total_covered_slots, verify_failover, Convergence, ErrorKind,
    ExpectedShape, RoleKind, TopologyError, VerificationError, SLOT_COUNT,
};

use crate::helpers::FakeCluster;

#[test]
fn failover_every_shard() {
    let fake = FakeCluster::new("redis", 3, 1);
    let client = fake.client();

    for shard in 0..3 {
        let before = client.shard_topology().unwrap();
        assert_eq!(client.failover(&fake.target(shard, 1)).unwrap(), "OK");
        let after = client.shard_topology().unwrap();

        let outcome = verify_failover(&before, &after, shard).unwrap();
        assert_eq!(outcome.promoted.as_str(), fake.id(shard, 1));
        assert_eq!(
            outcome.demoted.as_ref().map(|id| id.as_str().to_string()),
            Some(fake.id(shard, 0))
        );

        let slots = client.cluster_slots().unwrap();
        assert_eq!(total_covered_slots(&slots), u32::from(SLOT_COUNT));
    }

    // masters now sit at replica index 1
    let topology = client.shard_topology().unwrap();
    for shard in 0..3 {
        assert_eq!(topology.master_of(shard).unwrap().id.as_str(), fake.id(shard, 1));
    }
}

#[test]
fn diff_shows_one_promotion_and_one_demotion() {
    let fake = FakeCluster::new("redis", 3, 2);
    let client = fake.client();
    let before = client.shard_topology().unwrap();
    client.failover(&fake.target(1, 2)).unwrap();
    let after = client.shard_topology().unwrap();

    let diff = diff_topology(&before, &after);
    assert_eq!(diff.role_changes.len(), 2);
    assert!(diff.added.is_empty() && diff.removed.is_empty());

    let promoted: Vec<_> = diff.promotions().collect();
    assert_eq!(promoted.len(), 1);
    assert_eq!(promoted[0].id.as_str(), fake.id(1, 2));
    assert_eq!(promoted[0].shard, 1);
    assert_eq!(promoted[0].to, RoleKind::Master);
    assert_eq!(diff.demotions().next().unwrap().id.as_str(), fake.id(1, 0));

    // the other slave now follows the new master
    let outcome = verify_failover(&before, &after, 1).unwrap();
    let other = after.node(1, 1).unwrap();
    assert_eq!(other.replica_of(), Some(&outcome.promoted));
}

#[test]
fn failover_sent_to_a_master_is_rejected() {
    let fake = FakeCluster::new("redis", 3, 1);
    let err = fake.client().failover(&fake.target(0, 0)).unwrap_err();
    match err {
        TopologyError::Protocol(p) => assert_eq!(p.kind, ErrorKind::FailoverNotReplica),
        other => panic!("unexpected: {other:?}"),
    }
}

#[test]
fn unchanged_cluster_is_not_a_failover() {
    let fake = FakeCluster::new("redis", 3, 1);
    let client = fake.client();
    let before = client.shard_topology().unwrap();
    let after = client.shard_topology().unwrap();
    assert!(matches!(
        verify_failover(&before, &after, 0),
        Err(VerificationError::InvalidFailover { shard: 0, .. })
    ));
}

#[test]
fn failover_of_the_wrong_shard_is_detected() {
    let fake = FakeCluster::new("redis", 3, 1);
    let client = fake.client();
    let before = client.shard_topology().unwrap();
    client.failover(&fake.target(2, 1)).unwrap();
    let after = client.shard_topology().unwrap();

    assert!(verify_failover(&before, &after, 0).is_err());
    assert!(verify_failover(&before, &after, 2).is_ok());
}

#[test]
fn slot_map_converges_after_propagation() {
    let fake = FakeCluster::new("redis", 3, 1).with_lag(2);
    let client = fake.client();
    let shape = ExpectedShape::new(3, 1);
    client.failover(&fake.target(0, 1)).unwrap();

    let mut attempts = 0;
    let converged = loop {
        attempts += 1;
        let slots = client.cluster_slots().unwrap();
        match probe_slots(&slots, &shape) {
            Convergence::Converged => break true,
            Convergence::Pending(VerificationError::Coverage { observed, .. }) => {
                assert_eq!(observed, u32::from(SLOT_COUNT) - 5461);
            }
            Convergence::Pending(other) => panic!("unexpected mismatch: {other}"),
        }
        if attempts == 5 {
            break false;
        }
    };
    assert!(converged);
    assert_eq!(attempts, 3);
}

#[test]
fn automatic_failover_passes_verification() {
    let fake = FakeCluster::new("redis", 3, 1);
    let client = fake.client();
    let before = client.shard_topology().unwrap();
    fake.kill_master(1);
    let after = client.shard_topology().unwrap();

    let outcome = verify_failover(&before, &after, 1).unwrap();
    assert_eq!(outcome.promoted.as_str(), fake.id(1, 1));
}

#[test]
fn flush_follows_the_promoted_master() {
    let fake = FakeCluster::new("redis", 2, 1);
    let client = fake.client();
    client.failover(&fake.target(0, 1)).unwrap();
    client.flush_masters().unwrap();

    let flushed: Vec<String> = fake
        .calls()
        .into_iter()
        .filter(|c| c.tokens() == ["FLUSHDB"])
        .map(|c| c.target)
        .collect();
    assert_eq!(flushed, ["redis-shard0-1", "redis-shard1-0"]);
}
