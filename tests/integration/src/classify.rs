//! Error replies and transport failures as seen through the client.

use slotwatch_cluster::{parse_redirect, ErrorKind, NodeId, ResponseClassifier, Rule, TopologyError};

use crate::helpers::FakeCluster;

fn kind_of(err: TopologyError) -> ErrorKind {
    match err {
        TopologyError::Protocol(p) => p.kind,
        other => panic!("expected an error reply, got {other:?}"),
    }
}

#[test]
fn moved_reply_is_a_redirect() {
    let fake = FakeCluster::new("redis", 3, 1);
    fake.inject(&fake.target(0, 0), "MOVED 3999 10.0.0.2:6379\n");
    let err = fake.client().get_item("foo").unwrap_err();
    assert!(err.is_redirect());

    let TopologyError::Protocol(p) = err else {
        unreachable!()
    };
    let redirect = parse_redirect(&p.raw).unwrap();
    assert_eq!(redirect.slot, 3999);
    assert_eq!(redirect.addr, "10.0.0.2:6379");
}

#[test]
fn unknown_node_for_failure_reports() {
    let fake = FakeCluster::new("redis", 3, 1);
    let err = fake
        .client()
        .count_failure_reports(&NodeId::new("deadbeef"))
        .unwrap_err();
    assert_eq!(kind_of(err), ErrorKind::UnknownNode);
}

#[test]
fn slaves_of_a_slave() {
    let fake = FakeCluster::new("redis", 3, 1);
    let slave = NodeId::new(fake.id(0, 1));
    let err = fake.client().cluster_slaves(&slave).unwrap_err();
    assert_eq!(kind_of(err), ErrorKind::NotMaster);
}

#[test]
fn flush_on_a_replica_is_read_only() {
    let fake = FakeCluster::new("redis", 3, 1);
    let err = fake.client().flush_db(&fake.target(2, 1)).unwrap_err();
    assert_eq!(kind_of(err), ErrorKind::ReadOnlyReplica);
}

#[test]
fn unknown_subcommand_wins_over_wrong_argument_count() {
    let fake = FakeCluster::new("redis", 3, 1);
    fake.inject(
        &fake.target(0, 0),
        "ERR Unknown subcommand or wrong number of arguments for 'SLOTS'. Try CLUSTER HELP.\n",
    );
    let err = fake.client().cluster_slots().unwrap_err();
    assert_eq!(kind_of(err), ErrorKind::UnknownSubcommand);
}

#[test]
fn connection_reset_is_classified() {
    let fake = FakeCluster::new("redis", 3, 1);
    fake.inject(&fake.target(0, 0), "Error: Connection reset by peer\n");
    let err = fake.client().cluster_info().unwrap_err();
    assert_eq!(kind_of(err), ErrorKind::ConnectionReset);
}

#[test]
fn unreachable_member_is_a_transport_error() {
    let fake = FakeCluster::new("redis", 3, 1);
    fake.take_down(&fake.target(1, 1));
    let err = fake.client().shard_topology().unwrap_err();
    match err {
        TopologyError::Transport(t) => assert_eq!(t.target, "redis-shard1-1"),
        other => panic!("unexpected: {other:?}"),
    }
}

#[test]
fn payload_is_not_an_error() {
    let fake = FakeCluster::new("redis", 3, 1);
    let client = fake.client();
    client.set_item("msg", "MOVED elsewhere").unwrap();
    // not a well-formed redirect, so it is data
    assert_eq!(client.get_item("msg").unwrap(), "MOVED elsewhere");
}

#[test]
fn custom_rules_replace_the_table() {
    let fake = FakeCluster::new("redis", 3, 1);
    fake.inject(&fake.target(0, 0), "LOADING Redis is loading the dataset in memory\n");
    let client = fake
        .client()
        .with_classifier(ResponseClassifier::with_rules(vec![Rule::contains(
            "LOADING",
            ErrorKind::ConnectionReset,
        )]));
    let err = client.ping().unwrap_err();
    assert_eq!(kind_of(err), ErrorKind::ConnectionReset);

    // the default table is gone
    fake.inject(&fake.target(0, 0), "ERR unknown command 'PING'\n");
    assert_eq!(client.ping().unwrap(), "ERR unknown command 'PING'");
}
