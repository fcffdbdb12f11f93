//! The consensus path across a real cluster: per-key total order,
//! partition behavior, and catch-up of replicas that missed commits.

use alder_core::{AlderError, Key, Mutation, OperationDescriptor, Slot, Value};
use alder_runtime::Completion;
use alder_testkit::{init_tracing, TestCluster};
use std::time::Duration;

const CONVERGE_WITHIN: Duration = Duration::from_secs(2);

#[tokio::test]
async fn same_key_writes_hold_distinct_agreed_positions() {
    init_tracing();
    let cluster = TestCluster::start(3).await.expect("cluster");
    let key = cluster.key_coordinated_by(0);

    // four writes from three different submitters, all in flight at once
    let mut handles = Vec::new();
    for (index, value) in [(0usize, "a"), (1, "b"), (2, "c"), (1, "d")] {
        let receipt = cluster
            .node(index)
            .replica
            .submit(OperationDescriptor::new(
                cluster.member(index),
                key.clone(),
                Mutation::Write { value: value.into() },
            ))
            .await
            .expect("submit");
        handles.push(receipt.handle);
    }
    for handle in &mut handles {
        assert!(matches!(
            handle.wait().await.expect("completion"),
            Completion::Committed { .. }
        ));
    }

    // every write owns one position; the order is the coordinator's, the
    // same at each replica
    cluster.await_committed_seq(&key, 4, CONVERGE_WITHIN).await.expect("all positions");
    let slot = cluster.await_convergence(&key, CONVERGE_WITHIN).await.expect("convergence");
    assert!(matches!(slot, Slot::Register(Some(_))));
    for node in cluster.nodes() {
        assert_eq!(node.replica.store().committed_seq(&key), 4);
    }
    cluster.shutdown().await;
}

#[tokio::test]
async fn a_minority_partition_refuses_to_propose() {
    init_tracing();
    let cluster = TestCluster::start(3).await.expect("cluster");
    let key = cluster.key_coordinated_by(0);

    // the coordinator ends up alone; 1 < quorum of 2
    cluster.mesh().partition(&[
        &[cluster.member(0)],
        &[cluster.member(1), cluster.member(2)],
    ]);

    let mut receipt = cluster
        .node(0)
        .replica
        .submit(OperationDescriptor::new(
            cluster.member(0),
            key.clone(),
            Mutation::Write { value: "x".into() },
        ))
        .await
        .expect("submit");

    match receipt.handle.wait().await.expect("completion") {
        Completion::Failed {
            error: AlderError::PartitionBlocked { reachable, quorum },
        } => {
            assert_eq!(reachable, 1);
            assert_eq!(quorum, 2);
        }
        other => panic!("expected partition refusal, got {other:?}"),
    }
    // nothing was committed anywhere
    for node in cluster.nodes() {
        assert_eq!(node.replica.store().committed_seq(&key), 0);
    }
    cluster.shutdown().await;
}

#[tokio::test]
async fn a_partitioned_replica_catches_up_after_healing() {
    init_tracing();
    let cluster = TestCluster::start(3).await.expect("cluster");
    let key = cluster.key_coordinated_by(0);

    // node 2 misses the round; the majority side still has its quorum
    cluster.mesh().partition(&[
        &[cluster.member(0), cluster.member(1)],
        &[cluster.member(2)],
    ]);

    let mut receipt = cluster
        .node(0)
        .replica
        .submit(OperationDescriptor::new(
            cluster.member(0),
            key.clone(),
            Mutation::Write { value: "agreed".into() },
        ))
        .await
        .expect("submit");
    assert!(matches!(
        receipt.handle.wait().await.expect("completion"),
        Completion::Committed { .. }
    ));
    assert_eq!(cluster.node(2).replica.store().committed_seq(&key), 0, "missed the commit");

    // committed decisions travel the same anti-entropy channel as
    // coordination-free operations
    cluster.mesh().heal();
    cluster.await_committed_seq(&key, 1, CONVERGE_WITHIN).await.expect("caught up");
    let slot = cluster.await_convergence(&key, CONVERGE_WITHIN).await.expect("convergence");
    assert_eq!(slot, Slot::Register(Some(Value::from("agreed"))));
    cluster.shutdown().await;
}

#[tokio::test]
async fn forwarded_submissions_commit_at_the_keys_coordinator() {
    init_tracing();
    let cluster = TestCluster::start(3).await.expect("cluster");
    let key = cluster.key_coordinated_by(2);

    // submitted at node 0, coordinated at node 2
    let mut receipt = cluster
        .node(0)
        .replica
        .submit(OperationDescriptor::new(
            cluster.member(0),
            key.clone(),
            Mutation::Write { value: "remote".into() },
        ))
        .await
        .expect("submit");
    assert!(matches!(
        receipt.handle.wait().await.expect("completion"),
        Completion::Committed { .. }
    ));

    cluster.await_committed_seq(&key, 1, CONVERGE_WITHIN).await.expect("committed");
    let slot = cluster.await_convergence(&key, CONVERGE_WITHIN).await.expect("convergence");
    assert_eq!(slot, Slot::Register(Some(Value::from("remote"))));

    // the origin's own telemetry reports the commit
    let report = cluster.node(0).telemetry.for_operation(receipt.operation).expect("report");
    assert!(report.rounds >= 1);
    cluster.shutdown().await;
}
