//! Convergence of the coordination-free path across a real cluster:
//! concurrent counter increments, conflicting register writes, and repair
//! after loss and duplication.

use alder_core::{ExecutionPath, Key, Mutation, OperationDescriptor, ReportOutcome, Slot, Value};
use alder_runtime::Completion;
use alder_testkit::{init_tracing, TestCluster};
use std::time::Duration;

const CONVERGE_WITHIN: Duration = Duration::from_secs(2);

#[tokio::test]
async fn three_concurrent_increments_converge_to_three() {
    init_tracing();
    let cluster = TestCluster::start(3).await.expect("cluster");
    let key = Key::from("hits");

    // one increment per replica, all in flight at once
    let mut handles = Vec::new();
    for index in 0..3 {
        let receipt = cluster
            .node(index)
            .replica
            .submit(OperationDescriptor::new(
                cluster.member(index),
                key.clone(),
                Mutation::Increment { delta: 1 },
            ))
            .await
            .expect("submit");
        assert_eq!(receipt.route.path, ExecutionPath::CoordinationFree);
        assert_eq!(receipt.route.expected_rounds, 0);
        handles.push((index, receipt.operation, receipt.handle));
    }
    for (_, _, handle) in &mut handles {
        handle.wait().await.expect("completion");
    }

    let slot = cluster.await_convergence(&key, CONVERGE_WITHIN).await.expect("convergence");
    match slot {
        Slot::Counter(counter) => assert_eq!(counter.value(), 3),
        other => panic!("expected counter, got {other:?}"),
    }

    // every report shows the free path and zero rounds
    for (index, operation, _) in &handles {
        let report = cluster
            .node(*index)
            .telemetry
            .for_operation(*operation)
            .expect("report");
        assert_eq!(report.path, ExecutionPath::CoordinationFree);
        assert_eq!(report.rounds, 0);
        assert_eq!(report.outcome, ReportOutcome::Committed);
    }
    cluster.shutdown().await;
}

#[tokio::test]
async fn conflicting_register_writes_settle_identically_everywhere() {
    init_tracing();
    let cluster = TestCluster::start(3).await.expect("cluster");
    let key = Key::from("winner");

    let first = cluster.node(0).replica.submit(OperationDescriptor::new(
        cluster.member(0),
        key.clone(),
        Mutation::Write { value: "X".into() },
    ));
    let second = cluster.node(1).replica.submit(OperationDescriptor::new(
        cluster.member(1),
        key.clone(),
        Mutation::Write { value: "Y".into() },
    ));
    let (first, second) = tokio::join!(first, second);
    let mut first = first.expect("submit");
    let mut second = second.expect("submit");

    assert_eq!(first.route.path, ExecutionPath::Consensus);
    assert_eq!(second.route.path, ExecutionPath::Consensus);
    assert!(matches!(
        first.handle.wait().await.expect("completion"),
        Completion::Committed { .. }
    ));
    assert!(matches!(
        second.handle.wait().await.expect("completion"),
        Completion::Committed { .. }
    ));

    // both writes hold agreed positions; the later one is the value
    // everywhere
    cluster.await_committed_seq(&key, 2, CONVERGE_WITHIN).await.expect("both committed");
    let slot = cluster.await_convergence(&key, CONVERGE_WITHIN).await.expect("convergence");
    match slot {
        Slot::Register(Some(value)) => {
            assert!(value == Value::from("X") || value == Value::from("Y"));
        }
        other => panic!("expected written register, got {other:?}"),
    }
    cluster.shutdown().await;
}

#[tokio::test]
async fn concurrent_lww_writes_pick_one_winner_by_tag() {
    init_tracing();
    let cluster = TestCluster::start(3).await.expect("cluster");
    let key = Key::from("status");

    let mut handles = Vec::new();
    for (index, value) in [(0, "X"), (1, "Y")] {
        let receipt = cluster
            .node(index)
            .replica
            .submit(OperationDescriptor::new(
                cluster.member(index),
                key.clone(),
                Mutation::WriteLww {
                    value: value.into(),
                    tag: alder_core::LwwTag::new(0, cluster.member(index)),
                },
            ))
            .await
            .expect("submit");
        assert_eq!(receipt.route.path, ExecutionPath::CoordinationFree);
        handles.push(receipt.handle);
    }
    for handle in &mut handles {
        handle.wait().await.expect("completion");
    }

    let slot = cluster.await_convergence(&key, CONVERGE_WITHIN).await.expect("convergence");
    match slot {
        Slot::LastWrite(register) => {
            let value = register.value().expect("written");
            assert!(*value == Value::from("X") || *value == Value::from("Y"));
        }
        other => panic!("expected LWW register, got {other:?}"),
    }
    cluster.shutdown().await;
}

#[tokio::test]
async fn anti_entropy_repairs_a_lossy_dissemination() {
    init_tracing();
    let cluster = TestCluster::start(3).await.expect("cluster");
    let key = Key::from("hits");

    // every gossip envelope for this submission is lost
    cluster.mesh().set_loss(1.0);
    let mut receipt = cluster
        .node(0)
        .replica
        .submit(OperationDescriptor::new(
            cluster.member(0),
            key.clone(),
            Mutation::Increment { delta: 1 },
        ))
        .await
        .expect("submit");
    assert!(cluster.mesh().dropped() > 0);

    // once the network recovers, digest exchange finds the gap and the
    // peers' digests double as acknowledgements
    cluster.mesh().set_loss(0.0);
    let slot = cluster.await_convergence(&key, CONVERGE_WITHIN).await.expect("repair");
    match slot {
        Slot::Counter(counter) => assert_eq!(counter.value(), 1),
        other => panic!("expected counter, got {other:?}"),
    }
    let completion = receipt
        .handle
        .wait_timeout(CONVERGE_WITHIN)
        .await
        .expect("wait")
        .expect("acked through digests");
    assert!(matches!(completion, Completion::Committed { rounds: 0, .. }));
    cluster.shutdown().await;
}

#[tokio::test]
async fn duplicated_delivery_applies_once() {
    init_tracing();
    let cluster = TestCluster::start(3).await.expect("cluster");
    let key = Key::from("hits");
    cluster.mesh().set_duplication(1.0);

    let mut receipt = cluster
        .node(0)
        .replica
        .submit(OperationDescriptor::new(
            cluster.member(0),
            key.clone(),
            Mutation::Increment { delta: 5 },
        ))
        .await
        .expect("submit");
    receipt.handle.wait().await.expect("completion");

    let slot = cluster.await_convergence(&key, CONVERGE_WITHIN).await.expect("convergence");
    match slot {
        Slot::Counter(counter) => assert_eq!(counter.value(), 5, "replays deduplicated"),
        other => panic!("expected counter, got {other:?}"),
    }
    cluster.shutdown().await;
}
