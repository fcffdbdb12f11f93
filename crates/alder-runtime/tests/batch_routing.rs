//! Batch submission across a real cluster: the batch commits at the cost
//! of its most demanding member.

use alder_core::{ExecutionPath, Key, Mutation, OperationDescriptor, Slot};
use alder_runtime::Completion;
use alder_testkit::{init_tracing, TestCluster};
use std::time::Duration;

const CONVERGE_WITHIN: Duration = Duration::from_secs(2);

#[tokio::test]
async fn one_generic_member_prices_the_whole_batch() {
    init_tracing();
    let cluster = TestCluster::start(3).await.expect("cluster");
    let counter_key = Key::from("hits");
    let register_key = Key::from("profile");

    let receipts = cluster
        .node(0)
        .replica
        .submit_batch(vec![
            OperationDescriptor::new(
                cluster.member(0),
                counter_key.clone(),
                Mutation::Increment { delta: 4 },
            ),
            OperationDescriptor::new(
                cluster.member(0),
                register_key.clone(),
                Mutation::Write { value: "p".into() },
            ),
        ])
        .await
        .expect("submit");

    // the increment inherits the overwrite's consensus route, rounds and
    // all
    assert_eq!(receipts.len(), 2);
    for receipt in &receipts {
        assert_eq!(receipt.route.path, ExecutionPath::Consensus);
        assert_eq!(receipt.route.expected_rounds, 2);
    }

    let operations: Vec<_> = receipts.iter().map(|receipt| receipt.operation).collect();
    for mut receipt in receipts {
        assert!(matches!(
            receipt.handle.wait().await.expect("completion"),
            Completion::Committed { .. }
        ));
    }

    // both keys commit through their order rather than the free path
    cluster.await_committed_seq(&counter_key, 1, CONVERGE_WITHIN).await.expect("counter");
    cluster.await_committed_seq(&register_key, 1, CONVERGE_WITHIN).await.expect("register");
    let slot = cluster.await_convergence(&counter_key, CONVERGE_WITHIN).await.expect("counter");
    match slot {
        Slot::Counter(counter) => assert_eq!(counter.value(), 4),
        other => panic!("expected counter, got {other:?}"),
    }

    for operation in operations {
        let report = cluster.node(0).telemetry.for_operation(operation).expect("report");
        assert_eq!(report.path, ExecutionPath::Consensus);
        assert!(report.rounds >= 1, "no batch member rides for free");
    }
    cluster.shutdown().await;
}

#[tokio::test]
async fn an_all_algebraic_batch_stays_coordination_free() {
    init_tracing();
    let cluster = TestCluster::start(3).await.expect("cluster");

    let receipts = cluster
        .node(0)
        .replica
        .submit_batch(vec![
            OperationDescriptor::new(
                cluster.member(0),
                Key::from("hits"),
                Mutation::Increment { delta: 1 },
            ),
            OperationDescriptor::new(
                cluster.member(0),
                Key::from("high-water"),
                Mutation::Raise { value: 17 },
            ),
        ])
        .await
        .expect("submit");

    for receipt in &receipts {
        assert_eq!(receipt.route.path, ExecutionPath::CoordinationFree);
        assert_eq!(receipt.route.expected_rounds, 0);
    }
    for mut receipt in receipts {
        assert!(matches!(
            receipt.handle.wait().await.expect("completion"),
            Completion::Committed { rounds: 0, .. }
        ));
    }

    let slot = cluster
        .await_convergence(&Key::from("high-water"), CONVERGE_WITHIN)
        .await
        .expect("convergence");
    match slot {
        Slot::Watermark(watermark) => assert_eq!(watermark.value(), Some(17)),
        other => panic!("expected watermark, got {other:?}"),
    }
    cluster.shutdown().await;
}
