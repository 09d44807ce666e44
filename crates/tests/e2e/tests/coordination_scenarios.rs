//! Coordination scenarios: coalescing, backoff, and leader gating.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use e2e_tests::fixtures::{
    LockHub, start_service, test_registry, wait_for, wait_for_initial_build,
};

/// S3: a burst of rebuild requests against an in-flight build collapses to
/// exactly one follow-up build.
#[tokio::test]
async fn rebuild_burst_coalesces_to_two_builds() {
    let (registry, instruments) = test_registry(None);
    let config = r#"
stores:
  slow:
    type: gated
bundles:
  b:
    store: slow
    polling:
      disable: true
"#;

    let (service, _file) = start_service(config, registry).await;
    let store = instruments.gated_store("slow");

    // the activation build is in flight, parked on the gate
    store.wait_for_call().await;

    let mut burst = Vec::new();
    for _ in 0..100 {
        let service = std::sync::Arc::clone(&service);
        burst.push(tokio::spawn(async move {
            service.rebuild_bundle("b").await
        }));
    }
    for handle in burst {
        handle.await.unwrap().unwrap();
    }

    store.release(b"v1".to_vec());
    store.wait_for_call().await;
    store.release(b"v2".to_vec());

    wait_for(|| store.calls() == 2).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(store.calls(), 2);

    service.shutdown().await;
}

/// S4: while the store keeps failing, the delays between attempts grow
/// (up to the cap) instead of hammering the upstream.
#[tokio::test]
async fn failing_store_backs_off_between_attempts() {
    let (registry, instruments) = test_registry(None);
    let config = r#"
stores:
  broken:
    type: failing
bundles:
  b:
    store: broken
    polling:
      min_delay_seconds: 1
      max_delay_seconds: 2
"#;

    let (service, _file) = start_service(config, registry).await;
    let store = instruments.failing_store("broken");

    // nominal backoff schedule: 100ms, 200ms, 400ms, 800ms between attempts
    tokio::time::timeout(Duration::from_secs(10), async {
        while store.attempt_instants().len() < 5 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("store was not retried enough times");
    service.shutdown().await;

    let attempts = store.attempt_instants();
    let gaps: Vec<Duration> = attempts.windows(2).map(|w| w[1] - w[0]).collect();

    for (i, pair) in gaps.windows(2).enumerate() {
        assert!(
            pair[1] + Duration::from_millis(50) >= pair[0],
            "gap {} shrank: {:?} -> {:?}",
            i,
            pair[0],
            pair[1]
        );
    }
    for gap in &gaps {
        assert!(*gap >= Duration::from_millis(80), "gap too small: {gap:?}");
        assert!(*gap <= Duration::from_millis(2500), "gap exceeds cap: {gap:?}");
    }
}

/// S5: with two services contending on one lock, only the leader deploys a
/// changing bundle.
#[tokio::test]
async fn only_the_leader_deploys() {
    let hub = LockHub::new();

    let (registry_a, instruments_a) = test_registry(Some(&hub));
    let (registry_b, instruments_b) = test_registry(Some(&hub));

    let config_for = |node: &str| {
        format!(
            r#"
lock:
  type: shared
  config:
    id: {node}
stores:
  main:
    type: swappable
    config:
      data: v1
deployers:
  d1:
    type: counting
bundles:
  b:
    store: main
    deployers: [d1]
    polling:
      disable: true
"#
        )
    };

    let (service_a, _file_a) = start_service(&config_for("node-a"), registry_a).await;
    let (service_b, _file_b) = start_service(&config_for("node-b"), registry_b).await;

    wait_for_initial_build(&service_a, "b").await;
    wait_for_initial_build(&service_b, "b").await;

    // exactly one of the two acquisition loops wins
    for _ in 0..200 {
        if hub.holder().await.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let leader = hub.holder().await.expect("a leader was elected");
    // the winner flips its leadership flag right after taking the hub slot
    tokio::time::sleep(Duration::from_millis(50)).await;

    // change upstream content on both nodes and rebuild
    instruments_a.store("main").set_data(b"v2".to_vec());
    instruments_b.store("main").set_data(b"v2".to_vec());
    service_a.rebuild_bundle("b").await.unwrap();
    service_b.rebuild_bundle("b").await.unwrap();

    let deploys_a = instruments_a.deployer("d1").count();
    let deploys_b = instruments_b.deployer("d1").count();
    assert_eq!(deploys_a + deploys_b, 1, "exactly one node deploys");
    if leader == "node-a" {
        assert_eq!(deploys_a, 1);
    } else {
        assert_eq!(deploys_b, 1);
    }

    service_a.shutdown().await;
    service_b.shutdown().await;
}
