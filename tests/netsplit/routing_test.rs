use std::collections::BTreeSet;

use cluster_harness::expected_blocked;
use cluster_harness::pairs_between;
use cluster_harness::ClusterOptions;
use cluster_harness::Metacluster;
use cluster_harness::MetaclusterOptions;
use cluster_harness::PartitionEntry;
use cluster_harness::Process;
use cluster_harness::RouteEndpoint;
use tempfile::tempdir;

use crate::common::session;

async fn endpoint(process: &Process) -> RouteEndpoint {
    RouteEndpoint::new(process.cluster_port().await.unwrap(), process.local_cluster_port())
}

async fn pairs(
    a: &Process,
    b: &Process,
) -> BTreeSet<PartitionEntry> {
    pairs_between(endpoint(a).await, endpoint(b).await).into_iter().collect()
}

#[tokio::test]
async fn test_two_clusters_are_partitioned() {
    crate::enable_logger();
    let dir = tempdir().unwrap();
    let (session, injector) = session(dir.path());
    let meta = Metacluster::new(&session, MetaclusterOptions::default()).unwrap();

    let a = meta.add_cluster(ClusterOptions::servers(2)).await.unwrap();
    let b = meta.add_cluster(ClusterOptions::servers(1)).await.unwrap();
    let (a0, a1, b0) = (a.get(0).unwrap(), a.get(1).unwrap(), b.get(0).unwrap());

    let expected = expected_blocked(&[
        vec![endpoint(&a0).await, endpoint(&a1).await],
        vec![endpoint(&b0).await],
    ]);
    assert_eq!(expected.len(), 16);
    assert_eq!(meta.expected_blocked_pairs(), expected);
    assert_eq!(session.partitions().blocked_pairs(), expected);
    assert_eq!(injector.active_blocks(), expected);
    meta.verify_partitions().await.unwrap();

    // nothing within a cluster
    for pair in pairs(&a0, &a1).await {
        assert!(!session.partitions().is_blocked(&pair));
    }

    meta.stop().await.unwrap();
    assert!(session.partitions().blocked_pairs().is_empty());
    assert!(injector.active_blocks().is_empty());
    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_single_cluster_never_blocks() {
    let dir = tempdir().unwrap();
    let (session, injector) = session(dir.path());
    let meta = Metacluster::new(&session, MetaclusterOptions::default()).unwrap();

    let a = meta.add_cluster(ClusterOptions::servers(2)).await.unwrap();
    a.get(0).unwrap().stop().await.unwrap();
    a.get(0).unwrap().start(true).await.unwrap();

    assert!(injector.requests().is_empty());
    meta.stop().await.unwrap();
    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_moving_a_process_flips_its_blocks() {
    crate::enable_logger();
    let dir = tempdir().unwrap();
    let (session, injector) = session(dir.path());
    let meta = Metacluster::new(&session, MetaclusterOptions::default()).unwrap();

    let a = meta.add_cluster(ClusterOptions::servers(2)).await.unwrap();
    let b = meta.add_cluster(ClusterOptions::servers(1)).await.unwrap();
    let (a0, a1, b0) = (a.get(0).unwrap(), a.get(1).unwrap(), b.get(0).unwrap());

    let a0_b0 = pairs(&a0, &b0).await;
    let a1_b0 = pairs(&a1, &b0).await;
    let a0_a1 = pairs(&a0, &a1).await;

    meta.move_processes(&a, &b, &[a1.clone()]).await.unwrap();
    assert_eq!(a.processes(), vec![a0.clone()]);
    assert_eq!(b.len(), 2);

    let blocked = session.partitions().blocked_pairs();
    assert!(a0_a1.is_subset(&blocked), "moved process still reaches its old cluster");
    assert!(a1_b0.is_disjoint(&blocked), "moved process still cut off from its new cluster");
    assert!(a0_b0.is_subset(&blocked), "untouched pairs changed");
    assert_eq!(injector.active_blocks(), blocked);
    meta.verify_partitions().await.unwrap();

    meta.stop().await.unwrap();
    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_stopping_a_process_unblocks_it() {
    let dir = tempdir().unwrap();
    let (session, injector) = session(dir.path());
    let meta = Metacluster::new(&session, MetaclusterOptions::default()).unwrap();

    let a = meta.add_cluster(ClusterOptions::servers(1)).await.unwrap();
    let b = meta.add_cluster(ClusterOptions::servers(2)).await.unwrap();
    let (a0, b0, b1) = (a.get(0).unwrap(), b.get(0).unwrap(), b.get(1).unwrap());

    let a0_b1 = pairs(&a0, &b1).await;
    let a0_b0 = pairs(&a0, &b0).await;
    assert!(a0_b1.is_subset(&session.partitions().blocked_pairs()));

    b1.stop().await.unwrap();
    let blocked = session.partitions().blocked_pairs();
    assert!(a0_b1.is_disjoint(&blocked));
    assert_eq!(blocked, a0_b0);
    assert_eq!(injector.active_blocks(), a0_b0);
    meta.verify_partitions().await.unwrap();

    // comes back partitioned again
    b1.start(true).await.unwrap();
    let a0_b1 = pairs(&a0, &b1).await;
    assert!(a0_b1.is_subset(&session.partitions().blocked_pairs()));
    meta.verify_partitions().await.unwrap();

    meta.stop().await.unwrap();
    assert!(injector.active_blocks().is_empty());
    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_stop_reaches_clusters_whose_handles_were_dropped() {
    let dir = tempdir().unwrap();
    let (session, injector) = session(dir.path());
    let meta = Metacluster::new(&session, MetaclusterOptions::default()).unwrap();

    meta.add_cluster(ClusterOptions::servers(1)).await.unwrap();
    meta.add_cluster(ClusterOptions::servers(1)).await.unwrap();

    let clusters = meta.clusters();
    assert_eq!(clusters.len(), 2);
    let (a0, b0) = (clusters[0].get(0).unwrap(), clusters[1].get(0).unwrap());
    drop(clusters);

    assert!(a0.is_running() && b0.is_running());
    assert_eq!(injector.active_blocks().len(), 8);
    assert_eq!(injector.active_blocks(), pairs(&a0, &b0).await);
    meta.verify_partitions().await.unwrap();

    meta.stop().await.unwrap();
    for process in [&a0, &b0] {
        assert!(!process.is_running());
        assert_eq!(process.exit_code(), Some(0));
    }
    assert!(injector.active_blocks().is_empty());
    session.shutdown().await.unwrap();
}
