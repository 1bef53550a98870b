use std::time::Duration;

use cluster_harness::Cluster;
use cluster_harness::ClusterOptions;
use cluster_harness::Error;
use cluster_harness::PartitionEntry;
use cluster_harness::Process;
use cluster_harness::ProcessError;
use parking_lot::Mutex;
use tempfile::tempdir;

use crate::common::session;

async fn wait_for_exit(process: &Process) {
    for _ in 0..250 {
        if !process.is_running() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("{} still running", process.desired_name());
}

#[tokio::test]
async fn test_scoped_session_stops_everything() {
    crate::enable_logger();
    let dir = tempdir().unwrap();
    let (session, _) = session(dir.path());

    let started = Mutex::new(vec![]);
    let slot = &started;
    let result = session
        .scoped(|session| async move {
            let cluster = Cluster::standalone(&session, ClusterOptions::servers(2)).await?;
            *slot.lock() = cluster.processes();
            assert_eq!(session.registered().len(), 2);
            Ok(cluster)
        })
        .await;

    let _cluster = result.unwrap();
    let started = started.into_inner();
    assert_eq!(started.len(), 2);
    for process in &started {
        assert!(!process.is_running());
        assert_eq!(process.exit_code(), Some(0));
    }
    assert!(session.registered().is_empty());
}

#[tokio::test]
async fn test_scoped_session_cleans_up_after_failure() {
    let dir = tempdir().unwrap();
    let (session, _) = session(dir.path());

    let started = Mutex::new(vec![]);
    let slot = &started;
    let result: cluster_harness::Result<()> = session
        .scoped(|session| async move {
            let cluster = Cluster::standalone(&session, ClusterOptions::servers(1)).await?;
            *slot.lock() = cluster.processes();
            Err(ProcessError::NotRunning("on purpose".into()).into())
        })
        .await;

    assert!(matches!(result, Err(Error::Process(ProcessError::NotRunning(_)))));
    let started = started.into_inner();
    assert_eq!(started.len(), 1);
    for process in &started {
        assert!(!process.is_running());
    }
}

#[tokio::test]
async fn test_shutdown_lifts_every_block() {
    let dir = tempdir().unwrap();
    let (session, injector) = session(dir.path());

    session.partitions().block_path(PartitionEntry::new(1000, 2000)).unwrap();
    session.partitions().block_path(PartitionEntry::new(2000, 1000)).unwrap();
    assert_eq!(injector.active_blocks().len(), 2);

    session.shutdown().await.unwrap();
    assert!(injector.active_blocks().is_empty());
    assert!(session.partitions().blocked_pairs().is_empty());
}

#[tokio::test]
async fn test_dropped_session_kills_processes() {
    let dir = tempdir().unwrap();
    let (session, injector) = session(dir.path());

    let cluster = Cluster::standalone(&session, ClusterOptions::servers(1)).await.unwrap();
    let server = cluster.get(0).unwrap();
    session.partitions().block_path(PartitionEntry::new(1000, 2000)).unwrap();

    // cluster and metacluster keep the session alive
    drop(cluster);
    drop(session);

    wait_for_exit(&server).await;
    assert!(injector.active_blocks().is_empty());
}
