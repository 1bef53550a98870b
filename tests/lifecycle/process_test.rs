use std::time::Duration;
use std::time::Instant;

use cluster_harness::Cluster;
use cluster_harness::ClusterOptions;
use cluster_harness::Error;
use cluster_harness::ProcessError;
use cluster_harness::ProcessKind;
use cluster_harness::ProcessOptions;
use cluster_harness::ProcessState;
use nix::sys::signal::kill;
use nix::sys::signal::Signal;
use nix::sys::wait::waitpid;
use nix::unistd::Pid;
use tempfile::tempdir;

use crate::common::has_arg;
use crate::common::session;
use crate::common::session_with_timeout;

#[tokio::test]
async fn test_single_server_lifecycle() {
    crate::enable_logger();
    let dir = tempdir().unwrap();
    let (session, _) = session(dir.path());

    let cluster = Cluster::standalone(&session, ClusterOptions::servers(1)).await.unwrap();
    let server = cluster.get(0).unwrap();

    assert_eq!(server.kind(), ProcessKind::Server);
    assert_eq!(server.state(), ProcessState::Ready);
    assert_eq!(server.name().await.unwrap(), "server_0");
    assert_eq!(server.uuid().await.unwrap().len(), 36);
    assert!(server.cluster_port().await.unwrap() > 0);
    assert!(server.driver_port().await.unwrap() > 0);
    assert!(server.http_port().await.unwrap() > 0);
    assert!(server.data_dir().join("metadata").is_file());
    assert!(server.log_path().is_file());
    assert!(server.data_dir().join("console.txt").is_file());
    assert!(server.pid().is_ok());

    let args = server.launch_args();
    assert!(has_arg(&args, "serve"));
    assert!(has_arg(&args, &server.local_cluster_port().to_string()));
    assert!(!has_arg(&args, "--join"));
    assert!(server.console_output().contains("Launching at"));

    server.check_and_stop().await.unwrap();
    assert!(!server.is_running());
    assert_eq!(server.exit_code(), Some(0));
    assert_eq!(server.state(), ProcessState::Stopped);
    assert_eq!(server.discovered(), Default::default());
    assert!(matches!(
        server.pid(),
        Err(Error::Process(ProcessError::NotRunning(_)))
    ));

    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_restart_skips_initialisation() {
    crate::enable_logger();
    let dir = tempdir().unwrap();
    let (session, _) = session(dir.path());

    let cluster = Cluster::standalone(&session, ClusterOptions::named(&["alpha"])).await.unwrap();
    let server = cluster.find("alpha").unwrap();
    let first_uuid = server.uuid().await.unwrap();

    server.stop().await.unwrap();
    assert!(server.discovered().cluster_port.is_none());
    assert!(server.discovered().uuid.is_none());

    server.start(true).await.unwrap();
    assert_eq!(server.name().await.unwrap(), "alpha");
    assert!(server.cluster_port().await.unwrap() > 0);
    // the stub picks a fresh id on every launch
    assert_ne!(server.uuid().await.unwrap(), first_uuid);

    let console = server.console_output();
    assert_eq!(console.matches("Creating data directory").count(), 1);
    assert_eq!(console.matches("Launching at").count(), 2);

    cluster.check_and_stop().await.unwrap();
    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_start_while_running_fails() {
    let dir = tempdir().unwrap();
    let (session, _) = session(dir.path());
    let cluster = Cluster::standalone(&session, ClusterOptions::servers(1)).await.unwrap();
    let server = cluster.get(0).unwrap();

    let err = server.start(false).await.unwrap_err();
    assert!(matches!(err, Error::Process(ProcessError::AlreadyRunning(_))));

    cluster.check_and_stop().await.unwrap();
    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_check_and_stop_reports_nonzero_exit() {
    crate::enable_logger();
    let dir = tempdir().unwrap();
    let (session, _) = session(dir.path());
    let cluster = Cluster::standalone(&session, ClusterOptions::servers(0)).await.unwrap();

    let options = ProcessOptions::server()
        .name("grumpy")
        .extra_options(vec!["--stub-exit-code".into(), "3".into()]);
    let server = cluster.add_process(options, true).await.unwrap();

    let err = server.check_and_stop().await.unwrap_err();
    match err {
        Error::Process(ProcessError::UnexpectedExit { kind, name, code }) => {
            assert_eq!(kind, ProcessKind::Server);
            assert_eq!(name, "grumpy");
            assert_eq!(code, Some(3));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!server.is_running());

    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_killed_process_passes_check_and_stop() {
    let dir = tempdir().unwrap();
    let (session, _) = session(dir.path());
    let cluster = Cluster::standalone(&session, ClusterOptions::servers(1)).await.unwrap();
    let server = cluster.get(0).unwrap();

    server.kill().await.unwrap();
    assert!(server.was_killed());
    assert_eq!(server.state(), ProcessState::Killed);
    assert_eq!(server.exit_code(), Some(-9));

    server.check_and_stop().await.unwrap();
    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unexpected_death_is_permanent() {
    let dir = tempdir().unwrap();
    let (session, _) = session(dir.path());
    let cluster = Cluster::standalone(&session, ClusterOptions::servers(1)).await.unwrap();
    let server = cluster.get(0).unwrap();

    let pid = server.pid().unwrap();
    kill(Pid::from_raw(pid as i32), Signal::SIGKILL).unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while server.is_running() {
        assert!(Instant::now() < deadline, "process survived SIGKILL");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert!(!server.is_running());
    assert_eq!(server.state(), ProcessState::Failed);
    assert!(matches!(
        server.check(),
        Err(Error::Process(ProcessError::UnexpectedExit { code: Some(-9), .. }))
    ));
    assert!(server.check_and_stop().await.is_err());

    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_wait_until_ready_times_out_within_bounds() {
    let dir = tempdir().unwrap();
    let (session, _) = session(dir.path());
    let cluster = Cluster::standalone(&session, ClusterOptions::servers(0)).await.unwrap();

    let options = ProcessOptions::server().extra_options(vec!["--stub-never-ready".into()]);
    let server = cluster.add_process(options, false).await.unwrap();

    let timeout = Duration::from_millis(800);
    let poll = session.config().process.ready_poll_interval();
    let started = Instant::now();
    let err = server.wait_until_ready(timeout).await.unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, Error::Timeout { .. }));
    assert!(err.to_string().contains(server.desired_name()));
    assert!(elapsed >= timeout, "gave up early after {elapsed:?}");
    assert!(elapsed < timeout + poll + Duration::from_millis(500), "took {elapsed:?}");

    // ports were still discovered
    assert!(server.cluster_port().await.unwrap() > 0);
    server.check_and_stop().await.unwrap();
    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_proxy_joins_and_drops_cache_size() {
    let dir = tempdir().unwrap();
    let (session, _) = session(dir.path());
    let cluster = Cluster::standalone(&session, ClusterOptions::servers(1)).await.unwrap();
    let server = cluster.get(0).unwrap();

    let proxy = cluster.add_process(ProcessOptions::proxy(), true).await.unwrap();
    let args = proxy.launch_args();

    assert_eq!(proxy.kind(), ProcessKind::Proxy);
    assert!(has_arg(&args, "proxy"));
    assert!(!has_arg(&args, "--cache-size"));
    assert!(!has_arg(&args, "--directory"));
    let join = format!("localhost:{}", server.cluster_port().await.unwrap());
    assert!(has_arg(&args, &join));
    assert!(proxy.uuid().await.unwrap().starts_with("proxy-"));
    assert_eq!(proxy.desired_name(), "proxy_0");

    cluster.check_and_stop().await.unwrap();
    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_identity_accessors_time_out_naming_the_value() {
    let dir = tempdir().unwrap();
    let session = session_with_timeout(dir.path(), 700);
    let cluster = Cluster::standalone(&session, ClusterOptions::servers(0)).await.unwrap();

    let options = ProcessOptions::server()
        .name("mute")
        .extra_options(vec!["--stub-never-ready".into()]);
    let server = cluster.add_process(options, false).await.unwrap();

    let err = server.name().await.unwrap_err();
    assert!(matches!(err, Error::Timeout { .. }));
    assert!(err.to_string().contains("name value of mute"), "{err}");

    let err = server.uuid().await.unwrap_err();
    assert!(matches!(err, Error::Timeout { .. }));
    assert!(err.to_string().contains("uuid value of mute"), "{err}");

    // ports are logged, so those still resolve
    assert!(server.driver_port().await.unwrap() > 0);
    assert!(server.is_running());

    server.check_and_stop().await.unwrap();
    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_missing_log_file_times_out_readiness() {
    let dir = tempdir().unwrap();
    let session = session_with_timeout(dir.path(), 700);
    let cluster = Cluster::standalone(&session, ClusterOptions::servers(0)).await.unwrap();

    // stays alive without ever touching its log
    let log_file = dir.path().join("never_written.txt");
    let options = ProcessOptions {
        command_prefix: Some(vec!["sh".into(), "-c".into(), "exec sleep 30".into(), "--".into()]),
        extra_options: Some(vec!["--log-file".into(), log_file.display().to_string()]),
        ..ProcessOptions::proxy()
    };
    let proxy = cluster.add_process(options, false).await.unwrap();
    assert_eq!(proxy.log_path(), log_file.as_path());

    let timeout = session.config().process.startup_timeout();
    let err = proxy.wait_until_ready(timeout).await.unwrap_err();
    assert!(matches!(err, Error::Timeout { .. }));
    assert!(err.to_string().contains(proxy.desired_name()), "{err}");

    let err = proxy.cluster_port().await.unwrap_err();
    assert!(err.to_string().contains("cluster port value of"), "{err}");
    assert!(!log_file.exists());
    assert!(proxy.is_running());
    assert_eq!(proxy.state(), ProcessState::Starting);

    proxy.kill().await.unwrap();
    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_lost_child_handle_counts_as_clean_exit() {
    let dir = tempdir().unwrap();
    let (session, _) = session(dir.path());
    let cluster = Cluster::standalone(&session, ClusterOptions::servers(1)).await.unwrap();
    let server = cluster.get(0).unwrap();

    // reap the child behind the handle's back
    let pid = Pid::from_raw(server.pid().unwrap() as i32);
    kill(pid, Signal::SIGKILL).unwrap();
    waitpid(pid, None).unwrap();

    assert!(!server.is_running());
    assert_eq!(server.exit_code(), Some(0));
    assert_eq!(server.state(), ProcessState::Failed);

    server.stop().await.unwrap();
    assert_eq!(server.state(), ProcessState::Stopped);
    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_restart_after_unexpected_death() {
    let dir = tempdir().unwrap();
    let (session, _) = session(dir.path());
    let cluster = Cluster::standalone(&session, ClusterOptions::servers(1)).await.unwrap();
    let server = cluster.get(0).unwrap();

    kill(Pid::from_raw(server.pid().unwrap() as i32), Signal::SIGKILL).unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    while server.is_running() {
        assert!(Instant::now() < deadline, "process survived SIGKILL");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    // no stop() in between
    server.start(true).await.unwrap();
    assert_eq!(server.state(), ProcessState::Ready);
    assert!(server.is_ready());
    let port = server.cluster_port().await.unwrap();
    assert!(port > 0);
    assert_eq!(server.discovered().cluster_port, Some(port));
    assert_eq!(server.name().await.unwrap(), server.desired_name());

    server.check_and_stop().await.unwrap();
    session.shutdown().await.unwrap();
}
