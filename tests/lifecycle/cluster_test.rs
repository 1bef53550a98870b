use std::collections::HashSet;

use cluster_harness::Cluster;
use cluster_harness::ClusterOptions;
use cluster_harness::ConsoleOutput;
use cluster_harness::ConsoleSink;
use cluster_harness::ProcessOptions;
use cluster_harness::TlsSetting;
use tempfile::tempdir;

use crate::common::has_arg;
use crate::common::session;

#[tokio::test]
async fn test_only_one_bootstrap_process_per_cluster() {
    crate::enable_logger();
    let dir = tempdir().unwrap();
    let (session, _) = session(dir.path());

    let cluster = Cluster::standalone(&session, ClusterOptions::servers(3)).await.unwrap();
    assert_eq!(cluster.len(), 3);
    assert!(cluster.is_running());

    let bootstraps = cluster
        .processes()
        .iter()
        .filter(|p| !has_arg(&p.launch_args(), "--join"))
        .count();
    assert_eq!(bootstraps, 1);

    let names: HashSet<String> = cluster.processes().iter().map(|p| p.desired_name().to_string()).collect();
    assert_eq!(names.len(), 3);

    cluster.check_and_stop().await.unwrap();
    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_stop_all_then_restart_without_waiting() {
    let dir = tempdir().unwrap();
    let (session, _) = session(dir.path());
    let cluster = Cluster::standalone(&session, ClusterOptions::servers(4)).await.unwrap();

    for process in cluster.processes() {
        process.stop().await.unwrap();
    }
    assert!(!cluster.is_running());
    assert!(cluster.check().is_err());

    for process in cluster.processes() {
        process.start(false).await.unwrap();
    }
    let timeout = session.config().process.startup_timeout();
    let records = cluster.wait_until_ready(timeout).await.unwrap();

    assert_eq!(records.len(), 4);
    for (record, process) in records.iter().zip(cluster.processes()) {
        assert!(record.cluster_port > 0 && record.driver_port > 0 && record.http_port > 0);
        assert_eq!(record.local_cluster_port, process.local_cluster_port());
        assert_eq!(record.pid, process.pid().unwrap());
        assert_eq!(record.name.as_deref(), Some(process.desired_name()));
    }

    cluster.check_and_stop().await.unwrap();
    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_generated_tls_is_passed_to_every_process() {
    let dir = tempdir().unwrap();
    let (session, _) = session(dir.path());

    let options = ClusterOptions {
        tls: TlsSetting::Generate,
        ..ClusterOptions::servers(2)
    };
    let cluster = Cluster::standalone(&session, options).await.unwrap();
    let tls = cluster.tls().unwrap().clone();
    let cert = tls.cert_path.display().to_string();

    for process in cluster.processes() {
        let args = process.launch_args();
        for flag in [
            "--http-tls-key",
            "--http-tls-cert",
            "--driver-tls-key",
            "--driver-tls-cert",
            "--cluster-tls-key",
            "--cluster-tls-cert",
            "--cluster-tls-ca",
        ] {
            assert!(has_arg(&args, flag), "{flag} missing");
        }
        assert!(has_arg(&args, &cert));
    }

    cluster.check_and_stop().await.unwrap();
    session.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_console_sink_receives_launch_notes() {
    let dir = tempdir().unwrap();
    let (session, _) = session(dir.path());
    let cluster = Cluster::standalone(&session, ClusterOptions::servers(0)).await.unwrap();

    let captured = std::sync::Arc::new(parking_lot::Mutex::new(Vec::<u8>::new()));
    let sink = ConsoleSink::new(SharedBuffer(captured.clone()));
    let options = ProcessOptions::server().console_output(ConsoleOutput::ToSink(sink));
    let server = cluster.add_process(options, true).await.unwrap();

    let text = String::from_utf8(captured.lock().clone()).unwrap();
    assert!(text.contains("Creating data directory"));
    assert!(text.contains("Launching at"));
    assert!(!server.data_dir().join("console.txt").exists());

    cluster.check_and_stop().await.unwrap();
    session.shutdown().await.unwrap();
}

struct SharedBuffer(std::sync::Arc<parking_lot::Mutex<Vec<u8>>>);

impl std::io::Write for SharedBuffer {
    fn write(
        &mut self,
        buf: &[u8],
    ) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
