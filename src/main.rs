use std::path::Path;
use std::time::Duration;

use cluster_harness::file_io::open_file_for_append;
use cluster_harness::Cluster;
use cluster_harness::ClusterOptions;
use cluster_harness::HarnessConfig;
use cluster_harness::HarnessSession;
use cluster_harness::Result;
use tokio::signal::unix::signal;
use tokio::signal::unix::SignalKind;
use tracing::error;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> Result<()> {
    let config = HarnessConfig::new()?.validate()?;

    // Initializing Logs
    let _guard = init_observability(&config.metacluster.log_dir)?;

    let session = HarnessSession::new(config);
    let startup_timeout = session.config().process.startup_timeout();

    let result = tokio::select! {
        result = smoke_test(session.clone(), startup_timeout) => result,
        signal = shutdown_signal() => {
            info!("{} detected, aborting", signal);
            Ok(())
        }
    };

    if let Err(e) = &result {
        error!("smoke test failed: {}", e);
    }
    if let Err(e) = session.shutdown().await {
        error!("session shutdown failed: {}", e);
    }

    info!("Exiting program.");
    result
}

/// Starts and stops a single server, then a cluster of four
async fn smoke_test(
    session: HarnessSession,
    startup_timeout: Duration,
) -> Result<()> {
    info!("starting a single server");
    let single = Cluster::standalone(&session, ClusterOptions::servers(1)).await?;
    let server = single.get(0)?;
    info!(
        "server {} ready on driver port {}",
        server.name().await?,
        server.driver_port().await?
    );
    server.check_and_stop().await?;
    single.metacluster().stop().await?;

    info!("starting a cluster of four");
    let cluster = Cluster::standalone(&session, ClusterOptions::servers(4)).await?;
    cluster.check()?;

    info!("stopping all servers");
    for process in cluster.processes() {
        process.stop().await?;
    }

    info!("restarting all servers");
    for process in cluster.processes() {
        process.start(false).await?;
    }
    for record in cluster.wait_until_ready(startup_timeout).await? {
        info!("{:?} ready, cluster port {}", record.name, record.cluster_port);
    }

    cluster.check_and_stop().await?;
    cluster.metacluster().stop().await?;
    info!("smoke test passed");
    Ok(())
}

async fn shutdown_signal() -> &'static str {
    let (Ok(mut sigint), Ok(mut sigterm)) = (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
    ) else {
        // fall back to ctrl-c only
        let _ = tokio::signal::ctrl_c().await;
        return "Ctrl+C";
    };
    tokio::select! {
        _ = sigint.recv() => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
    }
}

pub fn init_observability(log_dir: &Path) -> Result<WorkerGuard> {
    let log_file = open_file_for_append(&log_dir.join("harness.log"))?;

    let (non_blocking, guard) = tracing_appender::non_blocking(log_file);
    let base_subscriber = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(base_subscriber).init();

    Ok(guard)
}
