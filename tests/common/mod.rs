use std::collections::BTreeSet;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use cluster_harness::FaultInjector;
use cluster_harness::HarnessConfig;
use cluster_harness::HarnessSession;
use cluster_harness::PartitionEntry;
use cluster_harness::PartitionOp;
use cluster_harness::Result;
use parking_lot::Mutex;

pub const STARTUP_TIMEOUT_MS: u64 = 15_000;

/// Daemon stand-in that remembers what it was asked to do
#[derive(Clone, Default)]
pub struct RecordingInjector {
    requests: Arc<Mutex<Vec<(PartitionOp, PartitionEntry)>>>,
}

impl RecordingInjector {
    pub fn requests(&self) -> Vec<(PartitionOp, PartitionEntry)> {
        self.requests.lock().clone()
    }

    /// Pairs blocked and not unblocked since, per the requests seen
    pub fn active_blocks(&self) -> BTreeSet<PartitionEntry> {
        let mut active = BTreeSet::new();
        for (op, entry) in self.requests.lock().iter() {
            match op {
                PartitionOp::Block => active.insert(*entry),
                PartitionOp::Unblock => active.remove(entry),
            };
        }
        active
    }
}

impl FaultInjector for RecordingInjector {
    fn ensure_available(&self) -> Result<()> {
        Ok(())
    }

    fn send(
        &self,
        op: PartitionOp,
        entry: PartitionEntry,
    ) -> Result<()> {
        self.requests.lock().push((op, entry));
        Ok(())
    }
}

pub fn stub_executable() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_harness-stub-server"))
}

pub fn test_config(output_folder: &Path) -> HarnessConfig {
    let mut config = HarnessConfig::default();
    config.process.executable_path = stub_executable();
    config.process.startup_timeout_ms = STARTUP_TIMEOUT_MS;
    config.process.stop_grace_period_ms = 5_000;
    config.metacluster.output_folder = Some(output_folder.to_path_buf());
    config
}

pub fn session(output_folder: &Path) -> (HarnessSession, RecordingInjector) {
    let injector = RecordingInjector::default();
    let session = HarnessSession::with_injector(test_config(output_folder), Box::new(injector.clone()));
    (session, injector)
}

/// Session whose processes give up on startup after `startup_timeout_ms`
pub fn session_with_timeout(
    output_folder: &Path,
    startup_timeout_ms: u64,
) -> HarnessSession {
    let mut config = test_config(output_folder);
    config.process.startup_timeout_ms = startup_timeout_ms;
    HarnessSession::with_injector(config, Box::new(RecordingInjector::default()))
}

pub fn has_arg(
    args: &[String],
    name: &str,
) -> bool {
    args.iter().any(|a| a == name)
}
