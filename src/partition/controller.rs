use std::collections::BTreeSet;
use std::collections::HashSet;

use parking_lot::Mutex;
use tracing::debug;
use tracing::warn;

use super::FaultInjector;
use super::PartitionEntry;
use super::PartitionOp;
use crate::Result;

/// Tracks every directed port pair this run has asked the daemon to block.
///
/// A pair is recorded before its block request is sent, so `unblock_all`
/// also covers requests whose delivery failed half-way.
pub struct PartitionController {
    injector: Box<dyn FaultInjector>,
    blocked: Mutex<HashSet<PartitionEntry>>,
}

impl PartitionController {
    pub fn new(injector: Box<dyn FaultInjector>) -> Self {
        Self {
            injector,
            blocked: Mutex::new(HashSet::new()),
        }
    }

    /// Fails fast when blocking cannot work on this host
    pub fn ensure_available(&self) -> Result<()> {
        self.injector.ensure_available()
    }

    pub fn block_path(
        &self,
        entry: PartitionEntry,
    ) -> Result<()> {
        let newly_blocked = self.blocked.lock().insert(entry);
        if newly_blocked {
            debug!("blocking {}", entry);
            self.injector.send(PartitionOp::Block, entry)?;
        }
        Ok(())
    }

    /// No-op for pairs that are not currently blocked
    pub fn unblock_path(
        &self,
        entry: PartitionEntry,
    ) -> Result<()> {
        let was_blocked = self.blocked.lock().remove(&entry);
        if was_blocked {
            debug!("unblocking {}", entry);
            self.injector.send(PartitionOp::Unblock, entry)?;
        }
        Ok(())
    }

    pub fn block_paths(
        &self,
        entries: impl IntoIterator<Item = PartitionEntry>,
    ) -> Result<()> {
        for entry in entries {
            self.block_path(entry)?;
        }
        Ok(())
    }

    pub fn unblock_paths(
        &self,
        entries: impl IntoIterator<Item = PartitionEntry>,
    ) -> Result<()> {
        for entry in entries {
            self.unblock_path(entry)?;
        }
        Ok(())
    }

    /// Unblocks everything this run ever blocked.
    ///
    /// Every pair is attempted even when some fail; the first failure is
    /// returned.
    pub fn unblock_all(&self) -> Result<()> {
        let drained: Vec<PartitionEntry> = self.blocked.lock().drain().collect();
        if drained.is_empty() {
            return Ok(());
        }

        debug!("unblocking all {} blocked pairs", drained.len());
        let mut first_err = None;
        for entry in drained {
            if let Err(e) = self.injector.send(PartitionOp::Unblock, entry) {
                warn!("failed to unblock {}: {}", entry, e);
                first_err.get_or_insert(e);
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn is_blocked(
        &self,
        entry: &PartitionEntry,
    ) -> bool {
        self.blocked.lock().contains(entry)
    }

    /// Snapshot of the blocked set, ordered for stable comparisons
    pub fn blocked_pairs(&self) -> BTreeSet<PartitionEntry> {
        self.blocked.lock().iter().copied().collect()
    }
}
