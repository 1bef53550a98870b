//! Network partition injection.
//!
//! The daemon that actually installs packet filters is an external
//! collaborator; this module only speaks its one-line-per-connection protocol
//! and remembers which directed port pairs are currently blocked.
mod controller;
mod tcp_injector;
pub use controller::*;
pub use tcp_injector::*;


use std::fmt;

#[cfg(test)]
use mockall::automock;

use crate::constants::OP_BLOCK;
use crate::constants::OP_UNBLOCK;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartitionOp {
    Block,
    Unblock,
}

impl PartitionOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            PartitionOp::Block => OP_BLOCK,
            PartitionOp::Unblock => OP_UNBLOCK,
        }
    }
}

impl fmt::Display for PartitionOp {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Traffic from `source` port to `dest` port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionEntry {
    pub source: u16,
    pub dest: u16,
}

impl PartitionEntry {
    pub fn new(
        source: u16,
        dest: u16,
    ) -> Self {
        Self { source, dest }
    }
}

impl fmt::Display for PartitionEntry {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}->{}", self.source, self.dest)
    }
}

/// Something that can install or remove a block on a directed port pair.
///
/// Calls are short and synchronous so they can also run from `Drop`.
#[cfg_attr(test, automock)]
pub trait FaultInjector: Send + Sync {
    /// Fails fast when the injector cannot work on this host at all
    fn ensure_available(&self) -> Result<()>;

    fn send(
        &self,
        op: PartitionOp,
        entry: PartitionEntry,
    ) -> Result<()>;
}
