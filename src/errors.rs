//! Harness Error Hierarchy
//!
//! Errors are grouped by where a test run can go wrong: environment setup,
//! waiting on a supervised process, the supervised process itself, cluster
//! membership bookkeeping and the partition daemon.

use std::path::PathBuf;
use std::time::Duration;

use config::ConfigError;

use crate::PartitionEntry;
use crate::ProcessKind;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Fatal environment problems, raised immediately and never retried
    #[error(transparent)]
    Setup(#[from] SetupError),

    /// A bounded wait ran past its deadline
    #[error("Timed out after {after:?} waiting for {what}")]
    Timeout { what: String, after: Duration },

    /// Supervised process misbehaved or was used in the wrong state
    #[error(transparent)]
    Process(#[from] ProcessError),

    /// Cluster / metacluster membership violations
    #[error(transparent)]
    Membership(#[from] MembershipError),

    /// Fault-injection daemon failures
    #[error(transparent)]
    Partition(#[from] PartitionError),

    /// Configuration loading failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Bad path {path}: {reason}")]
    BadPath { path: PathBuf, reason: String },

    #[error("No such executable: {0}")]
    ExecutableNotFound(PathBuf),

    /// Partition daemon is not among the running processes
    #[error("{name} is not running, please start it as root before running netsplit tests")]
    DaemonNotRunning { name: String },

    #[error("Unable to use `ps` command! Code: {code:?}, Output: {output}")]
    ProcessListing { code: Option<i32>, output: String },

    #[error("Packet filtering is not supported on {0}")]
    UnsupportedPlatform(&'static str),

    #[error("Unable to create tls key/certificate: {0}")]
    Tls(String),

    #[error("Initialising data directory for {name} failed with return code {code:?}")]
    InitFailed { name: String, code: Option<i32> },

    #[error("Failed to launch {name}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// Found stopped when expected running, or exited nonzero without a kill
    #[error("{kind} {name} stopped unexpectedly with return code: {code:?}")]
    UnexpectedExit {
        kind: ProcessKind,
        name: String,
        code: Option<i32>,
    },

    #[error("Trying to start {0} while it is already running")]
    AlreadyRunning(String),

    #[error("{0} is not running")]
    NotRunning(String),

    /// The owning cluster or metacluster has already been dropped
    #[error("{0} is no longer attached to a cluster")]
    Detached(String),
}

#[derive(Debug, thiserror::Error)]
pub enum MembershipError {
    #[error("Process {process} is not a member of the source cluster")]
    NotInCluster { process: String },

    #[error("Cluster does not belong to this metacluster")]
    ForeignCluster,

    #[error("This cluster only has {len} servers, so index {index} is invalid")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("This cluster does not have a server named: {0}")]
    UnknownName(String),
}

#[derive(Debug, thiserror::Error)]
pub enum PartitionError {
    #[error("Failed to send `{op} {source_port} {dest_port}` to the partition daemon")]
    Send {
        op: &'static str,
        source_port: u16,
        dest_port: u16,
        #[source]
        source: std::io::Error,
    },

    /// Teardown check: blocked set differs from the cross-cluster pairing
    #[error("Blocked pairs out of sync: {missing:?} missing, {unexpected:?} unexpected")]
    Mismatch {
        missing: Vec<PartitionEntry>,
        unexpected: Vec<PartitionEntry>,
    },
}

impl Error {
    pub(crate) fn timeout(
        what: impl Into<String>,
        after: Duration,
    ) -> Self {
        Error::Timeout {
            what: what.into(),
            after,
        }
    }
}
