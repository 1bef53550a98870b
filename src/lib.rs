//! Process orchestration and netsplit fault injection for exercising a
//! multi-node database under test.
//!
//! A [`HarnessSession`] owns one run. [`Metacluster`]s inside it hold
//! [`Cluster`]s of supervised [`Process`]es, and processes in different
//! clusters are kept apart through the partition daemon.
mod cluster;
mod config;
mod constants;
mod errors;
mod partition;
mod process;
mod session;
pub mod utils;

pub use cluster::*;
pub use self::config::*;
pub use errors::*;
pub use partition::*;
pub use process::*;
pub use session::*;
pub use utils::*;
