//! Clusters of supervised processes and the partitions between them.
mod cluster;
mod metacluster;
mod routing;
mod tls;
pub use cluster::*;
pub use metacluster::*;
pub use routing::*;
pub use tls::*;
