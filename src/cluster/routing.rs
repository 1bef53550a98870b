//! Which directed port pairs separate two processes.

use std::collections::BTreeSet;

use crate::PartitionEntry;

/// The two ports a process's cluster traffic can be seen on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteEndpoint {
    /// Port the process listens on for peers, discovered from its log
    pub cluster_port: u16,
    /// Fixed outgoing port, chosen before launch
    pub local_port: u16,
}

impl RouteEndpoint {
    pub fn new(
        cluster_port: u16,
        local_port: u16,
    ) -> Self {
        Self {
            cluster_port,
            local_port,
        }
    }

    fn ports(&self) -> [u16; 2] {
        [self.cluster_port, self.local_port]
    }
}

/// All 8 directed combinations of `a`'s ports with `b`'s ports, both ways
pub fn pairs_between(
    a: RouteEndpoint,
    b: RouteEndpoint,
) -> Vec<PartitionEntry> {
    let mut pairs = Vec::with_capacity(8);
    for from in a.ports() {
        for to in b.ports() {
            pairs.push(PartitionEntry::new(from, to));
            pairs.push(PartitionEntry::new(to, from));
        }
    }
    pairs
}

/// Blocked set implied by the membership: every pair between endpoints of
/// different groups, none within a group
pub fn expected_blocked(groups: &[Vec<RouteEndpoint>]) -> BTreeSet<PartitionEntry> {
    let mut expected = BTreeSet::new();
    for (i, group) in groups.iter().enumerate() {
        for other in &groups[i + 1..] {
            for a in group {
                for b in other {
                    expected.extend(pairs_between(*a, *b));
                }
            }
        }
    }
    expected
}
