use std::collections::BTreeSet;
use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;
use parking_lot::RwLock;
use tempfile::TempDir;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::routing::expected_blocked;
use super::routing::pairs_between;
use super::routing::RouteEndpoint;
use super::Cluster;
use super::ClusterInner;
use super::ClusterOptions;
use crate::file_io::ensure_directory;
use crate::HarnessSession;
use crate::MembershipError;
use crate::PartitionEntry;
use crate::PartitionError;
use crate::Process;
use crate::ProcessKind;
use crate::Result;

#[derive(Debug, Clone, Default)]
pub struct MetaclusterOptions {
    /// Default: `metacluster.output_folder` from the config, else a temporary
    /// directory removed on [`Metacluster::stop`]
    pub output_folder: Option<PathBuf>,
}

pub(crate) struct MetaclusterInner {
    session: HarnessSession,
    path: PathBuf,
    /// Dropped before `owned_dir` so processes die before their folder goes
    clusters: RwLock<Vec<Arc<ClusterInner>>>,
    owned_dir: Mutex<Option<TempDir>>,
    id_counters: Mutex<HashMap<ProcessKind, u64>>,
    had_multiple_clusters: AtomicBool,
    /// Serialises partition recomputation, held until the daemon requests
    /// of a pass are delivered
    routing_lock: Arc<tokio::sync::Mutex<()>>,
}

/// Clusters sharing one working directory and one partition domain
#[derive(Clone)]
pub struct Metacluster {
    pub(crate) inner: Arc<MetaclusterInner>,
}

impl std::fmt::Debug for Metacluster {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Metacluster").field("path", &self.inner.path).finish()
    }
}

impl Metacluster {
    pub fn new(
        session: &HarnessSession,
        options: MetaclusterOptions,
    ) -> Result<Self> {
        let output_folder = options
            .output_folder
            .or_else(|| session.config().metacluster.output_folder.clone());

        let (path, owned_dir) = match output_folder {
            Some(folder) => {
                ensure_directory(&folder)?;
                (folder, None)
            }
            None => {
                let dir = tempfile::Builder::new().prefix("metacluster_").tempdir()?;
                (dir.path().to_path_buf(), Some(dir))
            }
        };
        debug!("metacluster working directory: {:?}", path);

        Ok(Self {
            inner: Arc::new(MetaclusterInner {
                session: session.clone(),
                path,
                clusters: RwLock::new(vec![]),
                owned_dir: Mutex::new(owned_dir),
                id_counters: Mutex::new(HashMap::new()),
                had_multiple_clusters: AtomicBool::new(false),
                routing_lock: Arc::new(tokio::sync::Mutex::new(())),
            }),
        })
    }

    pub fn session(&self) -> &HarnessSession {
        &self.inner.session
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Shortcut for [`Cluster::new`]
    pub async fn add_cluster(
        &self,
        options: ClusterOptions,
    ) -> Result<Cluster> {
        Cluster::new(self, options).await
    }

    /// Every cluster created in this metacluster, oldest first
    pub fn clusters(&self) -> Vec<Cluster> {
        self.inner
            .clusters
            .read()
            .iter()
            .filter_map(|inner| Cluster::from_inner(inner.clone()))
            .collect()
    }

    /// Sequential ids per process kind, used for generated names
    pub fn get_new_unique_id(
        &self,
        kind: ProcessKind,
    ) -> u64 {
        let mut counters = self.inner.id_counters.lock();
        let counter = counters.entry(kind).or_insert(0);
        let id = *counter;
        *counter += 1;
        id
    }

    fn owns(
        &self,
        cluster: &Cluster,
    ) -> bool {
        Arc::ptr_eq(&cluster.metacluster().inner, &self.inner)
    }

    pub(crate) async fn register_cluster(
        &self,
        cluster: &Cluster,
    ) -> Result<()> {
        let live = self.inner.clusters.read().len() + 1;

        if live > 1 && !self.inner.had_multiple_clusters.load(Ordering::Acquire) {
            // from here on clusters must be kept apart
            self.inner
                .session
                .with_partitions(|partitions| partitions.ensure_available())
                .await?;
            self.inner.had_multiple_clusters.store(true, Ordering::Release);
            info!("metacluster now holds {} clusters, partitioning enabled", live);
        }
        self.inner.clusters.write().push(cluster.inner.clone());
        Ok(())
    }

    /// Moves `processes` from `source` to `dest` and re-partitions them.
    ///
    /// Membership changes only; nothing is re-joined.
    pub async fn move_processes(
        &self,
        source: &Cluster,
        dest: &Cluster,
        processes: &[Process],
    ) -> Result<()> {
        if !self.owns(source) || !self.owns(dest) {
            return Err(MembershipError::ForeignCluster.into());
        }
        for process in processes {
            if !source.contains(process) {
                return Err(MembershipError::NotInCluster {
                    process: process.display_name(),
                }
                .into());
            }
        }

        for process in processes {
            source.inner.processes.write().retain(|p| p != process);
            dest.inner.processes.write().push(process.clone());
            process.set_cluster(&dest.inner);
            debug!("moved {} to cluster {:?}", process.display_name(), dest.output_folder());
        }

        self.update_routing(processes).await
    }

    /// Blocks `targets` from every ready process of another cluster and
    /// unblocks them from everyone else.
    pub(crate) async fn update_routing(
        &self,
        targets: &[Process],
    ) -> Result<()> {
        if !self.inner.had_multiple_clusters.load(Ordering::Acquire) {
            return Ok(());
        }
        let guard = self.inner.routing_lock.clone().lock_owned().await;
        let mut plan: Vec<(bool, Vec<PartitionEntry>)> = vec![];

        let everyone: Vec<(Process, Arc<ClusterInner>)> = self
            .clusters()
            .into_iter()
            .flat_map(|c| {
                c.processes()
                    .into_iter()
                    .map(move |p| (p, c.inner.clone()))
                    .collect::<Vec<_>>()
            })
            .collect();

        for target in targets {
            let Some(cluster_port) = target.discovered().cluster_port else {
                continue;
            };
            let own = RouteEndpoint::new(cluster_port, target.local_cluster_port());
            let own_cluster = target.cluster_inner();
            let target_ready = target.is_ready();

            for (peer, peer_cluster) in &everyone {
                if peer == target || !peer.is_ready() {
                    continue;
                }
                let Some(peer_port) = peer.discovered().cluster_port else {
                    continue;
                };
                let pairs = pairs_between(own, RouteEndpoint::new(peer_port, peer.local_cluster_port()));

                let separated = target_ready
                    && own_cluster
                        .as_ref()
                        .is_some_and(|own_cluster| !Arc::ptr_eq(own_cluster, peer_cluster));
                plan.push((separated, pairs));
            }
        }

        self.inner
            .session
            .with_partitions(move |partitions| {
                let _guard = guard;
                for (separated, pairs) in plan {
                    if separated {
                        partitions.block_paths(pairs)?;
                    } else {
                        partitions.unblock_paths(pairs)?;
                    }
                }
                Ok(())
            })
            .await
    }

    /// Blocked set the current membership calls for
    pub fn expected_blocked_pairs(&self) -> BTreeSet<PartitionEntry> {
        if !self.inner.had_multiple_clusters.load(Ordering::Acquire) {
            return BTreeSet::new();
        }
        let groups: Vec<Vec<RouteEndpoint>> = self
            .clusters()
            .iter()
            .map(|cluster| {
                cluster
                    .processes()
                    .iter()
                    .filter(|p| p.is_ready())
                    .filter_map(|p| {
                        p.discovered()
                            .cluster_port
                            .map(|port| RouteEndpoint::new(port, p.local_cluster_port()))
                    })
                    .collect()
            })
            .collect();
        expected_blocked(&groups)
    }

    /// Compares the blocked set with what membership calls for
    pub async fn verify_partitions(&self) -> Result<()> {
        let _guard = self.inner.routing_lock.lock().await;
        let expected = self.expected_blocked_pairs();
        let actual = self.inner.session.partitions().blocked_pairs();
        if expected == actual {
            return Ok(());
        }

        Err(PartitionError::Mismatch {
            missing: expected.difference(&actual).copied().collect(),
            unexpected: actual.difference(&expected).copied().collect(),
        }
        .into())
    }

    /// Check-stops every cluster, verifies the partitions and removes an
    /// owned working directory. Everything runs even after a failure; the
    /// first failure is returned.
    pub async fn stop(&self) -> Result<()> {
        let mut first_err = None;
        for cluster in self.clusters() {
            if let Err(e) = cluster.check_and_stop().await {
                error!("cluster {:?} did not stop cleanly: {}", cluster.output_folder(), e);
                first_err.get_or_insert(e);
            }
        }

        if let Err(e) = self.verify_partitions().await {
            warn!("{}", e);
            first_err.get_or_insert(e);
        }

        let owned = self.inner.owned_dir.lock().take();
        if let Some(dir) = owned {
            debug!("removing {:?}", dir.path());
            if let Err(e) = dir.close() {
                first_err.get_or_insert(e.into());
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
