use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Weak;
use std::time::Duration;

use futures::future::try_join_all;
use parking_lot::RwLock;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::tls::prepare_tls;
use super::tls::CertificateGenerator;
use super::tls::SelfSignedGenerator;
use super::tls::TlsMaterial;
use super::tls::TlsSetting;
use super::Metacluster;
use super::MetaclusterInner;
use super::MetaclusterOptions;
use crate::file_io::ensure_directory;
use crate::HarnessSession;
use crate::MembershipError;
use crate::Process;
use crate::ProcessOptions;
use crate::ReadinessRecord;
use crate::Result;

/// Servers a new cluster starts with
#[derive(Debug, Clone)]
pub enum InitialServers {
    Count(usize),
    Names(Vec<String>),
}

impl Default for InitialServers {
    fn default() -> Self {
        InitialServers::Count(1)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClusterOptions {
    /// Default: the metacluster's folder
    pub output_folder: Option<PathBuf>,
    pub initial_servers: InitialServers,
    pub tls: TlsSetting,
    /// Template for the initial servers; its `name` and `kind` are ignored
    pub server_options: ProcessOptions,
    pub wait_until_ready: bool,
}

impl ClusterOptions {
    pub fn servers(count: usize) -> Self {
        Self {
            initial_servers: InitialServers::Count(count),
            wait_until_ready: true,
            ..Default::default()
        }
    }

    pub fn named(names: &[&str]) -> Self {
        Self {
            initial_servers: InitialServers::Names(names.iter().map(|n| n.to_string()).collect()),
            wait_until_ready: true,
            ..Default::default()
        }
    }
}

pub(crate) struct ClusterInner {
    /// The metacluster owns its clusters
    pub(crate) metacluster: Weak<MetaclusterInner>,
    pub(crate) processes: RwLock<Vec<Process>>,
    pub(crate) output_folder: PathBuf,
    pub(crate) tls: Option<TlsMaterial>,
    /// Held while a process decides whether to join or bootstrap
    pub(crate) start_lock: Arc<tokio::sync::Mutex<()>>,
}

/// A group of processes meant to reach each other.
///
/// Processes in different clusters of the same [`Metacluster`] are kept
/// partitioned from each other.
#[derive(Clone)]
pub struct Cluster {
    pub(crate) inner: Arc<ClusterInner>,
    metacluster: Metacluster,
}

impl std::fmt::Debug for Cluster {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Cluster")
            .field("output_folder", &self.inner.output_folder)
            .field("processes", &self.inner.processes.read().len())
            .finish()
    }
}

impl PartialEq for Cluster {
    fn eq(
        &self,
        other: &Self,
    ) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
impl Eq for Cluster {}

impl Cluster {
    /// Creates a cluster inside `metacluster` and starts its initial servers.
    pub async fn new(
        metacluster: &Metacluster,
        options: ClusterOptions,
    ) -> Result<Self> {
        Self::with_generator(metacluster, options, &SelfSignedGenerator).await
    }

    pub async fn with_generator(
        metacluster: &Metacluster,
        options: ClusterOptions,
        generator: &dyn CertificateGenerator,
    ) -> Result<Self> {
        let output_folder = match options.output_folder {
            Some(folder) => prepare_output_folder(folder)?,
            None => metacluster.path().to_path_buf(),
        };
        let tls = prepare_tls(&options.tls, &output_folder, generator)?;

        let cluster = Cluster {
            inner: Arc::new(ClusterInner {
                metacluster: Arc::downgrade(&metacluster.inner),
                processes: RwLock::new(vec![]),
                output_folder,
                tls,
                start_lock: Arc::new(tokio::sync::Mutex::new(())),
            }),
            metacluster: metacluster.clone(),
        };
        metacluster.register_cluster(&cluster).await?;

        let names: Vec<Option<String>> = match options.initial_servers {
            InitialServers::Count(n) => vec![None; n],
            InitialServers::Names(names) => names.into_iter().map(Some).collect(),
        };
        for name in names {
            let server_options = ProcessOptions {
                kind: crate::ProcessKind::Server,
                name,
                ..options.server_options.clone()
            };
            cluster.add_process(server_options, false).await?;
        }

        if options.wait_until_ready {
            let timeout = metacluster.session().config().process.startup_timeout();
            cluster.wait_until_ready(timeout).await?;
        }
        info!("cluster in {:?} with {} processes", cluster.output_folder(), cluster.len());
        Ok(cluster)
    }

    /// A cluster with a metacluster of its own
    pub async fn standalone(
        session: &HarnessSession,
        options: ClusterOptions,
    ) -> Result<Self> {
        let metacluster = Metacluster::new(session, MetaclusterOptions::default())?;
        Self::new(&metacluster, options).await
    }

    /// Handle to a cluster still held by its metacluster
    pub(crate) fn from_inner(inner: Arc<ClusterInner>) -> Option<Self> {
        let metacluster = Metacluster {
            inner: inner.metacluster.upgrade()?,
        };
        Some(Self { inner, metacluster })
    }

    pub fn metacluster(&self) -> &Metacluster {
        &self.metacluster
    }

    pub fn output_folder(&self) -> &Path {
        &self.inner.output_folder
    }

    pub fn tls(&self) -> Option<&TlsMaterial> {
        self.inner.tls.as_ref()
    }

    /// Snapshot of the members, in insertion order
    pub fn processes(&self) -> Vec<Process> {
        self.inner.processes.read().clone()
    }

    pub fn len(&self) -> usize {
        self.inner.processes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(
        &self,
        index: usize,
    ) -> Result<Process> {
        let processes = self.inner.processes.read();
        processes.get(index).cloned().ok_or_else(|| {
            MembershipError::IndexOutOfRange {
                index,
                len: processes.len(),
            }
            .into()
        })
    }

    /// Looks a member up by its reported name, falling back to the
    /// requested one
    pub fn find(
        &self,
        name: &str,
    ) -> Result<Process> {
        self.inner
            .processes
            .read()
            .iter()
            .find(|p| p.display_name() == name || p.desired_name() == name)
            .cloned()
            .ok_or_else(|| MembershipError::UnknownName(name.to_string()).into())
    }

    pub fn contains(
        &self,
        process: &Process,
    ) -> bool {
        self.inner.processes.read().contains(process)
    }

    /// Adds a member and starts it
    pub async fn add_process(
        &self,
        options: ProcessOptions,
        wait_until_ready: bool,
    ) -> Result<Process> {
        let process = Process::new(self, options)?;
        process.start(wait_until_ready).await?;
        Ok(process)
    }

    /// Fails on the first member that is not running
    pub fn check(&self) -> Result<()> {
        for process in self.processes() {
            process.check()?;
        }
        Ok(())
    }

    /// True when there is at least one member and all of them run
    pub fn is_running(&self) -> bool {
        let processes = self.processes();
        !processes.is_empty() && processes.iter().all(|p| p.is_running())
    }

    /// Waits on every member at once
    pub async fn wait_until_ready(
        &self,
        timeout: Duration,
    ) -> Result<Vec<ReadinessRecord>> {
        let processes = self.processes();
        try_join_all(processes.iter().map(|p| p.wait_until_ready(timeout))).await
    }

    /// Validates every member, then stops them all in a final pass even when
    /// a validation failed. Returns the first failure.
    pub async fn check_and_stop(&self) -> Result<()> {
        let processes = self.processes();
        let mut first_err = None;
        for process in &processes {
            if let Err(e) = process.check_and_stop().await {
                warn!("{} failed its exit check: {}", process.display_name(), e);
                first_err.get_or_insert(e);
            }
        }
        for process in &processes {
            if let Err(e) = process.stop().await {
                first_err.get_or_insert(e);
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Recomputes partitions for `targets` against the whole metacluster
    pub(crate) async fn update_routing(
        &self,
        targets: &[Process],
    ) -> Result<()> {
        self.metacluster.update_routing(targets).await
    }
}

/// An explicit folder is used if it is a directory, or created if its parent
/// exists.
fn prepare_output_folder(folder: PathBuf) -> Result<PathBuf> {
    ensure_directory(&folder)?;
    debug!("cluster output folder {:?}", folder);
    Ok(folder)
}
