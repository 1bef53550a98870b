use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::Weak;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::killpg;
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use parking_lot::Mutex;
use parking_lot::RwLock;
use tokio::process::Child;
use tokio::process::Command;
use tokio::sync::watch;
use tokio::sync::OwnedMutexGuard;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio::time::Instant;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::console::Console;
use super::console::ConsoleOutput;
use super::layout::desired_name;
use super::layout::resolve_layout;
use super::log_line::parse_log_line;
use super::log_line::LogEvent;
use super::log_line::PortKind;
use super::log_tailer::LogTailer;
use super::variant::has_option;
use super::variant::take_option;
use super::variant::LaunchContext;
use super::variant::ProcessKind;
use super::variant::ProcessVariant;
use crate::cluster::ClusterInner;
use crate::constants::DEFAULT_LOG_FILE;
use crate::constants::MACOS_TLS_CIPHERS;
use crate::constants::MACOS_TLS_MIN_PROTOCOL;
use crate::file_io::resolve_executable;
use crate::net::get_available_port;
use crate::net::join_address;
use crate::time::get_now_as_u128;
use crate::Cluster;
use crate::Error;
use crate::HarnessSession;
use crate::ProcessConfig;
use crate::ProcessError;
use crate::Result;
use crate::SetupError;

/// Lifecycle of one supervised OS process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Unstarted,
    Starting,
    Ready,
    Failed,
    Stopping,
    Stopped,
    Killed,
}

/// Runtime identity scraped from the log. Every field is written at most once
/// per start and reset on stop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Discovered {
    pub cluster_port: Option<u16>,
    pub driver_port: Option<u16>,
    pub http_port: Option<u16>,
    pub name: Option<String>,
    pub uuid: Option<String>,
    pub ready_line: bool,
}

impl Discovered {
    pub(crate) fn apply(
        &mut self,
        event: LogEvent,
    ) -> bool {
        fn set_once<T: PartialEq + std::fmt::Debug>(
            slot: &mut Option<T>,
            value: T,
        ) -> bool {
            match slot {
                None => {
                    *slot = Some(value);
                    true
                }
                Some(existing) => {
                    if *existing != value {
                        warn!("ignoring rediscovered value {:?}, keeping {:?}", value, existing);
                    }
                    false
                }
            }
        }

        match event {
            LogEvent::Listening { kind, port } => match kind {
                PortKind::Cluster => set_once(&mut self.cluster_port, port),
                PortKind::Driver => set_once(&mut self.driver_port, port),
                PortKind::Http => set_once(&mut self.http_port, port),
            },
            LogEvent::ServerId { uuid } => set_once(&mut self.uuid, uuid),
            LogEvent::Ready { name, uuid } => {
                let mut changed = !self.ready_line;
                self.ready_line = true;
                if let Some(name) = name {
                    changed |= set_once(&mut self.name, name);
                }
                if let Some(uuid) = uuid {
                    changed |= set_once(&mut self.uuid, uuid);
                }
                changed
            }
        }
    }

    pub(crate) fn all_ports(&self) -> Option<(u16, u16, u16)> {
        Some((self.cluster_port?, self.driver_port?, self.http_port?))
    }
}

/// Everything known about a process once it reported ready
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessRecord {
    pub name: Option<String>,
    pub uuid: Option<String>,
    pub cluster_port: u16,
    pub driver_port: u16,
    pub http_port: u16,
    pub local_cluster_port: u16,
    pub pid: u32,
}

/// How to build a [`Process`]. Unset fields fall back to the session's
/// [`ProcessConfig`].
#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    pub kind: ProcessKind,
    /// See [`Cluster::add_process`] for how names map to data directories
    pub name: Option<String>,
    /// Default: `console.txt` inside the data directory
    pub console_output: Option<ConsoleOutput>,
    pub executable_path: Option<PathBuf>,
    pub command_prefix: Option<Vec<String>>,
    pub server_tags: Option<Vec<String>>,
    pub extra_options: Option<Vec<String>>,
}

impl ProcessOptions {
    pub fn server() -> Self {
        Self::default()
    }

    pub fn proxy() -> Self {
        Self {
            kind: ProcessKind::Proxy,
            ..Default::default()
        }
    }

    pub fn name(
        mut self,
        name: impl Into<String>,
    ) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn console_output(
        mut self,
        output: ConsoleOutput,
    ) -> Self {
        self.console_output = Some(output);
        self
    }

    pub fn executable_path(
        mut self,
        path: impl Into<PathBuf>,
    ) -> Self {
        self.executable_path = Some(path.into());
        self
    }

    pub fn server_tags(
        mut self,
        tags: Vec<String>,
    ) -> Self {
        self.server_tags = Some(tags);
        self
    }

    pub fn extra_options(
        mut self,
        options: Vec<String>,
    ) -> Self {
        self.extra_options = Some(options);
        self
    }
}

struct Runtime {
    state: ProcessState,
    child: Option<Child>,
    pid: Option<u32>,
    /// Signal deaths are recorded as the negated signal number
    exit_code: Option<i32>,
    killed: bool,
    tailer: Option<JoinHandle<()>>,
    launch_args: Vec<String>,
}

pub(crate) struct ProcessInner {
    variant: Box<dyn ProcessVariant>,
    desired_name: String,
    data_dir: PathBuf,
    log_path: PathBuf,
    local_cluster_port: u16,
    /// command prefix followed by the executable
    program: Vec<String>,
    options: Vec<String>,
    server_tags: Vec<String>,
    config: ProcessConfig,
    cluster: RwLock<Weak<ClusterInner>>,
    console: Mutex<Console>,
    runtime: Mutex<Runtime>,
    discovered: watch::Sender<Discovered>,
}

/// One supervised server or proxy.
///
/// Cheap to clone; clones share state. The OS process group is force-killed
/// when the last handle is dropped while it still runs.
#[derive(Clone)]
pub struct Process {
    pub(crate) inner: Arc<ProcessInner>,
}

impl std::fmt::Debug for Process {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Process")
            .field("kind", &self.kind())
            .field("name", &self.inner.desired_name)
            .field("state", &self.state())
            .finish()
    }
}

impl PartialEq for Process {
    fn eq(
        &self,
        other: &Self,
    ) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
impl Eq for Process {}

impl Process {
    /// Builds the process and adds it to `cluster` without starting it.
    pub(crate) fn new(
        cluster: &Cluster,
        options: ProcessOptions,
    ) -> Result<Self> {
        let metacluster = cluster.metacluster();
        let config = metacluster.session().config().process.clone();
        let kind = options.kind;

        let layout = resolve_layout(
            options.name.as_deref(),
            || format!("{}_{}", kind.as_str(), metacluster.get_new_unique_id(kind)),
            cluster.output_folder(),
        )?;

        let console = match options.console_output {
            Some(output) => Console::new(output),
            None => Console::in_data_dir(&layout.data_dir),
        };

        let executable =
            resolve_executable(options.executable_path.as_ref().unwrap_or(&config.executable_path))?;
        let mut program = options
            .command_prefix
            .unwrap_or_else(|| config.command_prefix.clone());
        program.push(executable.display().to_string());

        let mut extra = options
            .extra_options
            .unwrap_or_else(|| config.extra_options.clone());

        let mut opts = vec![];
        if !has_option(&extra, "--bind") {
            opts.extend(["--bind".to_string(), config.bind.clone()]);
        }
        for port_option in ["--cluster-port", "--driver-port", "--http-port"] {
            if !has_option(&extra, port_option) {
                opts.extend([port_option.to_string(), "0".to_string()]);
            }
        }

        let log_path = match take_option(&mut extra, "--log-file") {
            Some(path) => {
                let path = PathBuf::from(path);
                if path.is_absolute() {
                    path
                } else {
                    std::env::current_dir()?.join(path)
                }
            }
            None => layout
                .existing_log
                .clone()
                .unwrap_or_else(|| layout.data_dir.join(DEFAULT_LOG_FILE)),
        };
        opts.extend(extra);

        let variant = kind.variant(config.cache_size_mb);
        variant.build_launch_args(&mut opts)?;

        let process = Process {
            inner: Arc::new(ProcessInner {
                variant,
                desired_name: desired_name(&layout.name),
                data_dir: layout.data_dir,
                log_path,
                local_cluster_port: get_available_port()?,
                program,
                options: opts,
                server_tags: options
                    .server_tags
                    .unwrap_or_else(|| config.server_tags.clone()),
                config,
                cluster: RwLock::new(Arc::downgrade(&cluster.inner)),
                console: Mutex::new(console),
                runtime: Mutex::new(Runtime {
                    state: ProcessState::Unstarted,
                    child: None,
                    pid: None,
                    exit_code: None,
                    killed: false,
                    tailer: None,
                    launch_args: vec![],
                }),
                discovered: watch::channel(Discovered::default()).0,
            }),
        };

        cluster.inner.processes.write().push(process.clone());
        debug!(
            "{} {} created in {:?}",
            kind, process.inner.desired_name, process.inner.data_dir
        );
        Ok(process)
    }

    // -
    // Static properties

    pub fn kind(&self) -> ProcessKind {
        self.inner.variant.kind()
    }

    pub fn desired_name(&self) -> &str {
        &self.inner.desired_name
    }

    pub fn data_dir(&self) -> &Path {
        &self.inner.data_dir
    }

    pub fn log_path(&self) -> &Path {
        &self.inner.log_path
    }

    /// Fixed outbound port for cluster traffic, known before start
    pub fn local_cluster_port(&self) -> u16 {
        self.inner.local_cluster_port
    }

    pub fn host(&self) -> &str {
        &self.inner.config.host
    }

    /// Owning cluster, if it still exists
    pub fn cluster(&self) -> Option<Cluster> {
        self.cluster_inner().and_then(Cluster::from_inner)
    }

    pub(crate) fn cluster_inner(&self) -> Option<Arc<ClusterInner>> {
        self.inner.cluster.read().upgrade()
    }

    pub(crate) fn set_cluster(
        &self,
        cluster: &Arc<ClusterInner>,
    ) {
        *self.inner.cluster.write() = Arc::downgrade(cluster);
    }

    fn session(&self) -> Option<HarnessSession> {
        self.cluster().map(|c| c.metacluster().session().clone())
    }

    /// Best name for messages: reported name, else the requested one
    pub fn display_name(&self) -> String {
        self.inner
            .discovered
            .borrow()
            .name
            .clone()
            .unwrap_or_else(|| self.inner.desired_name.clone())
    }

    // -
    // Runtime state

    pub fn state(&self) -> ProcessState {
        self.inner.runtime.lock().state
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.inner.runtime.lock().exit_code
    }

    pub fn was_killed(&self) -> bool {
        self.inner.runtime.lock().killed
    }

    /// Argument vector of the most recent launch
    pub fn launch_args(&self) -> Vec<String> {
        self.inner.runtime.lock().launch_args.clone()
    }

    pub fn pid(&self) -> Result<u32> {
        if !self.is_running() {
            return Err(ProcessError::NotRunning(self.display_name()).into());
        }
        self.inner
            .runtime
            .lock()
            .pid
            .ok_or_else(|| ProcessError::NotRunning(self.display_name()).into())
    }

    /// Once an exit has been observed the process stays not-running until the
    /// next start.
    pub fn is_running(&self) -> bool {
        let mut guard = self.inner.runtime.lock();
        let rt = &mut *guard;
        if rt.exit_code.is_some() {
            return false;
        }
        let Some(child) = rt.child.as_mut() else {
            return false;
        };
        match child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                let code = exit_code_of(status);
                debug!("{} exited with {}", self.inner.desired_name, code);
                rt.exit_code = Some(code);
                if matches!(rt.state, ProcessState::Starting | ProcessState::Ready) {
                    rt.state = ProcessState::Failed;
                }
                false
            }
            Err(e) => {
                // handle lost, treated like a clean exit
                warn!("unable to poll {}, assuming it exited: {}", self.inner.desired_name, e);
                rt.exit_code = Some(0);
                if matches!(rt.state, ProcessState::Starting | ProcessState::Ready) {
                    rt.state = ProcessState::Failed;
                }
                false
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        if !self.is_running() {
            return false;
        }
        let discovered = self.inner.discovered.borrow();
        discovered.ready_line && discovered.all_ports().is_some()
    }

    /// Snapshot of what the log has revealed so far
    pub fn discovered(&self) -> Discovered {
        self.inner.discovered.borrow().clone()
    }

    /// Complete once the log tailer has finished its startup work
    fn readiness(&self) -> Option<ReadinessRecord> {
        if !self.is_ready() {
            return None;
        }
        let pid = {
            let rt = self.inner.runtime.lock();
            if rt.state != ProcessState::Ready {
                return None;
            }
            rt.pid?
        };
        let d = self.inner.discovered.borrow();
        let (cluster_port, driver_port, http_port) = d.all_ports()?;
        Some(ReadinessRecord {
            name: d.name.clone(),
            uuid: d.uuid.clone(),
            cluster_port,
            driver_port,
            http_port,
            local_cluster_port: self.inner.local_cluster_port,
            pid,
        })
    }

    fn unexpected_exit(&self) -> Error {
        ProcessError::UnexpectedExit {
            kind: self.kind(),
            name: self.display_name(),
            code: self.exit_code(),
        }
        .into()
    }

    /// Fails if the process is not running
    pub fn check(&self) -> Result<()> {
        if !self.is_running() {
            return Err(self.unexpected_exit());
        }
        Ok(())
    }

    // -
    // Identity accessors: block until discovered, bounded by the startup timeout

    pub async fn cluster_port(&self) -> Result<u16> {
        self.wait_for_value("cluster port", |d| d.cluster_port).await
    }

    pub async fn driver_port(&self) -> Result<u16> {
        self.wait_for_value("driver port", |d| d.driver_port).await
    }

    pub async fn http_port(&self) -> Result<u16> {
        self.wait_for_value("http port", |d| d.http_port).await
    }

    pub async fn name(&self) -> Result<String> {
        self.wait_for_value("name", |d| d.name.clone()).await
    }

    pub async fn uuid(&self) -> Result<String> {
        self.wait_for_value("uuid", |d| d.uuid.clone()).await
    }

    async fn wait_for_value<T>(
        &self,
        what: &str,
        pick: impl Fn(&Discovered) -> Option<T>,
    ) -> Result<T> {
        let timeout = self.inner.config.startup_timeout();
        let poll = self.inner.config.value_poll_interval();
        let deadline = Instant::now() + timeout;
        let mut rx = self.inner.discovered.subscribe();

        loop {
            let value = pick(&rx.borrow_and_update());
            if let Some(value) = value {
                return Ok(value);
            }
            self.check()?;

            let now = Instant::now();
            if now >= deadline {
                return Err(Error::timeout(
                    format!("{} value of {}", what, self.inner.desired_name),
                    timeout,
                ));
            }
            // woken early by new discoveries, at the latest after one interval
            let _ = tokio::time::timeout(poll.min(deadline - now), rx.changed()).await;
        }
    }

    /// Polls until the process is ready. Fails if it exits first, or with a
    /// timeout naming the process once `timeout` has fully elapsed.
    pub async fn wait_until_ready(
        &self,
        timeout: Duration,
    ) -> Result<ReadinessRecord> {
        let poll = self.inner.config.ready_poll_interval();
        let deadline = Instant::now() + timeout;
        loop {
            self.check()?;
            if let Some(record) = self.readiness() {
                return Ok(record);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(Error::timeout(
                    format!("startup of {}", self.inner.desired_name),
                    timeout,
                ));
            }
            sleep(poll.min(deadline - now)).await;
        }
    }

    // -
    // Lifecycle

    fn launch_context(&self) -> LaunchContext<'_> {
        LaunchContext {
            data_dir: &self.inner.data_dir,
            log_path: &self.inner.log_path,
            desired_name: &self.inner.desired_name,
            server_tags: &self.inner.server_tags,
        }
    }

    /// Spawns the process in its own process group and starts tailing its log.
    ///
    /// With no ready sibling to `--join`, the cluster's start lock stays held
    /// until this process is ready or gives up, so only one bootstrap process
    /// per cluster is ever deciding at a time.
    pub async fn start(
        &self,
        wait_until_ready: bool,
    ) -> Result<()> {
        if self.is_running() {
            return Err(ProcessError::AlreadyRunning(self.display_name()).into());
        }
        let cluster = self
            .cluster()
            .ok_or_else(|| ProcessError::Detached(self.display_name()))?;

        {
            let mut rt = self.inner.runtime.lock();
            // left over from a run that exited without stop()
            if let Some(tailer) = rt.tailer.take() {
                tailer.abort();
            }
            rt.exit_code = None;
            rt.killed = false;
            rt.child = None;
            rt.pid = None;
            rt.state = ProcessState::Starting;
        }
        self.inner.discovered.send_replace(Discovered::default());

        let mut args = self.inner.program.clone();
        args.extend(self.inner.options.iter().cloned());

        if !has_option(&args, "--client-port") {
            args.extend(["--client-port".to_string(), self.inner.local_cluster_port.to_string()]);
        }

        if let Some(tls) = cluster.tls() {
            let key = tls.key_path.display().to_string();
            let cert = tls.cert_path.display().to_string();
            for (flag, value) in [
                ("--http-tls-key", &key),
                ("--http-tls-cert", &cert),
                ("--driver-tls-key", &key),
                ("--driver-tls-cert", &cert),
                ("--cluster-tls-key", &key),
                ("--cluster-tls-cert", &cert),
                ("--cluster-tls-ca", &cert),
            ] {
                args.extend([flag.to_string(), value.clone()]);
            }
            if cfg!(target_os = "macos") {
                args.extend([
                    "--tls-min-protocol".to_string(),
                    MACOS_TLS_MIN_PROTOCOL.to_string(),
                    "--tls-ciphers".to_string(),
                    MACOS_TLS_CIPHERS.to_string(),
                ]);
            }
        }

        args.extend(["--log-file".to_string(), self.inner.log_path.display().to_string()]);

        let existing_log_len = tokio::fs::metadata(&self.inner.log_path)
            .await
            .map(|m| m.len())
            .unwrap_or(0);

        if let Some(init_args) = self.inner.variant.initialization_args(&self.launch_context()) {
            if let Err(e) = self.initialize(init_args).await {
                self.inner.runtime.lock().state = ProcessState::Failed;
                return Err(e);
            }
        }

        // -- pick a peer to join, or become the bootstrap root
        let start_lock = cluster.inner.start_lock.clone().lock_owned().await;
        let peer = cluster
            .processes()
            .into_iter()
            .find(|p| p != self && p.is_ready());
        let bootstrap_guard: Option<OwnedMutexGuard<()>> = match peer {
            Some(peer) => {
                if let Some(port) = peer.discovered().cluster_port {
                    args.extend(["--join".to_string(), join_address(peer.host(), port)]);
                }
                drop(start_lock);
                None
            }
            None => Some(start_lock),
        };

        self.inner.variant.post_process_args(&self.launch_context(), &mut args);

        if let Err(e) = self.spawn(args, existing_log_len, bootstrap_guard) {
            error!("failed to launch {}: {}", self.inner.desired_name, e);
            let _ = self.stop().await;
            self.inner.runtime.lock().state = ProcessState::Failed;
            return Err(e);
        }

        if wait_until_ready {
            self.wait_until_ready(self.inner.config.startup_timeout()).await?;
        }
        Ok(())
    }

    async fn initialize(
        &self,
        init_args: Vec<String>,
    ) -> Result<()> {
        let (stdout, stderr, piped) = {
            let console = self.inner.console.lock();
            console.note(&format!(
                "Creating data directory at {} ({})",
                self.inner.data_dir.display(),
                get_now_as_u128()
            ))?;
            console.stdio()?
        };

        let mut command = self.inner.program.clone();
        command.extend(init_args);
        info!("initialising {}: {}", self.inner.desired_name, command.join(" "));

        let mut child = Command::new(&command[0]);
        child
            .args(&command[1..])
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr);
        let spawn_err = |source| SetupError::Spawn {
            name: self.inner.desired_name.clone(),
            source,
        };

        let status = if piped {
            let output = child.output().await.map_err(spawn_err)?;
            let console = self.inner.console.lock();
            for line in String::from_utf8_lossy(&output.stdout)
                .lines()
                .chain(String::from_utf8_lossy(&output.stderr).lines())
            {
                console.note(line)?;
            }
            output.status
        } else {
            child.status().await.map_err(spawn_err)?
        };

        if !status.success() {
            return Err(SetupError::InitFailed {
                name: self.inner.desired_name.clone(),
                code: status.code(),
            }
            .into());
        }
        Ok(())
    }

    fn spawn(
        &self,
        args: Vec<String>,
        existing_log_len: u64,
        bootstrap_guard: Option<OwnedMutexGuard<()>>,
    ) -> Result<()> {
        let mut console = self.inner.console.lock();
        console.note(&format!(
            "Launching at {}:\n\t{}",
            get_now_as_u128(),
            args.join(" ")
        ))?;
        let (stdout, stderr, piped) = console.stdio()?;

        let mut child = Command::new(&args[0])
            .args(&args[1..])
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .process_group(0)
            .spawn()
            .map_err(|source| SetupError::Spawn {
                name: self.inner.desired_name.clone(),
                source,
            })?;

        if piped {
            if let Some(out) = child.stdout.take() {
                console.forward(out);
            }
            if let Some(err) = child.stderr.take() {
                console.forward(err);
            }
        }
        console.promote();
        drop(console);

        let pid = child.id();
        info!(
            "launched {} {} (pid {:?}{})",
            self.kind(),
            self.inner.desired_name,
            pid,
            if bootstrap_guard.is_some() { ", bootstrap" } else { "" }
        );

        let tailer = tokio::spawn(tail_log(self.clone(), existing_log_len, bootstrap_guard));
        {
            let mut rt = self.inner.runtime.lock();
            rt.child = Some(child);
            rt.pid = pid;
            rt.launch_args = args;
            rt.tailer = Some(tailer);
        }

        if let Some(session) = self.session() {
            session.register(self);
        }
        Ok(())
    }

    /// Records one parsed log line
    fn apply(
        &self,
        event: LogEvent,
    ) {
        self.inner.discovered.send_if_modified(|d| d.apply(event));
    }

    /// Gracefully shuts the process down: SIGTERM to the group, then SIGKILL
    /// after the grace period. Discovered identity is always cleared and the
    /// partition routes recomputed.
    pub async fn stop(&self) -> Result<()> {
        let (child, pid) = {
            let mut rt = self.inner.runtime.lock();
            if let Some(tailer) = rt.tailer.take() {
                tailer.abort();
            }
            if rt.child.is_some() && rt.exit_code.is_none() {
                rt.state = ProcessState::Stopping;
            }
            (rt.child.take(), rt.pid)
        };

        if let Some(mut child) = child {
            let already_exited = self.inner.runtime.lock().exit_code.is_some();
            if !already_exited {
                let code = self.terminate(&mut child, pid, self.inner.config.stop_grace_period()).await;
                self.inner.runtime.lock().exit_code = Some(code);
            }
            info!(
                "stopped {} {} with return code {:?}",
                self.kind(),
                self.inner.desired_name,
                self.exit_code()
            );
        }

        if let Some(session) = self.session() {
            session.deregister(self);
        }

        // routes are computed from the ports, so before clearing them
        let routing = match self.cluster() {
            Some(cluster) => cluster.update_routing(std::slice::from_ref(self)).await,
            None => Ok(()),
        };

        self.inner.discovered.send_replace(Discovered::default());
        {
            let mut rt = self.inner.runtime.lock();
            rt.state = match rt.state {
                ProcessState::Unstarted => ProcessState::Unstarted,
                _ if rt.killed => ProcessState::Killed,
                _ => ProcessState::Stopped,
            };
        }
        routing
    }

    async fn terminate(
        &self,
        child: &mut Child,
        pid: Option<u32>,
        grace: Duration,
    ) -> i32 {
        if let Ok(Some(status)) = child.try_wait() {
            return exit_code_of(status);
        }

        if let Some(pid) = pid {
            signal_group(pid, Signal::SIGTERM);
        }
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => return exit_code_of(status),
            Ok(Err(e)) => {
                warn!(
                    "lost the connection to {} {}, assuming it closed cleanly: {}",
                    self.kind(),
                    self.inner.desired_name,
                    e
                );
                return 0;
            }
            Err(_) => {
                warn!(
                    "{} did not exit within {:?}, killing",
                    self.inner.desired_name, grace
                );
            }
        }

        if let Some(pid) = pid {
            signal_group(pid, Signal::SIGKILL);
        }
        match child.wait().await {
            Ok(status) => exit_code_of(status),
            Err(e) => {
                warn!(
                    "lost the connection to {} {}, assuming it closed cleanly: {}",
                    self.kind(),
                    self.inner.desired_name,
                    e
                );
                0
            }
        }
    }

    /// Terminates the process group immediately. The resulting exit code is
    /// not reported as a failure later.
    pub async fn kill(&self) -> Result<()> {
        self.check()?;

        let (child, pid) = {
            let mut rt = self.inner.runtime.lock();
            (rt.child.take(), rt.pid)
        };
        if let Some(pid) = pid {
            signal_group(pid, Signal::SIGKILL);
        }
        let code = match child {
            Some(mut child) => match child.wait().await {
                Ok(status) => exit_code_of(status),
                Err(e) => {
                    warn!("lost the connection to {}: {}", self.inner.desired_name, e);
                    0
                }
            },
            None => 0,
        };
        {
            let mut rt = self.inner.runtime.lock();
            rt.exit_code = Some(code);
            rt.killed = true;
        }
        info!("killed {} {}", self.kind(), self.inner.desired_name);

        self.stop().await
    }

    /// Verifies the process was running and ends with code 0 (or was killed),
    /// then stops it. The stop runs even when the verification fails.
    pub async fn check_and_stop(&self) -> Result<()> {
        let verdict = self.verify_and_stop().await;
        let cleanup = self.stop().await;
        verdict.and(cleanup)
    }

    async fn verify_and_stop(&self) -> Result<()> {
        if self.is_running() {
            self.check()?;
            self.stop().await?;
        }
        let (killed, code) = {
            let rt = self.inner.runtime.lock();
            (rt.killed, rt.exit_code)
        };
        if !killed && code != Some(0) {
            return Err(self.unexpected_exit());
        }
        Ok(())
    }

    /// Console output captured so far (file-backed consoles only)
    pub fn console_output(&self) -> String {
        self.inner.console.lock().contents()
    }

    /// Synchronous last-resort cleanup used from `Drop`
    pub(crate) fn force_kill_group(&self) {
        let mut rt = self.inner.runtime.lock();
        if rt.child.is_some() && rt.exit_code.is_none() {
            if let Some(pid) = rt.pid {
                signal_group(pid, Signal::SIGKILL);
            }
            rt.killed = true;
            rt.state = ProcessState::Killed;
        }
    }
}

impl Drop for ProcessInner {
    fn drop(&mut self) {
        let rt = self.runtime.get_mut();
        if let Some(tailer) = rt.tailer.take() {
            tailer.abort();
        }
        if rt.child.is_some() && rt.exit_code.is_none() {
            if let Some(pid) = rt.pid {
                warn!("{} dropped while running, killing its process group", self.desired_name);
                signal_group(pid, Signal::SIGKILL);
            }
        }
    }
}

/// Follows the log until ready, exit or timeout, then releases a held
/// bootstrap lock and recomputes partitions.
async fn tail_log(
    process: Process,
    offset: u64,
    bootstrap_guard: Option<OwnedMutexGuard<()>>,
) {
    let mut tailer = LogTailer::new(process.log_path(), offset);
    let outcome = follow_log(&process, &mut tailer).await;
    drop(bootstrap_guard);

    if let Some(cluster) = process.cluster() {
        if let Err(e) = cluster.update_routing(std::slice::from_ref(&process)).await {
            error!("partition update after {} started failed: {}", process.desired_name(), e);
        }
    }

    match outcome {
        Ok(true) => {
            // partitions are in place before anyone sees the process ready
            let mut rt = process.inner.runtime.lock();
            if rt.state == ProcessState::Starting {
                rt.state = ProcessState::Ready;
            }
            drop(rt);
            info!("{} {} is ready", process.kind(), process.display_name());
        }
        Ok(false) => {
            warn!("{} exited before becoming ready", process.desired_name());
        }
        Err(e) => {
            warn!("stopped tailing {:?}: {}", process.log_path(), e);
        }
    }
}

/// `Ok(true)` once ready, `Ok(false)` if the process exited first
async fn follow_log(
    process: &Process,
    tailer: &mut LogTailer,
) -> Result<bool> {
    let config = &process.inner.config;
    let timeout = config.startup_timeout();
    let deadline = Instant::now() + timeout;

    while !tailer.exists().await {
        if !process.is_running() {
            return Ok(false);
        }
        if Instant::now() >= deadline {
            return Err(Error::timeout(
                format!("the log file to appear at {}", tailer.path().display()),
                timeout,
            ));
        }
        sleep(config.log_appear_poll_interval()).await;
    }

    loop {
        let lines = tailer.read_new_lines().await?;
        if lines.is_empty() {
            if process.is_ready() {
                return Ok(true);
            }
            if !process.is_running() {
                return Ok(false);
            }
            if Instant::now() >= deadline {
                return Err(Error::timeout(
                    format!("ports in the log of {}", process.desired_name()),
                    timeout,
                ));
            }
            sleep(config.log_poll_interval()).await;
            continue;
        }

        for line in lines {
            if let Some(event) = parse_log_line(&line) {
                debug!("{}: {:?}", process.desired_name(), event);
                process.apply(event);
            }
        }
    }
}

pub(crate) fn exit_code_of(status: ExitStatus) -> i32 {
    status
        .code()
        .unwrap_or_else(|| -status.signal().unwrap_or_default())
}

/// Signals a whole process group; a group that is already gone is not an error
pub(crate) fn signal_group(
    pid: u32,
    signal: Signal,
) {
    match killpg(Pid::from_raw(pid as i32), signal) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!("failed to send {} to process group {}: {}", signal, pid, e),
    }
}
