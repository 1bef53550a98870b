//! Run-scoped ownership of everything that must be cleaned up.
//!
//! A [`HarnessSession`] knows every process that was started and owns the
//! [`PartitionController`]. [`HarnessSession::shutdown`] tears both down; if a
//! session is dropped without it, the process groups are killed and all blocks
//! lifted synchronously.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Weak;

use futures::FutureExt;
use parking_lot::Mutex;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::process::ProcessInner;
use crate::FaultInjector;
use crate::HarnessConfig;
use crate::PartitionController;
use crate::Process;
use crate::Result;
use crate::TcpFaultInjector;

struct SessionInner {
    config: HarnessConfig,
    partitions: PartitionController,
    registry: Mutex<Vec<Weak<ProcessInner>>>,
    shut_down: AtomicBool,
}

#[derive(Clone)]
pub struct HarnessSession {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for HarnessSession {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("HarnessSession")
            .field("config", &self.inner.config)
            .field("registered", &self.inner.registry.lock().len())
            .finish()
    }
}

impl HarnessSession {
    /// Session talking to the partition daemon configured in `config`
    pub fn new(config: HarnessConfig) -> Self {
        let injector = TcpFaultInjector::new(config.partition.clone());
        Self::with_injector(config, Box::new(injector))
    }

    pub fn with_injector(
        config: HarnessConfig,
        injector: Box<dyn FaultInjector>,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                config,
                partitions: PartitionController::new(injector),
                registry: Mutex::new(vec![]),
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.inner.config
    }

    pub fn partitions(&self) -> &PartitionController {
        &self.inner.partitions
    }

    /// Runs `f` against the partition controller on the blocking pool so
    /// daemon requests never stall the runtime.
    pub(crate) async fn with_partitions<T, F>(
        &self,
        f: F,
    ) -> Result<T>
    where
        F: FnOnce(&PartitionController) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let session = self.clone();
        tokio::task::spawn_blocking(move || f(session.partitions()))
            .await
            .map_err(std::io::Error::from)?
    }

    pub(crate) fn register(
        &self,
        process: &Process,
    ) {
        let mut registry = self.inner.registry.lock();
        registry.retain(|p| p.strong_count() > 0);
        let weak = Arc::downgrade(&process.inner);
        if !registry.iter().any(|p| p.ptr_eq(&weak)) {
            registry.push(weak);
        }
    }

    pub(crate) fn deregister(
        &self,
        process: &Process,
    ) {
        let weak = Arc::downgrade(&process.inner);
        self.inner
            .registry
            .lock()
            .retain(|p| p.strong_count() > 0 && !p.ptr_eq(&weak));
    }

    /// Processes started and not yet stopped
    pub fn registered(&self) -> Vec<Process> {
        self.inner
            .registry
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .map(|inner| Process { inner })
            .collect()
    }

    /// Check-stops every registered process, then lifts every block this run
    /// installed. Process failures are logged; the unblock result is returned.
    pub async fn shutdown(&self) -> Result<()> {
        self.inner.shut_down.store(true, Ordering::Release);

        let processes = self.registered();
        if !processes.is_empty() {
            info!("shutting down {} processes still running", processes.len());
        }
        for process in processes {
            if let Err(e) = process.check_and_stop().await {
                error!("{}", e);
            }
        }
        // processes whose cluster is gone cannot deregister themselves
        self.inner.registry.lock().clear();

        let result = self.with_partitions(|partitions| partitions.unblock_all()).await;
        if let Err(e) = &result {
            error!("failed to lift partitions: {}", e);
        }
        debug!("session shut down");
        result
    }

    /// Runs `f` and always shuts the session down afterwards, also when `f`
    /// fails or panics. A panic resumes once cleanup is done.
    pub async fn scoped<F, Fut, T>(
        &self,
        f: F,
    ) -> Result<T>
    where
        F: FnOnce(HarnessSession) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let outcome = AssertUnwindSafe(f(self.clone())).catch_unwind().await;
        let cleanup = self.shutdown().await;

        match outcome {
            Ok(result) => {
                let value = result?;
                cleanup.map(|_| value)
            }
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        if self.shut_down.load(Ordering::Acquire) {
            return;
        }

        let processes: Vec<Process> = self
            .registry
            .get_mut()
            .drain(..)
            .filter_map(|p| p.upgrade())
            .map(|inner| Process { inner })
            .collect();
        if !processes.is_empty() {
            warn!("session dropped without shutdown, killing {} processes", processes.len());
        }
        for process in processes {
            process.force_kill_group();
        }

        if let Err(e) = self.partitions.unblock_all() {
            error!("failed to lift partitions on drop: {}", e);
        }
    }
}
