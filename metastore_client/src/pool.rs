//! The worker pool that executes remote catalog requests.
//!
//! A [`WorkerPool`] is created once, by an [`ExecutorFactory`], and shared by every call made
//! through a client. Clones share the same runtime and the same in-flight request limit.

use std::{future::Future, num::NonZeroUsize, sync::Arc};

use metastore_clap_blocks::{
    partition::{ExecutorKind, PartitionFetchConfig},
    tokio::TokioWorkerConfig,
};
use tokio::{
    runtime::{Handle, Runtime},
    sync::{Semaphore, oneshot},
    task::JoinError,
};
use tokio_util::task::AbortOnDropHandle;
use tracing::info;

use crate::error::{Error, Result, ServiceError};

#[derive(Debug)]
struct PoolInner {
    handle: Handle,
    /// Only set when the pool owns its runtime. Dropping it stops the driver thread.
    _stop_driver: Option<oneshot::Sender<()>>,
    permits: Arc<Semaphore>,
}

/// A bounded pool of workers for catalog requests.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    /// Run tasks on an existing runtime.
    pub fn from_handle(handle: Handle, max_concurrent_requests: NonZeroUsize) -> Self {
        Self::build(handle, None, max_concurrent_requests)
    }

    /// Run tasks on a runtime owned by the pool.
    ///
    /// The runtime is driven by a dedicated thread and shut down in the background once the last
    /// clone of the pool is dropped, so the pool may be released from async code.
    pub fn from_runtime(runtime: Runtime, max_concurrent_requests: NonZeroUsize) -> Result<Self> {
        let handle = runtime.handle().clone();
        let (stop_driver, stopped) = oneshot::channel::<()>();
        std::thread::Builder::new()
            .name("Metastore Tokio catalog driver".to_owned())
            .spawn(move || {
                // a current-thread runtime only makes progress inside block_on
                runtime.block_on(async {
                    let _ = stopped.await;
                });
                runtime.shutdown_background();
            })
            .map_err(Error::WorkerPool)?;
        Ok(Self::build(
            handle,
            Some(stop_driver),
            max_concurrent_requests,
        ))
    }

    fn build(
        handle: Handle,
        stop_driver: Option<oneshot::Sender<()>>,
        max_concurrent_requests: NonZeroUsize,
    ) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                handle,
                _stop_driver: stop_driver,
                permits: Arc::new(Semaphore::new(max_concurrent_requests.get())),
            }),
        }
    }

    /// Submit `task` to the pool.
    ///
    /// The task waits for a free request slot before it starts. Dropping the returned handle
    /// aborts the task.
    pub fn spawn<F, T>(&self, task: F) -> AbortOnDropHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let permits = Arc::clone(&self.inner.permits);
        AbortOnDropHandle::new(self.inner.handle.spawn(async move {
            // the semaphore is never closed
            let _permit = permits.acquire_owned().await.ok();
            task.await
        }))
    }

    /// Request slots not currently taken by a running task.
    pub fn available_permits(&self) -> usize {
        self.inner.permits.available_permits()
    }
}

/// Unwrap the outcome of a pool task.
///
/// A panic inside the task is resumed on the caller with its original payload, and a task that
/// was cancelled by its runtime is reported as [`Error::Interrupted`].
pub(crate) fn task_result<T>(res: Result<Result<T, ServiceError>, JoinError>) -> Result<T> {
    match res {
        Ok(res) => res.map_err(Error::from),
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(_) => Err(Error::Interrupted),
    }
}

/// Constructs the [`WorkerPool`] for a client.
pub trait ExecutorFactory: std::fmt::Debug + Send + Sync {
    fn worker_pool(&self) -> Result<WorkerPool>;
}

/// Spawns onto the tokio runtime that is current when the pool is built.
#[derive(Debug, Clone, Copy)]
pub struct CurrentRuntimeFactory {
    max_concurrent_requests: NonZeroUsize,
}

impl CurrentRuntimeFactory {
    pub fn new(max_concurrent_requests: NonZeroUsize) -> Self {
        Self {
            max_concurrent_requests,
        }
    }
}

impl ExecutorFactory for CurrentRuntimeFactory {
    fn worker_pool(&self) -> Result<WorkerPool> {
        let handle = Handle::try_current()
            .map_err(|e| Error::WorkerPool(std::io::Error::other(e)))?;
        Ok(WorkerPool::from_handle(handle, self.max_concurrent_requests))
    }
}

/// Builds a dedicated runtime for catalog requests.
#[derive(Debug, Clone)]
pub struct DedicatedExecutorFactory {
    config: TokioWorkerConfig,
    max_concurrent_requests: NonZeroUsize,
}

impl DedicatedExecutorFactory {
    pub fn new(config: TokioWorkerConfig, max_concurrent_requests: NonZeroUsize) -> Self {
        Self {
            config,
            max_concurrent_requests,
        }
    }
}

impl ExecutorFactory for DedicatedExecutorFactory {
    fn worker_pool(&self) -> Result<WorkerPool> {
        let runtime = self
            .config
            .builder()
            .and_then(|mut builder| builder.build())
            .map_err(Error::WorkerPool)?;
        info!(
            runtime_type = ?self.config.runtime_type,
            num_threads = ?self.config.num_threads,
            max_concurrent_requests = self.max_concurrent_requests.get(),
            "created catalog worker runtime"
        );
        WorkerPool::from_runtime(runtime, self.max_concurrent_requests)
    }
}

/// Select the [`ExecutorFactory`] named by `config`.
pub fn executor_factory(config: &PartitionFetchConfig) -> Arc<dyn ExecutorFactory> {
    match config.executor {
        ExecutorKind::Dedicated => Arc::new(DedicatedExecutorFactory::new(
            config.worker.clone(),
            config.max_concurrent_requests,
        )),
        ExecutorKind::Current => Arc::new(CurrentRuntimeFactory::new(
            config.max_concurrent_requests,
        )),
    }
}
