//! Gated task scheduler.
//!
//! Tasks are spawned onto the tokio runtime as soon as they are submitted;
//! the counting gate only bounds how many of them talk to the engine at once.
//! Submitting never waits for the gate.

use std::future::Future;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

use crate::core::{CoreError, CoreResult};

/// Bounded-concurrency execution pool
#[derive(Clone, Debug)]
pub struct Scheduler {
    gate: Arc<Semaphore>,
    capacity: usize,
    runtime: Handle,
}

impl Scheduler {
    /// Create a scheduler on the current runtime.
    ///
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> CoreResult<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| CoreError::Internal(format!("No tokio runtime: {}", e)))?;
        Ok(Self::with_handle(capacity, runtime))
    }

    /// Create a scheduler spawning onto an explicit runtime
    pub fn with_handle(capacity: usize, runtime: Handle) -> Self {
        let capacity = capacity.max(1);
        Self {
            gate: Arc::new(Semaphore::new(capacity)),
            capacity,
            runtime,
        }
    }

    /// Spawn a task body. Returns immediately.
    pub fn spawn<F>(&self, work: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.runtime.spawn(work)
    }

    /// Wait for a gate permit. The permit is released when dropped.
    pub async fn acquire(&self) -> CoreResult<OwnedSemaphorePermit> {
        Arc::clone(&self.gate)
            .acquire_owned()
            .await
            .map_err(|_| CoreError::Internal("scheduler gate closed".to_string()))
    }

    /// Configured gate capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits currently free
    pub fn available(&self) -> usize {
        self.gate.available_permits()
    }
}
