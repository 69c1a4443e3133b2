//! Task Registry Module
//!
//! Tracks in-flight tasks by id. Ids are deterministic, so a second request
//! for the same logical operation is recognised and dropped while the first
//! one is still running.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::{Scheduler, Submission, TaskId};

// =============================================================================
// Task Handle
// =============================================================================

/// Registry-side record of an in-flight task
#[derive(Debug)]
struct TaskHandle {
    generation: u64,
    token: CancellationToken,
}

/// Body-side view of a registered task.
///
/// The generation distinguishes attempts that reuse the same id, so a
/// cancelled attempt finishing late cannot deregister its successor.
#[derive(Clone, Debug)]
pub struct TaskTicket {
    task_id: TaskId,
    generation: u64,
    token: CancellationToken,
}

impl TaskTicket {
    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

// =============================================================================
// Task Registry
// =============================================================================

/// Mapping from task id to in-flight handle.
///
/// Every check-then-act sequence happens under a single lock so concurrent
/// callers cannot both register the same id.
pub struct TaskRegistry {
    entries: Mutex<HashMap<TaskId, TaskHandle>>,
    next_generation: AtomicU64,
    scheduler: Scheduler,
    /// Bumped whenever an entry leaves the map
    removals: watch::Sender<u64>,
}

impl TaskRegistry {
    pub fn new(scheduler: Scheduler) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
            scheduler,
            removals: watch::channel(0).0,
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TaskId, TaskHandle>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `task_id` and hand the body produced by `start` to the
    /// scheduler.
    ///
    /// `start` runs under the registry lock, so anything it publishes (the
    /// `Loading` state) is ordered before any result of the same attempt.
    /// Returns [`Submission::Duplicate`] without calling `start` when the id
    /// is already in flight.
    pub fn submit<F, Fut>(&self, task_id: TaskId, start: F) -> Submission
    where
        F: FnOnce(TaskTicket) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut entries = self.lock();
        if entries.contains_key(&task_id) {
            tracing::debug!("Task {} already in flight, dropping request", task_id);
            return Submission::Duplicate;
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        entries.insert(
            task_id.clone(),
            TaskHandle {
                generation,
                token: token.clone(),
            },
        );

        let ticket = TaskTicket {
            task_id: task_id.clone(),
            generation,
            token,
        };
        let body = start(ticket);
        self.scheduler.spawn(body);

        tracing::debug!("Task {} submitted (generation {})", task_id, generation);
        Submission::Accepted
    }

    /// Signal cancellation and deregister. Returns false for unknown ids.
    pub fn cancel(&self, task_id: &TaskId) -> bool {
        match self.lock().remove(task_id) {
            Some(handle) => {
                handle.token.cancel();
                self.notify_removed();
                tracing::info!("Task {} cancelled", task_id);
                true
            }
            None => false,
        }
    }

    /// Cancel every in-flight task. Returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<_> = self.lock().drain().collect();
        for (_, handle) in &drained {
            handle.token.cancel();
        }
        if !drained.is_empty() {
            self.notify_removed();
            tracing::info!("Cancelled {} in-flight tasks", drained.len());
        }
        drained.len()
    }

    pub fn exists(&self, task_id: &TaskId) -> bool {
        self.lock().contains_key(task_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Deregister a finished attempt and run `deliver` under the lock.
    ///
    /// When a newer attempt owns the id, the entry is left alone and
    /// `deliver` is skipped so the stale result cannot overwrite the newer
    /// attempt's state. Returns whether `deliver` ran.
    pub fn finish<F>(&self, ticket: &TaskTicket, deliver: F) -> bool
    where
        F: FnOnce(),
    {
        let mut entries = self.lock();
        match entries.get(&ticket.task_id) {
            Some(handle) if handle.generation != ticket.generation => {
                tracing::debug!(
                    "Task {} generation {} superseded by {}, dropping result",
                    ticket.task_id,
                    ticket.generation,
                    handle.generation
                );
                false
            }
            Some(_) => {
                entries.remove(&ticket.task_id);
                deliver();
                self.notify_removed();
                true
            }
            None => {
                deliver();
                true
            }
        }
    }

    /// Wait until `task_id` is no longer in flight.
    ///
    /// Anything the finished attempt delivered is already queued on the store
    /// when this returns.
    pub async fn wait_absent(&self, task_id: &TaskId) {
        let mut removals = self.removals.subscribe();
        while self.exists(task_id) {
            if removals.changed().await.is_err() {
                return;
            }
        }
    }

    fn notify_removed(&self) {
        self.removals.send_modify(|count| *count = count.wrapping_add(1));
    }

    /// Run `f` under the lock only when `task_id` is not in flight.
    pub fn when_absent<F>(&self, task_id: &TaskId, f: F) -> bool
    where
        F: FnOnce(),
    {
        let entries = self.lock();
        if entries.contains_key(task_id) {
            return false;
        }
        f();
        true
    }
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("in_flight", &self.len())
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use tokio::sync::oneshot;

    fn registry() -> Arc<TaskRegistry> {
        Arc::new(TaskRegistry::new(Scheduler::new(1).unwrap()))
    }

    fn id(n: u8) -> TaskId {
        TaskId::thumbnail(uuid::Uuid::from_bytes([n; 16]))
    }

    #[tokio::test]
    async fn test_submit_registers_and_finish_removes() {
        let registry = registry();
        let (tx, rx) = oneshot::channel();
        let reg = Arc::clone(&registry);

        let submission = registry.submit(id(1), move |ticket| async move {
            let delivered = reg.finish(&ticket, || {});
            let _ = tx.send(delivered);
        });

        assert_eq!(submission, Submission::Accepted);
        assert!(rx.await.unwrap());
        assert!(!registry.exists(&id(1)));
    }

    #[tokio::test]
    async fn test_duplicate_is_dropped_without_starting() {
        let registry = registry();
        let started = Arc::new(AtomicUsize::new(0));

        let (_hold_tx, hold_rx) = oneshot::channel::<()>();
        let counter = Arc::clone(&started);
        registry.submit(id(1), move |_ticket| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move {
                let _ = hold_rx.await;
            }
        });

        let counter = Arc::clone(&started);
        let second = registry.submit(id(1), move |_ticket| {
            counter.fetch_add(1, Ordering::SeqCst);
            async {}
        });

        assert_eq!(second, Submission::Duplicate);
        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_signals_token_and_deregisters() {
        let registry = registry();
        let (tx, rx) = oneshot::channel();

        registry.submit(id(2), move |ticket| async move {
            ticket.token().cancelled().await;
            let _ = tx.send(());
        });

        assert!(registry.cancel(&id(2)));
        assert!(!registry.exists(&id(2)));
        rx.await.unwrap();
        assert!(!registry.cancel(&id(2)));
    }

    #[tokio::test]
    async fn test_cancel_all_cancels_everything() {
        let registry = registry();
        let mut receivers = Vec::new();
        for n in 0..3 {
            let (tx, rx) = oneshot::channel();
            registry.submit(id(n), move |ticket| async move {
                ticket.token().cancelled().await;
                let _ = tx.send(());
            });
            receivers.push(rx);
        }

        assert_eq!(registry.cancel_all(), 3);
        assert!(registry.is_empty());
        for rx in receivers {
            rx.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_stale_finish_does_not_touch_newer_attempt() {
        let registry = registry();
        let (first_tx, first_rx) = oneshot::channel();
        registry.submit(id(3), move |ticket| async move {
            let _ = first_tx.send(ticket);
        });
        let first = first_rx.await.unwrap();

        // Cancel the first attempt and register a second under the same id
        assert!(registry.cancel(&id(3)));
        let (_hold_tx, hold_rx) = oneshot::channel::<()>();
        assert!(registry
            .submit(id(3), move |_ticket| async move {
                let _ = hold_rx.await;
            })
            .is_accepted());

        let mut delivered = false;
        assert!(!registry.finish(&first, || delivered = true));
        assert!(!delivered);
        assert!(registry.exists(&id(3)));
    }

    #[tokio::test]
    async fn test_finish_after_cancel_still_delivers() {
        let registry = registry();
        let (tx, rx) = oneshot::channel();
        registry.submit(id(4), move |ticket| async move {
            let _ = tx.send(ticket);
        });
        let ticket = rx.await.unwrap();

        registry.cancel_all();
        let mut delivered = false;
        assert!(registry.finish(&ticket, || delivered = true));
        assert!(delivered);
    }

    #[tokio::test]
    async fn test_when_absent() {
        let registry = registry();
        let mut ran = 0;
        assert!(registry.when_absent(&id(5), || ran += 1));

        let (_hold_tx, hold_rx) = oneshot::channel::<()>();
        registry.submit(id(5), move |_ticket| async move {
            let _ = hold_rx.await;
        });
        assert!(!registry.when_absent(&id(5), || ran += 1));
        assert_eq!(ran, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_wait_absent_returns_after_finish() {
        let registry = registry();
        registry.wait_absent(&id(7)).await;

        let (release_tx, release_rx) = oneshot::channel::<()>();
        let reg = Arc::clone(&registry);
        registry.submit(id(7), move |ticket| async move {
            let _ = release_rx.await;
            reg.finish(&ticket, || {});
        });

        let waiter = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.wait_absent(&id(7)).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        let _ = release_tx.send(());
        tokio::time::timeout(std::time::Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(!registry.exists(&id(7)));
    }

    #[tokio::test]
    async fn test_wait_absent_returns_after_cancel() {
        let registry = registry();
        registry.submit(id(8), |ticket| async move {
            ticket.token().cancelled().await;
        });

        let waiter = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.wait_absent(&id(8)).await })
        };
        tokio::task::yield_now().await;
        registry.cancel(&id(8));
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_submits_register_once() {
        let registry = registry();
        let accepted = Arc::new(AtomicUsize::new(0));
        let mut threads = Vec::new();

        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            let accepted = Arc::clone(&accepted);
            threads.push(std::thread::spawn(move || {
                let submission = registry.submit(id(6), |ticket| async move {
                    ticket.token().cancelled().await;
                });
                if submission.is_accepted() {
                    accepted.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }
        for thread in threads {
            thread.join().unwrap();
        }

        assert_eq!(accepted.load(Ordering::SeqCst), 1);
        registry.cancel_all();
    }
}
