//! Auto-completion worker — scans for stale tasks, queues them exactly once,
//! and applies the terminal transition.
//!
//! Two loops run concurrently:
//! - the **scanner** ticks on a fixed interval, asks the store for tasks that
//!   are still pending/in_progress past the configured age, and enqueues
//!   their IDs with a short bounded wait;
//! - the **processor** drains the queue, re-fetches each task, and issues a
//!   conditional completion so a concurrent manual edit is never clobbered.
//!
//! An in-flight set keeps the scanner from enqueuing the same task twice
//! while it is still queued. The marker is cleared after every processing
//! attempt, so a task whose completion failed is rediscovered by a later
//! scan rather than being blocked forever.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc::error::{SendTimeoutError, TryRecvError};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::error::WorkerError;
use crate::store::TaskStore;
use crate::tasks::model::TaskStatus;

/// Background task auto-completion worker.
///
/// Explicitly constructed instance owning its queue, in-flight set, and
/// shutdown signal — multiple independent workers are safe to build, which
/// the tests rely on.
pub struct CompletionWorker {
    store: Arc<dyn TaskStore>,
    config: WorkerConfig,
    queue_tx: mpsc::Sender<Uuid>,
    /// Taken by `start()`; `None` afterwards.
    queue_rx: Mutex<Option<mpsc::Receiver<Uuid>>>,
    in_flight: Arc<Mutex<HashSet<Uuid>>>,
    shutdown_tx: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl CompletionWorker {
    /// Create a new worker. No loops run until `start()`.
    pub fn new(store: Arc<dyn TaskStore>, config: WorkerConfig) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            store,
            config,
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Launch the scanner and processor loops. Returns immediately.
    pub async fn start(&self) -> Result<(), WorkerError> {
        let queue_rx = self
            .queue_rx
            .lock()
            .await
            .take()
            .ok_or(WorkerError::AlreadyStarted)?;

        info!(
            scan_interval_secs = self.config.scan_interval.as_secs(),
            complete_after_secs = self.config.complete_after.as_secs(),
            queue_capacity = self.config.queue_capacity,
            "Starting task auto-completion worker"
        );

        let scanner = tokio::spawn(scanner_loop(
            Arc::clone(&self.store),
            self.config.clone(),
            self.queue_tx.clone(),
            Arc::clone(&self.in_flight),
            self.shutdown_tx.subscribe(),
        ));
        let processor = tokio::spawn(processor_loop(
            Arc::clone(&self.store),
            queue_rx,
            Arc::clone(&self.in_flight),
            self.shutdown_tx.subscribe(),
            self.config.store_timeout,
        ));

        self.handles.lock().await.extend([scanner, processor]);
        Ok(())
    }

    /// Signal shutdown and wait for both loops to exit.
    ///
    /// The processor drains every ID already queued at the moment the
    /// signal fires before exiting.
    pub async fn stop(&self) {
        info!("Stopping task auto-completion worker");
        let _ = self.shutdown_tx.send(true);

        let handles: Vec<JoinHandle<()>> = self.handles.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Worker loop terminated abnormally");
            }
        }
        info!("Task auto-completion worker stopped");
    }

    /// Submit a task ID directly for completion processing.
    ///
    /// Waits up to `submit_timeout` for queue capacity, then fails loud
    /// rather than blocking forever.
    pub async fn submit(&self, id: Uuid) -> Result<(), WorkerError> {
        match self
            .queue_tx
            .send_timeout(id, self.config.submit_timeout)
            .await
        {
            Ok(()) => {
                debug!(task_id = %id, "Task submitted for completion");
                Ok(())
            }
            Err(SendTimeoutError::Timeout(_)) => Err(WorkerError::QueueFull {
                waited: self.config.submit_timeout,
            }),
            Err(SendTimeoutError::Closed(_)) => Err(WorkerError::Stopped),
        }
    }
}

/// Scanner loop: tick, scan, enqueue. Exits on shutdown.
async fn scanner_loop(
    store: Arc<dyn TaskStore>,
    config: WorkerConfig,
    queue_tx: mpsc::Sender<Uuid>,
    in_flight: Arc<Mutex<HashSet<Uuid>>>,
    mut shutdown: watch::Receiver<bool>,
) {
    // First tick fires immediately
    let mut tick = tokio::time::interval(config.scan_interval);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                debug!("Scanner observed shutdown");
                break;
            }
            _ = tick.tick() => {
                scan_once(&store, &config, &queue_tx, &in_flight).await;
            }
        }
    }
}

/// Single scan cycle: query eligible tasks and enqueue new candidates.
async fn scan_once(
    store: &Arc<dyn TaskStore>,
    config: &WorkerConfig,
    queue_tx: &mpsc::Sender<Uuid>,
    in_flight: &Arc<Mutex<HashSet<Uuid>>>,
) {
    let cutoff = Utc::now() - config.complete_after;
    let candidates = match timeout(config.store_timeout, store.list_eligible(cutoff)).await {
        Ok(Ok(tasks)) => tasks,
        Ok(Err(e)) => {
            warn!(error = %e, "Eligibility scan failed, skipping tick");
            return;
        }
        Err(_) => {
            warn!("Eligibility scan timed out, skipping tick");
            return;
        }
    };

    for task in candidates {
        // Lock held only for the set mutation, never across the enqueue.
        if !in_flight.lock().await.insert(task.id) {
            continue;
        }

        match queue_tx.send_timeout(task.id, config.enqueue_timeout).await {
            Ok(()) => {
                debug!(task_id = %task.id, "Queued task for auto-completion");
            }
            Err(SendTimeoutError::Timeout(id)) => {
                // Queue full: evict the marker so the task is eligible
                // again on the next tick.
                in_flight.lock().await.remove(&id);
                debug!(task_id = %id, "Completion queue full, task deferred to next scan");
            }
            Err(SendTimeoutError::Closed(id)) => {
                in_flight.lock().await.remove(&id);
                warn!(task_id = %id, "Completion queue closed, abandoning scan");
                return;
            }
        }
    }
}

/// Processor loop: dequeue, re-validate, complete. Drains the queue on
/// shutdown before exiting.
async fn processor_loop(
    store: Arc<dyn TaskStore>,
    mut queue_rx: mpsc::Receiver<Uuid>,
    in_flight: Arc<Mutex<HashSet<Uuid>>>,
    mut shutdown: watch::Receiver<bool>,
    store_timeout: Duration,
) {
    loop {
        tokio::select! {
            next = queue_rx.recv() => match next {
                Some(id) => process_task(&store, &in_flight, id, store_timeout).await,
                None => break,
            },
            _ = shutdown.changed() => {
                // Graceful drain: finish everything queued before the signal.
                loop {
                    match queue_rx.try_recv() {
                        Ok(id) => process_task(&store, &in_flight, id, store_timeout).await,
                        Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
                    }
                }
                debug!("Processor drained and stopped");
                break;
            }
        }
    }
}

/// Process one queued task, then clear its in-flight marker so failed
/// attempts are rediscovered by a later scan.
async fn process_task(
    store: &Arc<dyn TaskStore>,
    in_flight: &Arc<Mutex<HashSet<Uuid>>>,
    id: Uuid,
    store_timeout: Duration,
) {
    auto_complete(store, id, store_timeout).await;
    in_flight.lock().await.remove(&id);
}

/// Re-validate the task against current state and conditionally complete it.
async fn auto_complete(store: &Arc<dyn TaskStore>, id: Uuid, store_timeout: Duration) {
    let task = match timeout(store_timeout, store.get_task(id)).await {
        Ok(Ok(Some(task))) => task,
        Ok(Ok(None)) => {
            // Deleted between scan and processing — expected race outcome.
            debug!(task_id = %id, "Task no longer exists, skipping");
            return;
        }
        Ok(Err(e)) => {
            warn!(task_id = %id, error = %e, "Task fetch failed, abandoned until next scan");
            return;
        }
        Err(_) => {
            warn!(task_id = %id, "Task fetch timed out, abandoned until next scan");
            return;
        }
    };

    if task.status == TaskStatus::Completed {
        debug!(task_id = %id, "Task already completed, skipping");
        return;
    }

    // The store guards the transition, so a manual completion that lands
    // between the fetch above and this write stays untouched.
    match timeout(store_timeout, store.complete_if_active(id)).await {
        Ok(Ok(true)) => info!(task_id = %id, "Task auto-completed"),
        Ok(Ok(false)) => debug!(task_id = %id, "Task completed concurrently, no-op"),
        Ok(Err(e)) => {
            warn!(task_id = %id, error = %e, "Auto-completion update failed, abandoned until next scan");
        }
        Err(_) => warn!(task_id = %id, "Auto-completion update timed out"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::tasks::model::Task;

    fn test_config() -> WorkerConfig {
        WorkerConfig::default()
    }

    fn stale_task(title: &str) -> Task {
        let mut task = Task::new("user1", title);
        task.created_at = Utc::now() - chrono::Duration::hours(2);
        task.updated_at = task.created_at;
        task
    }

    async fn wait_for_status(store: &MemoryStore, id: Uuid, status: TaskStatus) -> bool {
        for _ in 0..200 {
            if let Ok(Some(task)) = store.get_task(id).await {
                if task.status == status {
                    return true;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test(start_paused = true)]
    async fn eligible_task_completed_after_one_cycle() {
        let store = Arc::new(MemoryStore::new());
        let task = stale_task("stale");
        store.insert_task(&task).await.unwrap();

        let worker = CompletionWorker::new(store.clone(), test_config());
        worker.start().await.unwrap();

        assert!(wait_for_status(&store, task.id, TaskStatus::Completed).await);
        let completed = store.get_task(task.id).await.unwrap().unwrap();
        assert!(completed.updated_at > task.updated_at);

        worker.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_task_is_not_touched() {
        let store = Arc::new(MemoryStore::new());
        let fresh = Task::new("user1", "fresh");
        store.insert_task(&fresh).await.unwrap();

        let worker = CompletionWorker::new(store.clone(), test_config());
        worker.start().await.unwrap();

        // Let the first scan tick run.
        tokio::time::sleep(Duration::from_millis(500)).await;
        worker.stop().await;

        let found = store.get_task(fresh.id).await.unwrap().unwrap();
        assert_eq!(found.status, TaskStatus::Pending);
        assert_eq!(store.completed_writes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn already_completed_task_is_never_rewritten() {
        let store = Arc::new(MemoryStore::new());
        let mut task = stale_task("done manually");
        task.status = TaskStatus::Completed;
        store.insert_task(&task).await.unwrap();

        let worker = CompletionWorker::new(store.clone(), test_config());
        // Force it through the queue even though the scan would skip it,
        // simulating stale in-memory state.
        worker.submit(task.id).await.unwrap();
        worker.start().await.unwrap();

        tokio::time::sleep(Duration::from_millis(500)).await;
        worker.stop().await;

        let found = store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(found.updated_at, task.updated_at);
        assert_eq!(store.completed_writes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn deleted_task_is_skipped_silently() {
        let store = Arc::new(MemoryStore::new());
        let worker = CompletionWorker::new(store.clone(), test_config());

        worker.submit(Uuid::new_v4()).await.unwrap();
        worker.start().await.unwrap();

        tokio::time::sleep(Duration::from_millis(500)).await;
        worker.stop().await;

        assert_eq!(store.completed_writes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_submission_yields_one_write() {
        let store = Arc::new(MemoryStore::new());
        let task = stale_task("submitted twice");
        store.insert_task(&task).await.unwrap();

        let worker = CompletionWorker::new(store.clone(), test_config());
        worker.submit(task.id).await.unwrap();
        worker.submit(task.id).await.unwrap();
        worker.start().await.unwrap();

        assert!(wait_for_status(&store, task.id, TaskStatus::Completed).await);
        worker.stop().await;

        assert_eq!(store.completed_writes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn submit_fails_loud_when_queue_is_full() {
        let store = Arc::new(MemoryStore::new());
        let config = WorkerConfig {
            queue_capacity: 1,
            submit_timeout: Duration::from_millis(50),
            ..test_config()
        };
        // Never started, so nothing drains the queue.
        let worker = CompletionWorker::new(store, config);

        worker.submit(Uuid::new_v4()).await.unwrap();
        let err = worker.submit(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, WorkerError::QueueFull { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_drains_queued_tasks() {
        let store = Arc::new(MemoryStore::new());
        let mut ids = Vec::new();
        for i in 0..5 {
            let task = stale_task(&format!("queued {i}"));
            ids.push(task.id);
            store.insert_task(&task).await.unwrap();
        }

        let worker = CompletionWorker::new(store.clone(), test_config());
        for id in &ids {
            worker.submit(*id).await.unwrap();
        }
        worker.start().await.unwrap();
        worker.stop().await;

        for id in ids {
            let task = store.get_task(id).await.unwrap().unwrap();
            assert_eq!(task.status, TaskStatus::Completed);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn submit_after_stop_reports_stopped() {
        let store = Arc::new(MemoryStore::new());
        let worker = CompletionWorker::new(store, test_config());
        worker.start().await.unwrap();
        worker.stop().await;

        let err = worker.submit(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, WorkerError::Stopped));
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let worker = CompletionWorker::new(store, test_config());
        worker.start().await.unwrap();

        let err = worker.start().await.unwrap_err();
        assert!(matches!(err, WorkerError::AlreadyStarted));

        worker.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn scanner_does_not_requeue_in_flight_tasks() {
        let store = Arc::new(MemoryStore::new());
        let a = stale_task("a");
        let b = stale_task("b");
        store.insert_task(&a).await.unwrap();
        store.insert_task(&b).await.unwrap();

        let config = test_config();
        let dyn_store: Arc<dyn TaskStore> = store.clone();
        let (tx, mut rx) = mpsc::channel(10);
        let in_flight = Arc::new(Mutex::new(HashSet::new()));

        // Two scans with no processor running: each task must be enqueued
        // exactly once.
        scan_once(&dyn_store, &config, &tx, &in_flight).await;
        scan_once(&dyn_store, &config, &tx, &in_flight).await;

        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, 2);
        assert_eq!(in_flight.lock().await.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn scanner_evicts_marker_when_queue_is_full() {
        let store = Arc::new(MemoryStore::new());
        let a = stale_task("a");
        let b = stale_task("b");
        store.insert_task(&a).await.unwrap();
        store.insert_task(&b).await.unwrap();

        let config = test_config();
        let dyn_store: Arc<dyn TaskStore> = store.clone();
        let (tx, mut rx) = mpsc::channel(1);
        let in_flight = Arc::new(Mutex::new(HashSet::new()));

        scan_once(&dyn_store, &config, &tx, &in_flight).await;

        // One task fit in the queue; the other's marker was evicted so it
        // stays eligible for the next tick.
        assert_eq!(in_flight.lock().await.len(), 1);
        let queued = rx.try_recv().unwrap();
        assert!(in_flight.lock().await.contains(&queued));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn manual_completion_wins_the_race() {
        let store = Arc::new(MemoryStore::new());
        let task = stale_task("racing");
        store.insert_task(&task).await.unwrap();

        let worker = CompletionWorker::new(store.clone(), test_config());
        // Manual edit lands before the processor sees the queued ID.
        worker.submit(task.id).await.unwrap();
        store
            .update_status(task.id, TaskStatus::Completed)
            .await
            .unwrap();
        let manual = store.get_task(task.id).await.unwrap().unwrap();

        worker.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        worker.stop().await;

        let found = store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(found.updated_at, manual.updated_at);
        assert_eq!(store.completed_writes(), 0);
    }
}
