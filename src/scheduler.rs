use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::queue::TaskQueue;
use crate::task::{HandlerError, TaskData, TaskRecord, TaskResult, TaskStatus};

/// How many terminal tasks are kept for polling before the oldest are
/// evicted.
pub const RETENTION_CAP: usize = 1000;

/// Cadence of the terminal-task retention sweep.
pub const RETENTION_INTERVAL: Duration = Duration::from_secs(300);

/// Executes one task to a result; installed into the dispatch loop so
/// tests can substitute stubs for the real pipelines.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, data: TaskData) -> Result<TaskResult, HandlerError>;
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub queue_size: usize,
    pub active_workers: usize,
    pub concurrency: usize,
    pub running_task_ids: Vec<Uuid>,
    pub total_tasks: usize,
}

struct SchedState {
    queue: TaskQueue,
    tasks: HashMap<Uuid, TaskRecord>,
    running: HashSet<Uuid>,
    active: usize,
    concurrency: usize,
}

/// Task registry plus the admission state of the worker pool.
///
/// One mutex guards the queue, the registry, and the worker accounting;
/// every critical section is constant-time and handlers always run outside
/// it, so polling stays responsive while tasks execute.
pub struct Scheduler {
    state: Mutex<SchedState>,
    /// Wakes the dispatch loop after a push, a finished task, or a
    /// concurrency change.
    notify: Notify,
    retention_cap: usize,
}

impl Scheduler {
    pub fn new(concurrency: usize) -> Self {
        Self {
            state: Mutex::new(SchedState {
                queue: TaskQueue::new(),
                tasks: HashMap::new(),
                running: HashSet::new(),
                active: 0,
                concurrency: concurrency.max(1),
            }),
            notify: Notify::new(),
            retention_cap: RETENTION_CAP,
        }
    }

    pub fn with_retention_cap(mut self, cap: usize) -> Self {
        self.retention_cap = cap;
        self
    }

    /// Registers a task as `pending`, enqueues it, and returns its handle.
    pub fn add_task(&self, data: TaskData, priority: i32) -> Uuid {
        let id = Uuid::new_v4();
        let record = TaskRecord {
            id,
            kind: data.kind(),
            data,
            priority,
            status: TaskStatus::Pending,
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };

        {
            let mut state = self.state.lock().unwrap();
            state.tasks.insert(id, record);
            state.queue.push(id, priority);
        }
        self.notify.notify_one();

        log::info!("task {id} submitted with priority {priority}");
        id
    }

    /// Snapshot read of a task record.
    pub fn get_task(&self, id: Uuid) -> Option<TaskRecord> {
        self.state.lock().unwrap().tasks.get(&id).cloned()
    }

    /// Updates the worker cap. Raising it admits queued tasks immediately;
    /// lowering it lets running tasks finish (no preemption).
    pub fn set_concurrency(&self, concurrency: usize) {
        {
            let mut state = self.state.lock().unwrap();
            state.concurrency = concurrency.max(1);
        }
        self.notify.notify_one();
    }

    pub fn status(&self) -> SchedulerStatus {
        let state = self.state.lock().unwrap();
        SchedulerStatus {
            queue_size: state.queue.len(),
            active_workers: state.active,
            concurrency: state.concurrency,
            running_task_ids: state.running.iter().copied().collect(),
            total_tasks: state.tasks.len(),
        }
    }

    /// Evicts terminal tasks beyond the retention cap, oldest completion
    /// first. Pending and running tasks are never touched.
    pub fn prune_terminal(&self) -> usize {
        let mut state = self.state.lock().unwrap();
        let mut terminal: Vec<(Uuid, chrono::DateTime<Utc>)> = state
            .tasks
            .values()
            .filter(|t| t.status.is_terminal())
            .map(|t| (t.id, t.completed_at.unwrap_or(t.created_at)))
            .collect();
        if terminal.len() <= self.retention_cap {
            return 0;
        }

        terminal.sort_by_key(|(_, completed_at)| *completed_at);
        let excess = terminal.len() - self.retention_cap;
        for (id, _) in terminal.into_iter().take(excess) {
            state.tasks.remove(&id);
        }
        excess
    }

    /// Pops the next task if a worker slot is free, marking it running.
    fn admit(&self) -> Option<(Uuid, TaskData)> {
        let mut state = self.state.lock().unwrap();
        if state.active >= state.concurrency {
            return None;
        }
        loop {
            let queued = state.queue.pop()?;
            // The registry entry can only be missing if retention raced an
            // extremely old queue entry; skip and keep draining.
            let Some(task) = state.tasks.get_mut(&queued.id) else {
                continue;
            };
            task.status = TaskStatus::Running;
            task.started_at = Some(Utc::now());
            let data = task.data.clone();
            state.active += 1;
            state.running.insert(queued.id);
            return Some((queued.id, data));
        }
    }

    /// Publishes a handler outcome; the terminal transition happens exactly
    /// once and `result`/`error` stay mutually exclusive.
    fn finish(&self, id: Uuid, outcome: Result<TaskResult, HandlerError>) {
        let mut state = self.state.lock().unwrap();
        state.running.remove(&id);
        let Some(task) = state.tasks.get_mut(&id) else {
            return;
        };
        if task.status.is_terminal() {
            return;
        }
        task.completed_at = Some(Utc::now());
        match outcome {
            Ok(result) => {
                task.status = TaskStatus::Completed;
                task.result = Some(result);
            }
            Err(e) => {
                task.status = TaskStatus::Failed;
                task.error = Some(e.to_string());
            }
        }
    }

    /// Returns a worker slot to the pool; called by the dispatch loop after
    /// the handler task has been reaped.
    fn release(&self) {
        let mut state = self.state.lock().unwrap();
        state.active = state.active.saturating_sub(1);
    }
}

/// Work-conserving dispatch loop.
///
/// Admits tasks whenever a slot and a queued task exist, runs each handler
/// in its own tokio task, and reaps finished handlers to free their slots.
/// On shutdown the loop stops admitting and drains the in-flight handlers.
pub async fn dispatch_loop(
    scheduler: Arc<Scheduler>,
    handler: Arc<dyn TaskHandler>,
    token: CancellationToken,
) {
    log::info!("dispatch loop started");
    let mut workers = JoinSet::new();

    loop {
        while let Some((id, data)) = scheduler.admit() {
            let scheduler = scheduler.clone();
            let handler = handler.clone();
            workers.spawn(async move {
                log::info!("task {id} started");
                let outcome = std::panic::AssertUnwindSafe(handler.handle(data))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| Err(HandlerError::Panicked));
                match &outcome {
                    Ok(_) => log::info!("task {id} completed"),
                    Err(e) => log::warn!("task {id} failed: {e}"),
                }
                scheduler.finish(id, outcome);
                id
            });
        }

        tokio::select! {
            _ = token.cancelled() => {
                log::info!("dispatch loop received shutdown signal, stopping");
                break;
            }
            _ = scheduler.notify.notified() => {}
            Some(reaped) = workers.join_next(), if !workers.is_empty() => {
                if let Err(e) = reaped {
                    log::error!("worker task died: {e}");
                }
                scheduler.release();
            }
        }
    }

    // Drain: running tasks are never preempted, so wait them out.
    while let Some(reaped) = workers.join_next().await {
        if let Err(e) = reaped {
            log::error!("worker task died during drain: {e}");
        }
        scheduler.release();
    }
    log::info!("dispatch loop has shut down gracefully");
}

/// Background eviction of old terminal tasks.
pub async fn retention_loop(scheduler: Arc<Scheduler>, token: CancellationToken) {
    retention_loop_every(scheduler, RETENTION_INTERVAL, token).await;
}

pub async fn retention_loop_every(
    scheduler: Arc<Scheduler>,
    interval: Duration,
    token: CancellationToken,
) {
    log::info!("task retention sweeper started (every {}s)", interval.as_secs());
    loop {
        tokio::select! {
            _ = token.cancelled() => {
                log::info!("task retention sweeper received shutdown signal, stopping");
                break;
            }
            _ = tokio::time::sleep(interval) => {
                let evicted = scheduler.prune_terminal();
                if evicted > 0 {
                    log::info!("evicted {evicted} old terminal tasks");
                }
            }
        }
    }
}
