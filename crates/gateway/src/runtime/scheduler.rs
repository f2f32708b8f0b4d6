//! The polling scheduler: materialises due cron definitions into queue
//! tasks and drains the queue into the executor, one task per tick.

use std::sync::Arc;

use ar_domain::task::{ScheduledTask, Task};
use ar_domain::{config::SchedulerConfig, Error, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::cron::{is_due_at, parse_tz, CronParser};
use super::executor::TaskExecutor;
use super::storage::TaskStorage;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerStatus {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Snapshot returned by `GET /api/scheduler/status`.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatusInfo {
    pub status: SchedulerStatus,
    pub poll_interval: u64,
    pub queue_count: usize,
    pub scheduled_count: usize,
    pub enabled_scheduled_count: usize,
    pub running_count: usize,
    pub is_executing: bool,
    pub current_task_id: Option<Uuid>,
    pub updated_at: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scheduler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Cheap to clone: every field is shared behind an Arc, so the loop task
/// carries its own handle.
#[derive(Clone)]
pub struct Scheduler {
    storage: Arc<TaskStorage>,
    executor: Arc<TaskExecutor>,
    cron: Arc<CronParser>,
    config: SchedulerConfig,
    status: Arc<RwLock<SchedulerStatus>>,
    stop: Arc<parking_lot::Mutex<Option<CancellationToken>>>,
    handle: Arc<tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>>,
}

impl Scheduler {
    pub fn new(
        storage: Arc<TaskStorage>,
        executor: Arc<TaskExecutor>,
        cron: Arc<CronParser>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            storage,
            executor,
            cron,
            config,
            status: Arc::new(RwLock::new(SchedulerStatus::Stopped)),
            stop: Arc::new(parking_lot::Mutex::new(None)),
            handle: Arc::new(tokio::sync::Mutex::new(None)),
        }
    }

    pub fn status(&self) -> SchedulerStatus {
        *self.status.read()
    }

    pub fn status_info(&self) -> SchedulerStatusInfo {
        SchedulerStatusInfo {
            status: self.status(),
            poll_interval: self.config.poll_interval_secs,
            queue_count: self.storage.queue.count(),
            scheduled_count: self.storage.scheduled.count(),
            enabled_scheduled_count: self.storage.scheduled.enabled_count(),
            running_count: self.storage.running.count(),
            is_executing: self.executor.is_executing(),
            current_task_id: self.executor.current_task().map(|t| t.id),
            updated_at: Utc::now(),
        }
    }

    /// Start the poll loop. Returns false when not currently stopped.
    pub async fn start(&self) -> bool {
        {
            let mut status = self.status.write();
            if *status != SchedulerStatus::Stopped {
                tracing::warn!(status = ?*status, "scheduler start refused");
                return false;
            }
            *status = SchedulerStatus::Starting;
        }

        // Tasks stranded in RUNNING by a previous crash or hard shutdown
        // go back to the queue before the loop begins.
        self.recover_stale_running().await;

        let token = CancellationToken::new();
        *self.stop.lock() = Some(token.clone());

        let scheduler = self.clone();
        let handle = tokio::spawn(async move {
            tracing::info!(
                poll_interval_secs = scheduler.config.poll_interval_secs,
                "scheduler loop started"
            );
            loop {
                scheduler.tick().await;
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(scheduler.config.poll_interval()) => {}
                }
            }
            tracing::info!("scheduler loop exited");
        });
        *self.handle.lock().await = Some(handle);

        *self.status.write() = SchedulerStatus::Running;
        true
    }

    /// Stop the loop with a bounded wait for in-flight work. Returns false
    /// when already stopped or stopping.
    pub async fn stop(&self) -> bool {
        {
            let mut status = self.status.write();
            match *status {
                SchedulerStatus::Stopped | SchedulerStatus::Stopping => {
                    tracing::warn!(status = ?*status, "scheduler stop refused");
                    return false;
                }
                _ => *status = SchedulerStatus::Stopping,
            }
        }

        if let Some(token) = self.stop.lock().take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.lock().await.take() {
            match tokio::time::timeout(self.config.shutdown_grace(), handle).await {
                Ok(_) => {}
                Err(_) => {
                    tracing::warn!(
                        grace_secs = self.config.shutdown_grace_secs,
                        "scheduler did not drain in time; in-flight task left running"
                    );
                    // The loop task is abandoned; a stranded RUNNING row is
                    // re-queued by the stale sweep on next start.
                }
            }
        }

        *self.status.write() = SchedulerStatus::Stopped;
        tracing::info!("scheduler stopped");
        true
    }

    /// One pass: materialise due cron definitions, then dispatch at most
    /// one queued task. Never lets an error escape the loop.
    pub async fn tick(&self) {
        if let Err(e) = self.check_scheduled().await {
            tracing::error!(error = %e, "scheduled-task sweep failed");
        }
        if let Err(e) = self.process_queue().await {
            tracing::error!(error = %e, "queue dispatch failed");
        }
    }

    async fn check_scheduled(&self) -> Result<()> {
        let now = Utc::now();
        for scheduled in self.storage.scheduled.get_enabled() {
            if is_due_at(scheduled.next_run, &now) {
                if let Err(e) = self.trigger_scheduled(scheduled, now).await {
                    tracing::error!(error = %e, "failed to trigger scheduled task");
                }
            }
        }
        Ok(())
    }

    /// Emit a queue task from a due definition and advance its bookkeeping.
    async fn trigger_scheduled(&self, mut scheduled: ScheduledTask, now: DateTime<Utc>) -> Result<()> {
        tracing::info!(
            scheduled_id = %scheduled.id,
            name = %scheduled.name,
            "cron definition due, materialising task"
        );

        let task = Task::from_scheduled(&scheduled);
        let task_id = task.id;
        self.storage.queue.add(task).await?;

        scheduled.last_run = Some(now);
        scheduled.run_count += 1;
        scheduled.next_run = self.compute_next_run(&scheduled, &now)?;
        scheduled.updated_at = now;
        self.storage.scheduled.save(scheduled.clone()).await?;

        tracing::info!(
            scheduled_id = %scheduled.id,
            task_id = %task_id,
            next_run = ?scheduled.next_run,
            "task queued from cron definition"
        );
        Ok(())
    }

    async fn process_queue(&self) -> Result<()> {
        if self.executor.is_executing() {
            return Ok(());
        }
        let Some(task) = self.storage.queue.pop_due(Utc::now()).await? else {
            return Ok(());
        };
        tracing::info!(task_id = %task.id, "dispatching queued task");
        let result = self.executor.execute(task).await;
        if !result.success {
            tracing::warn!(
                error = ?result.error,
                "task execution did not succeed this attempt"
            );
        }
        Ok(())
    }

    /// Compute the next fire time for a definition in its own timezone.
    pub fn compute_next_run(
        &self,
        scheduled: &ScheduledTask,
        after: &DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>> {
        let expr = self.cron.parse(&scheduled.cron)?;
        Ok(expr.next_fire_tz(after, parse_tz(&scheduled.timezone)))
    }

    /// Move a queued task to the head of the queue so the next tick runs
    /// it first.
    pub async fn run_task_now(&self, task_id: Uuid) -> Result<Task> {
        if !self.storage.queue.move_to_front(task_id).await? {
            return Err(Error::TaskNotFound(task_id.to_string()));
        }
        self.storage
            .queue
            .get(task_id)
            .ok_or_else(|| Error::TaskNotFound(task_id.to_string()))
    }

    /// Materialise a task from a definition immediately, without touching
    /// its `last_run`/`next_run`/`run_count` bookkeeping, and queue it at
    /// the head.
    pub async fn run_scheduled_now(&self, scheduled_id: Uuid) -> Result<Task> {
        let scheduled = self
            .storage
            .scheduled
            .get(scheduled_id)
            .ok_or_else(|| Error::TaskNotFound(scheduled_id.to_string()))?;

        let task = Task::from_scheduled(&scheduled);
        self.storage.queue.push_front(task.clone()).await?;
        tracing::info!(
            scheduled_id = %scheduled_id,
            task_id = %task.id,
            "scheduled task queued for immediate run"
        );
        Ok(task)
    }

    /// Re-queue tasks stranded in RUNNING by an unclean shutdown.
    pub async fn recover_stale_running(&self) {
        let stale = match self.storage.running.drain().await {
            Ok(stale) => stale,
            Err(e) => {
                tracing::error!(error = %e, "stale-running sweep failed");
                return;
            }
        };
        for mut task in stale {
            tracing::warn!(task_id = %task.id, "re-queueing task stranded in running state");
            task.reset_for_retry();
            if let Err(e) = self.storage.queue.add(task).await {
                tracing::error!(error = %e, "failed to re-queue stranded task");
            }
        }
    }
}
