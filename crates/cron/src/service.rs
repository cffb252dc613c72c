use crate::clock::Clock;
use crate::error::CronError;
use crate::executor::Executor;
use crate::schedule::next_run_at_ms;
use crate::store::JobStore;
use crate::types::{CreateJob, Job, JobPatch, JobState, SchedulerEvent};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, warn};
use uuid::Uuid;

pub type EventSink = Arc<dyn Fn(SchedulerEvent) + Send + Sync>;

/// Holds the live job set, drives the single polling loop, and fronts the
/// CRUD surface mirrored by the tool facade (spec §4.G).
pub struct SchedulerService {
    jobs: RwLock<Vec<Job>>,
    store: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
    executor: Arc<Executor>,
    inflight: Mutex<HashSet<String>>,
    on_event: Option<EventSink>,
    tick_interval_ms: u64,
    shutdown_grace_ms: u64,
    tick_handle: Mutex<Option<JoinHandle<()>>>,
    stop_tx: Mutex<Option<tokio::sync::watch::Sender<bool>>>,
}

pub struct SchedulerConfig {
    pub tick_interval_ms: u64,
    pub shutdown_grace_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1_000,
            shutdown_grace_ms: 10_000,
        }
    }
}

impl SchedulerService {
    pub fn new(
        store: Arc<dyn JobStore>,
        clock: Arc<dyn Clock>,
        executor: Arc<Executor>,
        on_event: Option<EventSink>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            jobs: RwLock::new(Vec::new()),
            store,
            clock,
            executor,
            inflight: Mutex::new(HashSet::new()),
            on_event,
            tick_interval_ms: config.tick_interval_ms,
            shutdown_grace_ms: config.shutdown_grace_ms,
            tick_handle: Mutex::new(None),
            stop_tx: Mutex::new(None),
        }
    }

    fn emit(&self, event: SchedulerEvent) {
        if let Some(sink) = &self.on_event {
            sink(event);
        }
    }

    /// Loads the store and recomputes `nextRunAtMs` for any enabled job
    /// whose value is stale (absent or in the past) — establishes that a
    /// crash of arbitrary duration produces at most one near-term fire per
    /// job rather than a backlog (spec §4.G startup recovery).
    pub async fn start(self: &Arc<Self>) -> Result<(), CronError> {
        let mut loaded = self.store.load().await?;
        let now = self.clock.now_ms();

        for job in loaded.iter_mut() {
            if !job.enabled {
                job.state.next_run_at_ms = None;
                continue;
            }
            let stale = job.state.next_run_at_ms.map_or(true, |t| t <= now);
            if stale {
                job.state.next_run_at_ms =
                    next_run_at_ms(&job.schedule, job.state.last_run_at_ms, now)?;
            }
        }

        *self.jobs.write().await = loaded;

        let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
        *self.stop_tx.lock().await = Some(stop_tx);

        let service = Arc::clone(self);
        let interval_ms = self.tick_interval_ms;
        let handle = tokio::spawn(async move {
            service.tick_loop(interval_ms, stop_rx).await;
        });
        *self.tick_handle.lock().await = Some(handle);

        Ok(())
    }

    async fn tick_loop(self: Arc<Self>, interval_ms: u64, mut stop_rx: tokio::sync::watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(std::time::Duration::from_millis(interval_ms));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick().await;
                }
                _ = stop_rx.changed() => {
                    if *stop_rx.borrow() {
                        break;
                    }
                }
            }
        }
    }

    /// One wake of the polling loop: collect due jobs, run each through a
    /// single-flight lease, then persist outcomes (spec §4.G). Executor
    /// invocations within a tick run concurrently, each on its own task.
    pub async fn tick(self: &Arc<Self>) {
        let now = self.clock.now_ms();
        let due_ids: Vec<String> = {
            let jobs = self.jobs.read().await;
            jobs.iter()
                .filter(|j| j.enabled && j.state.next_run_at_ms.is_some_and(|t| t <= now))
                .map(|j| j.id.clone())
                .collect()
        };

        let mut handles = Vec::new();
        for id in due_ids {
            let leased = {
                let mut inflight = self.inflight.lock().await;
                inflight.insert(id.clone())
            };
            if !leased {
                continue;
            }

            let service = Arc::clone(self);
            handles.push(tokio::spawn(async move {
                service.run_one(id, now).await;
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }
    }

    async fn run_one(&self, id: String, now: i64) {
        let job_snapshot = {
            let jobs = self.jobs.read().await;
            jobs.iter().find(|j| j.id == id).cloned()
        };

        let Some(job) = job_snapshot else {
            self.inflight.lock().await.remove(&id);
            return;
        };

        let result = self.executor.execute_job(&job).await;

        {
            let mut jobs = self.jobs.write().await;
            if let Some(job) = jobs.iter_mut().find(|j| j.id == id) {
                job.state.last_run_at_ms = Some(now);
                job.state.last_status = Some(result.status.clone());
                job.state.last_error = result.error.clone();
                job.state.run_count += 1;

                if matches!(job.schedule, crate::types::Schedule::At { .. }) {
                    job.enabled = false;
                    job.state.next_run_at_ms = None;
                } else {
                    job.state.next_run_at_ms =
                        next_run_at_ms(&job.schedule, job.state.last_run_at_ms, now).unwrap_or(None);
                }
            }
            let snapshot = jobs.clone();
            if let Err(e) = self.store.save(&snapshot).await {
                error!(job_id = %id, error = %e, "failed to persist job after run");
            }
        }

        self.inflight.lock().await.remove(&id);

        let ran_job = {
            let jobs = self.jobs.read().await;
            jobs.iter().find(|j| j.id == id).cloned()
        };
        if let Some(ran_job) = ran_job {
            let exec_result = crate::types::ExecutionResult {
                status: result.status,
                summary: result.summary,
                output_text: result.output_text,
                error: result.error,
            };
            self.emit(SchedulerEvent::JobRan(ran_job, exec_result));
        }
    }

    pub async fn stop(&self) {
        if let Some(tx) = self.stop_tx.lock().await.take() {
            let _ = tx.send(true);
        }

        let handle = self.tick_handle.lock().await.take();
        if let Some(handle) = handle {
            let _ = tokio::time::timeout(
                std::time::Duration::from_millis(self.shutdown_grace_ms),
                handle,
            )
            .await;
        }

        // Wait (bounded) for any still-inflight executions to drain.
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_millis(self.shutdown_grace_ms);
        while !self.inflight.lock().await.is_empty() {
            if tokio::time::Instant::now() >= deadline {
                warn!("shutdown grace period elapsed with executions still in flight");
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(25)).await;
        }

        let snapshot = self.jobs.read().await.clone();
        if let Err(e) = self.store.save(&snapshot).await {
            error!(error = %e, "failed to persist final snapshot on shutdown");
        }
    }

    pub async fn add(&self, create: CreateJob) -> Result<Job, CronError> {
        let now = self.clock.now_ms();
        let enabled = create.enabled.unwrap_or(true);
        let computed_next_run = if enabled {
            next_run_at_ms(&create.schedule, None, now)?
        } else {
            None
        };

        let job = Job {
            id: Uuid::new_v4().to_string(),
            name: create.name,
            enabled,
            schedule: create.schedule,
            payload: create.payload,
            created_at_ms: now,
            updated_at_ms: now,
            state: JobState {
                next_run_at_ms: computed_next_run,
                ..Default::default()
            },
        };

        {
            let mut jobs = self.jobs.write().await;
            jobs.push(job.clone());
            self.persist(&jobs).await?;
        }

        self.emit(SchedulerEvent::JobAdded(job.clone()));
        Ok(job)
    }

    pub async fn remove(&self, id: &str) -> Result<bool, CronError> {
        let mut jobs = self.jobs.write().await;
        let Some(index) = jobs.iter().position(|j| j.id == id) else {
            return Ok(false);
        };
        let removed = jobs.remove(index);
        self.persist(&jobs).await?;
        drop(jobs);
        self.emit(SchedulerEvent::JobRemoved(removed));
        Ok(true)
    }

    pub async fn update(&self, id: &str, patch: JobPatch) -> Result<Job, CronError> {
        let now = self.clock.now_ms();
        let updated = {
            let mut jobs = self.jobs.write().await;
            let Some(job) = jobs.iter_mut().find(|j| j.id == id) else {
                return Err(CronError::JobNotFound(id.to_string()));
            };

            if let Some(name) = patch.name {
                job.name = name;
            }
            if let Some(enabled) = patch.enabled {
                job.enabled = enabled;
            }
            if let Some(schedule) = patch.schedule {
                job.schedule = schedule;
            }
            if let Some(payload) = patch.payload {
                job.payload = payload;
            }
            job.updated_at_ms = now;
            job.state.next_run_at_ms = if job.enabled {
                next_run_at_ms(&job.schedule, job.state.last_run_at_ms, now)?
            } else {
                None
            };

            let snapshot = job.clone();
            snapshot
        };

        {
            let jobs = self.jobs.read().await;
            self.persist(&jobs).await?;
        }

        self.emit(SchedulerEvent::JobUpdated(updated.clone()));
        Ok(updated)
    }

    pub async fn list(&self, include_disabled: bool) -> Vec<Job> {
        let jobs = self.jobs.read().await;
        jobs.iter()
            .filter(|j| include_disabled || j.enabled)
            .cloned()
            .collect()
    }

    pub async fn get(&self, id: &str) -> Option<Job> {
        self.jobs.read().await.iter().find(|j| j.id == id).cloned()
    }

    /// Forces an immediate execution outside the regular tick. Does not
    /// cancel or otherwise affect the tick loop's own schedule for this job.
    pub async fn run(&self, id: &str) -> Result<crate::types::ExecutionResult, CronError> {
        let job = self
            .get(id)
            .await
            .ok_or_else(|| CronError::JobNotFound(id.to_string()))?;

        let now = self.clock.now_ms();
        let result = self.executor.execute_job(&job).await;

        {
            let mut jobs = self.jobs.write().await;
            if let Some(job) = jobs.iter_mut().find(|j| j.id == id) {
                job.state.last_run_at_ms = Some(now);
                job.state.last_status = Some(result.status.clone());
                job.state.last_error = result.error.clone();
                job.state.run_count += 1;

                if matches!(job.schedule, crate::types::Schedule::At { .. }) {
                    job.enabled = false;
                    job.state.next_run_at_ms = None;
                } else if job.enabled {
                    job.state.next_run_at_ms =
                        next_run_at_ms(&job.schedule, job.state.last_run_at_ms, now).unwrap_or(None);
                }
            }
            self.persist(&jobs).await?;
        }

        let ran_job = self.get(id).await;
        let exec_result = crate::types::ExecutionResult {
            status: result.status,
            summary: result.summary,
            output_text: result.output_text,
            error: result.error,
        };
        if let Some(ran_job) = ran_job {
            self.emit(SchedulerEvent::JobRan(ran_job, exec_result.clone()));
        }

        Ok(exec_result)
    }

    async fn persist(&self, jobs: &[Job]) -> Result<(), CronError> {
        self.store.save(jobs).await
    }
}
