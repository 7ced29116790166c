// src/scheduler/mod.rs
//! Timer-driven task runner: the periodic crawls and the daily cleanup.
//!
//! Every task gets its own loop. A loop runs its job to completion before it
//! computes the next deadline, so a task never overlaps with its own next
//! tick. Job failures (errors or panics) are recorded and the loop goes on.

pub mod jobs;
pub mod ticker;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveTime, Utc};
use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

use crate::config::SchedulerConfig;
use crate::engine::CrawlEngine;
use crate::ingest::types::CrawlGroup;
use crate::store::{ContentStore, TaskExecutionLog};

pub use jobs::{CleanupJob, CrawlJob};
pub use ticker::{ManualTicker, Ticker, TokioTicker};

pub const CLEANUP_TASK: &str = "daily_cleanup";

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "scheduler_task_runs_total",
            "Scheduled task executions by task and outcome."
        );
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Schedule {
    Every(std::time::Duration),
    /// Once a day at `hour`:00 UTC.
    DailyAt { hour: u32 },
}

impl Schedule {
    /// First fire time strictly after `after`.
    pub fn next_fire(&self, after: DateTime<Utc>) -> DateTime<Utc> {
        match *self {
            Schedule::Every(every) => {
                let step = Duration::from_std(every).unwrap_or(Duration::minutes(1));
                after + step.max(Duration::seconds(1))
            }
            Schedule::DailyAt { hour } => {
                let at = NaiveTime::from_hms_opt(hour.min(23), 0, 0).unwrap_or_default();
                let today = after.date_naive().and_time(at).and_utc();
                if today > after {
                    today
                } else {
                    today + Duration::days(1)
                }
            }
        }
    }
}

#[async_trait]
pub trait Job: Send + Sync {
    /// Returns a JSON summary stored in the task execution log.
    async fn run(&self) -> Result<serde_json::Value>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPhase {
    Idle,
    Running,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskStatus {
    pub name: String,
    pub phase: TaskPhase,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub tasks: Vec<TaskStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskStats {
    pub task_name: String,
    pub success_count: u64,
    pub failure_count: u64,
    pub last_run: Option<DateTime<Utc>>,
    pub last_result: Option<serde_json::Value>,
    pub next_run: Option<DateTime<Utc>>,
}

struct TaskSpec {
    name: String,
    schedule: Schedule,
    job: Arc<dyn Job>,
}

#[derive(Debug, Clone)]
struct TaskState {
    phase: TaskPhase,
    last_run: Option<DateTime<Utc>>,
    next_run: Option<DateTime<Utc>>,
    success_count: u64,
    failure_count: u64,
    last_result: Option<serde_json::Value>,
}

impl Default for TaskState {
    fn default() -> Self {
        Self {
            phase: TaskPhase::Idle,
            last_run: None,
            next_run: None,
            success_count: 0,
            failure_count: 0,
            last_result: None,
        }
    }
}

struct Outcome {
    success: bool,
    result: serde_json::Value,
    started_at: DateTime<Utc>,
}

struct Shared {
    store: Arc<dyn ContentStore>,
    ticker: Arc<dyn Ticker>,
    states: Mutex<HashMap<String, TaskState>>,
}

impl Shared {
    fn with_state<T>(&self, name: &str, f: impl FnOnce(&mut TaskState) -> T) -> Option<T> {
        let mut g = self.states.lock().ok()?;
        Some(f(g.entry(name.to_string()).or_default()))
    }

    async fn execute(&self, spec: &TaskSpec) -> Outcome {
        let started_at = self.ticker.now();
        self.with_state(&spec.name, |s| s.phase = TaskPhase::Running);
        tracing::info!(target: "scheduler", task = %spec.name, "task started");

        // run on its own task so a panicking job cannot take the loop down;
        // the guard aborts it when this future is dropped (loop aborted)
        let job = spec.job.clone();
        let mut run = AbortOnDrop(tokio::spawn(async move { job.run().await }));
        let (success, result) = match (&mut run.0).await {
            Ok(Ok(v)) => (true, v),
            Ok(Err(e)) => (false, serde_json::json!({ "error": format!("{e:#}") })),
            Err(join) => (false, serde_json::json!({ "error": format!("task aborted: {join}") })),
        };
        Outcome {
            success,
            result,
            started_at,
        }
    }

    /// Update counters, then persist the execution log. A log write failure
    /// is only warned about.
    async fn record(&self, name: &str, outcome: Outcome, next_run: Option<DateTime<Utc>>) -> TaskExecutionLog {
        self.with_state(name, |s| {
            s.phase = TaskPhase::Idle;
            s.last_run = Some(outcome.started_at);
            if next_run.is_some() {
                s.next_run = next_run;
            }
            if outcome.success {
                s.success_count += 1;
            } else {
                s.failure_count += 1;
            }
            s.last_result = Some(outcome.result.clone());
        });

        let label = if outcome.success { "ok" } else { "error" };
        counter!("scheduler_task_runs_total", "task" => name.to_string(), "outcome" => label).increment(1);
        if outcome.success {
            tracing::info!(target: "scheduler", task = name, "task finished");
        } else {
            tracing::warn!(target: "scheduler", task = name, result = %outcome.result, "task failed");
        }

        let log = TaskExecutionLog {
            task_name: name.to_string(),
            success: outcome.success,
            result: outcome.result,
            executed_at: outcome.started_at,
        };
        if let Err(e) = self.store.append_task_log(log.clone()).await {
            tracing::warn!(task = name, error = %e, "could not write task execution log");
        }
        log
    }
}

struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

struct Running {
    started_at: DateTime<Utc>,
    handles: Vec<JoinHandle<()>>,
}

pub struct Scheduler {
    tasks: Vec<Arc<TaskSpec>>,
    shared: Arc<Shared>,
    running: Mutex<Option<Running>>,
}

impl Scheduler {
    pub fn new(store: Arc<dyn ContentStore>, ticker: Arc<dyn Ticker>) -> Self {
        ensure_metrics_described();
        Self {
            tasks: Vec::new(),
            shared: Arc::new(Shared {
                store,
                ticker,
                states: Mutex::new(HashMap::new()),
            }),
            running: Mutex::new(None),
        }
    }

    /// Primary and secondary crawls plus the daily cleanup.
    pub fn standard(
        cfg: &SchedulerConfig,
        engine: Arc<CrawlEngine>,
        store: Arc<dyn ContentStore>,
        ticker: Arc<dyn Ticker>,
    ) -> Self {
        let cleanup = CleanupJob::new(store.clone(), ticker.clone(), cfg.retention_days)
            .with_task_log_retention(cfg.task_log_retention_days);
        Self::new(store, ticker)
            .with_task(
                CrawlGroup::Primary.task_name(),
                Schedule::Every(cfg.primary_interval()),
                Arc::new(CrawlJob::new(engine.clone(), CrawlGroup::Primary)),
            )
            .with_task(
                CrawlGroup::Secondary.task_name(),
                Schedule::Every(cfg.secondary_interval()),
                Arc::new(CrawlJob::new(engine, CrawlGroup::Secondary)),
            )
            .with_task(
                CLEANUP_TASK,
                Schedule::DailyAt {
                    hour: cfg.cleanup_hour_utc,
                },
                Arc::new(cleanup),
            )
    }

    pub fn with_task(mut self, name: impl Into<String>, schedule: Schedule, job: Arc<dyn Job>) -> Self {
        let name = name.into();
        self.shared.with_state(&name, |_| ());
        self.tasks.push(Arc::new(TaskSpec { name, schedule, job }));
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().map(|r| r.is_some()).unwrap_or(false)
    }

    /// Spawn one loop per task. Returns `false` (and changes nothing) when
    /// already running. Must be called inside a Tokio runtime.
    pub fn start(&self) -> bool {
        let Ok(mut running) = self.running.lock() else {
            return false;
        };
        if running.is_some() {
            tracing::warn!(target: "scheduler", "start requested while already running");
            return false;
        }

        let now = self.shared.ticker.now();
        let mut handles = Vec::with_capacity(self.tasks.len());
        for spec in &self.tasks {
            // first deadline is fixed before the loop is spawned
            let first = spec.schedule.next_fire(now);
            self.shared.with_state(&spec.name, |s| s.next_run = Some(first));

            let shared = self.shared.clone();
            let spec = spec.clone();
            handles.push(tokio::spawn(async move {
                let mut deadline = first;
                loop {
                    shared.ticker.sleep_until(deadline).await;
                    let outcome = shared.execute(&spec).await;
                    deadline = spec.schedule.next_fire(shared.ticker.now());
                    shared.record(&spec.name, outcome, Some(deadline)).await;
                }
            }));
        }

        tracing::info!(target: "scheduler", tasks = self.tasks.len(), "scheduler started");
        *running = Some(Running {
            started_at: now,
            handles,
        });
        true
    }

    /// Abort all task loops. A job that is mid-run is cancelled with its loop
    /// and leaves no execution log.
    pub fn stop(&self) -> bool {
        let Some(run) = self.running.lock().ok().and_then(|mut r| r.take()) else {
            return false;
        };
        for h in run.handles {
            h.abort();
        }
        if let Ok(mut states) = self.shared.states.lock() {
            for s in states.values_mut() {
                s.phase = TaskPhase::Idle;
                s.next_run = None;
            }
        }
        tracing::info!(target: "scheduler", "scheduler stopped");
        true
    }

    /// Run a task immediately, outside its cadence. Recorded like a scheduled run.
    pub async fn run_task_now(&self, name: &str) -> Result<TaskExecutionLog> {
        let spec = self
            .tasks
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| anyhow!("unknown task `{name}`"))?;
        let outcome = self.shared.execute(spec).await;
        Ok(self.shared.record(name, outcome, None).await)
    }

    pub fn task_names(&self) -> Vec<String> {
        self.tasks.iter().map(|t| t.name.clone()).collect()
    }

    fn snapshot(&self) -> Vec<(String, TaskState)> {
        let states = self.shared.states.lock().map(|g| g.clone()).unwrap_or_default();
        self.tasks
            .iter()
            .map(|t| (t.name.clone(), states.get(&t.name).cloned().unwrap_or_default()))
            .collect()
    }

    pub fn status(&self) -> SchedulerStatus {
        let started_at = self
            .running
            .lock()
            .ok()
            .and_then(|r| r.as_ref().map(|r| r.started_at));
        SchedulerStatus {
            running: started_at.is_some(),
            started_at,
            tasks: self
                .snapshot()
                .into_iter()
                .map(|(name, s)| TaskStatus {
                    name,
                    phase: s.phase,
                    last_run: s.last_run,
                    next_run: s.next_run,
                })
                .collect(),
        }
    }

    pub fn task_stats(&self) -> Vec<TaskStats> {
        self.snapshot()
            .into_iter()
            .map(|(task_name, s)| TaskStats {
                task_name,
                success_count: s.success_count,
                failure_count: s.failure_count,
                last_run: s.last_run,
                last_result: s.last_result,
                next_run: s.next_run,
            })
            .collect()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Ok(mut r) = self.running.lock() {
            if let Some(run) = r.take() {
                for h in run.handles {
                    h.abort();
                }
            }
        }
    }
}
