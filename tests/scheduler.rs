// tests/scheduler.rs
//
// Scheduler loops driven by a ManualTicker. Each step advances the fake
// clock, then polls (real time, short sleeps) until the run is recorded.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use serde_json::{json, Value};

use brand_pulse::scheduler::{
    CleanupJob, Job, ManualTicker, Schedule, Scheduler, TaskPhase, Ticker,
};
use brand_pulse::store::{ContentStore, InMemoryStore};

#[derive(Default)]
struct CountingJob {
    runs: AtomicUsize,
    fail_first: bool,
    panic_first: bool,
}

#[async_trait]
impl Job for CountingJob {
    async fn run(&self) -> Result<Value> {
        let n = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
        if n == 1 && self.fail_first {
            return Err(anyhow!("upstream unavailable"));
        }
        if n == 1 && self.panic_first {
            panic!("job blew up");
        }
        Ok(json!({ "run": n }))
    }
}

struct SlowJob {
    started: AtomicBool,
    finished: AtomicBool,
}

#[async_trait]
impl Job for SlowJob {
    async fn run(&self) -> Result<Value> {
        self.started.store(true, Ordering::SeqCst);
        tokio::time::sleep(StdDuration::from_millis(200)).await;
        self.finished.store(true, Ordering::SeqCst);
        Ok(json!({ "slow": true }))
    }
}

const EVERY_30M: Schedule = Schedule::Every(StdDuration::from_secs(1_800));

fn setup(job: Arc<CountingJob>) -> (Arc<InMemoryStore>, ManualTicker, Scheduler) {
    let store = Arc::new(InMemoryStore::new(0.0));
    let ticker = ManualTicker::new(Utc.with_ymd_and_hms(2025, 5, 1, 10, 0, 0).unwrap());
    let scheduler = Scheduler::new(store.clone(), Arc::new(ticker.clone())).with_task("tick", EVERY_30M, job);
    (store, ticker, scheduler)
}

async fn wait_for(mut cond: impl FnMut() -> bool) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        tokio::time::sleep(StdDuration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

fn counts(s: &Scheduler) -> (u64, u64) {
    let st = &s.task_stats()[0];
    (st.success_count, st.failure_count)
}

#[tokio::test]
async fn runs_on_cadence_and_logs_every_execution() {
    let job = Arc::new(CountingJob::default());
    let (store, ticker, scheduler) = setup(job.clone());
    assert!(scheduler.start());

    ticker.advance(Duration::minutes(29));
    tokio::time::sleep(StdDuration::from_millis(30)).await;
    assert_eq!(job.runs.load(Ordering::SeqCst), 0);

    ticker.advance(Duration::minutes(1));
    wait_for(|| counts(&scheduler) == (1, 0)).await;

    ticker.advance(Duration::minutes(30));
    wait_for(|| counts(&scheduler) == (2, 0)).await;

    let logs = store.task_logs().await.unwrap();
    assert_eq!(logs.len(), 2);
    assert!(logs.iter().all(|l| l.success && l.task_name == "tick"));
    assert_eq!(logs[1].result, json!({ "run": 2 }));

    let status = scheduler.status();
    assert!(status.running);
    assert_eq!(status.tasks[0].phase, TaskPhase::Idle);
    assert_eq!(
        status.tasks[0].next_run,
        Some(ticker.now() + Duration::minutes(30))
    );
    scheduler.stop();
}

#[tokio::test]
async fn failed_run_is_recorded_and_next_tick_still_fires() {
    let job = Arc::new(CountingJob {
        fail_first: true,
        ..Default::default()
    });
    let (store, ticker, scheduler) = setup(job);
    scheduler.start();

    ticker.advance(Duration::minutes(30));
    wait_for(|| counts(&scheduler) == (0, 1)).await;
    ticker.advance(Duration::minutes(30));
    wait_for(|| counts(&scheduler) == (1, 1)).await;

    let logs = store.task_logs().await.unwrap();
    assert!(!logs[0].success);
    assert!(logs[0].result["error"]
        .as_str()
        .unwrap()
        .contains("upstream unavailable"));
    assert!(logs[1].success);
    scheduler.stop();
}

#[tokio::test]
async fn panicking_job_counts_as_failure() {
    let job = Arc::new(CountingJob {
        panic_first: true,
        ..Default::default()
    });
    let (_store, ticker, scheduler) = setup(job);
    scheduler.start();

    ticker.advance(Duration::minutes(30));
    wait_for(|| counts(&scheduler) == (0, 1)).await;
    ticker.advance(Duration::minutes(30));
    wait_for(|| counts(&scheduler) == (1, 1)).await;
    scheduler.stop();
}

#[tokio::test]
async fn task_log_write_failure_does_not_break_the_loop() {
    let job = Arc::new(CountingJob::default());
    let (store, ticker, scheduler) = setup(job);
    store.fail_task_logs(true);
    scheduler.start();

    ticker.advance(Duration::minutes(30));
    wait_for(|| counts(&scheduler) == (1, 0)).await;
    assert!(store.task_logs().await.unwrap().is_empty());

    store.fail_task_logs(false);
    ticker.advance(Duration::minutes(30));
    wait_for(|| counts(&scheduler) == (2, 0)).await;
    assert_eq!(store.task_logs().await.unwrap().len(), 1);
    scheduler.stop();
}

#[tokio::test]
async fn start_is_idempotent_and_stop_halts_runs() {
    let job = Arc::new(CountingJob::default());
    let (_store, ticker, scheduler) = setup(job.clone());

    assert!(scheduler.start());
    assert!(!scheduler.start());
    assert!(scheduler.status().started_at.is_some());

    assert!(scheduler.stop());
    assert!(!scheduler.stop());
    let status = scheduler.status();
    assert!(!status.running);
    assert_eq!(status.tasks[0].next_run, None);

    ticker.advance(Duration::hours(2));
    tokio::time::sleep(StdDuration::from_millis(30)).await;
    assert_eq!(job.runs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn run_task_now_bypasses_the_cadence() {
    let job = Arc::new(CountingJob::default());
    let (store, _ticker, scheduler) = setup(job);

    let log = scheduler.run_task_now("tick").await.unwrap();
    assert!(log.success);
    assert_eq!(counts(&scheduler), (1, 0));
    assert_eq!(store.task_logs().await.unwrap().len(), 1);
    assert!(scheduler.run_task_now("nope").await.is_err());
}

#[tokio::test]
async fn daily_cleanup_fires_at_the_configured_utc_hour() {
    let store = Arc::new(InMemoryStore::new(0.0));
    let ticker = ManualTicker::new(Utc.with_ymd_and_hms(2025, 5, 1, 1, 0, 0).unwrap());
    let ticker_dyn: Arc<dyn Ticker> = Arc::new(ticker.clone());
    let cleanup = CleanupJob::new(store.clone(), ticker_dyn.clone(), 30);
    let scheduler = Scheduler::new(store.clone(), ticker_dyn).with_task(
        "daily_cleanup",
        Schedule::DailyAt { hour: 2 },
        Arc::new(cleanup),
    );
    scheduler.start();
    assert_eq!(
        scheduler.status().tasks[0].next_run,
        Some(Utc.with_ymd_and_hms(2025, 5, 1, 2, 0, 0).unwrap())
    );

    ticker.advance(Duration::hours(1));
    wait_for(|| counts(&scheduler) == (1, 0)).await;
    let stats = &scheduler.task_stats()[0];
    assert_eq!(stats.last_result.as_ref().unwrap()["deleted"], json!(0));
    assert_eq!(
        stats.next_run,
        Some(Utc.with_ymd_and_hms(2025, 5, 2, 2, 0, 0).unwrap())
    );
    scheduler.stop();
}

#[tokio::test]
async fn stop_cancels_a_job_that_is_mid_run() {
    let job = Arc::new(SlowJob {
        started: AtomicBool::new(false),
        finished: AtomicBool::new(false),
    });
    let store = Arc::new(InMemoryStore::new(0.0));
    let ticker = ManualTicker::new(Utc.with_ymd_and_hms(2025, 5, 1, 10, 0, 0).unwrap());
    let scheduler =
        Scheduler::new(store.clone(), Arc::new(ticker.clone())).with_task("slow", EVERY_30M, job.clone());
    scheduler.start();

    ticker.advance(Duration::minutes(31));
    wait_for(|| job.started.load(Ordering::SeqCst)).await;
    assert_eq!(scheduler.status().tasks[0].phase, TaskPhase::Running);

    assert!(scheduler.stop());
    tokio::time::sleep(StdDuration::from_millis(400)).await;

    assert!(!job.finished.load(Ordering::SeqCst), "job kept running after stop");
    assert_eq!(counts(&scheduler), (0, 0));
    assert!(store.task_logs().await.unwrap().is_empty());
    assert_eq!(scheduler.status().tasks[0].phase, TaskPhase::Idle);
}
