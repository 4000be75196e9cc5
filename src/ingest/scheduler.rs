// src/ingest/scheduler.rs
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveTime, TimeZone};
use tokio::task::JoinHandle;

/// Work driven by [`spawn_scheduler`].
#[async_trait]
pub trait ScheduledJob: Send + Sync {
    fn name(&self) -> &str;
    async fn run(&self);
}

#[derive(Clone, Copy, Debug)]
pub struct SchedulerCfg {
    /// Delay before the one-off run after startup.
    pub initial_delay: Duration,
    /// Local time of the daily run.
    pub daily_at: NaiveTime,
}

/// Next occurrence of `at` strictly after `now`, in `now`'s timezone.
/// Local times skipped by a DST jump move to the following day.
pub fn next_daily_run<Tz: TimeZone>(now: &DateTime<Tz>, at: NaiveTime) -> DateTime<Tz> {
    let tz = now.timezone();
    let mut date = now.date_naive();
    for _ in 0..3 {
        if let Some(candidate) = tz.from_local_datetime(&date.and_time(at)).earliest() {
            if candidate > *now {
                return candidate;
            }
        }
        match date.succ_opt() {
            Some(next) => date = next,
            None => break,
        }
    }
    now.clone() + chrono::Duration::days(1)
}

/// Spawn the background timer: one run after `initial_delay`, then daily at `daily_at`.
pub fn spawn_scheduler(job: Arc<dyn ScheduledJob>, cfg: SchedulerCfg) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(cfg.initial_delay).await;
        tracing::info!(target: "scheduler", job = job.name(), "initial run");
        job.run().await;

        loop {
            let now = Local::now();
            let next = next_daily_run(&now, cfg.daily_at);
            let wait = (next.clone() - now).to_std().unwrap_or(Duration::ZERO);
            tracing::info!(
                target: "scheduler",
                job = job.name(),
                next_run = %next.to_rfc3339(),
                wait_secs = wait.as_secs(),
                "next scheduled run"
            );
            tokio::time::sleep(wait).await;
            job.run().await;
        }
    })
}
