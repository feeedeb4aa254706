//! Cron-based trigger for the refresh jobs
//!
//! Stands in for an external scheduler: it only decides *when* to invoke
//! the job entry points. Outcome transport, retries and alerting are the
//! runner's and the broker's business.

use std::str::FromStr;
use std::sync::Arc;

use cron::Schedule;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use crate::jobs::runner::{JobRunner, RunnableJob};

pub struct JobScheduler {
    runner: Arc<JobRunner>,
    jobs: Vec<Arc<dyn RunnableJob>>,
    schedule: Schedule,
    handle: Arc<RwLock<Option<tokio::task::JoinHandle<()>>>>,
}

impl JobScheduler {
    /// Create a scheduler that invokes every job each `interval_seconds`.
    /// An interval of 0 means the scheduler is disabled.
    pub fn new(
        runner: Arc<JobRunner>,
        jobs: Vec<Arc<dyn RunnableJob>>,
        interval_seconds: u64,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        if interval_seconds == 0 {
            return Err("Scheduler disabled: interval_seconds is 0".into());
        }

        let cron_expr = cron_expression(interval_seconds);

        let schedule = Schedule::from_str(&cron_expr).map_err(|e| {
            Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("Invalid cron expression '{}': {}", cron_expr, e),
            )) as Box<dyn std::error::Error + Send + Sync>
        })?;

        info!(
            interval = interval_seconds,
            cron = %cron_expr,
            jobs = jobs.len(),
            "scheduler created"
        );

        Ok(Self {
            runner,
            jobs,
            schedule,
            handle: Arc::new(RwLock::new(None)),
        })
    }

    pub async fn start(&self) {
        let runner = self.runner.clone();
        let jobs = self.jobs.clone();
        let schedule = self.schedule.clone();
        let handle_arc = self.handle.clone();

        let handle = tokio::spawn(async move {
            info!("scheduler started, waiting for first tick");

            loop {
                let mut upcoming = schedule.upcoming(chrono::Utc);
                if let Some(next_tick) = upcoming.next() {
                    let now = chrono::Utc::now();
                    if next_tick > now {
                        let duration = (next_tick - now).to_std().unwrap_or_default();
                        tokio::time::sleep(duration).await;
                    }
                } else {
                    tokio::time::sleep(tokio::time::Duration::from_secs(60)).await;
                    continue;
                }

                debug!(jobs = jobs.len(), "scheduler tick");
                for job in &jobs {
                    // Structured job failures were already recovered into
                    // envelopes; only unexpected faults and publish errors
                    // surface here.
                    if let Err(e) = job.run(&runner).await {
                        error!(job = %job.name(), error = %e, "scheduled job run failed");
                    }
                }
            }
        });

        let mut h = handle_arc.write().await;
        *h = Some(handle);
    }

    pub async fn stop(&self) {
        let mut handle = self.handle.write().await;
        if let Some(h) = handle.take() {
            h.abort();
            info!("scheduler stopped");
        }
    }

    pub async fn is_running(&self) -> bool {
        let handle = self.handle.read().await;
        handle.is_some()
    }
}

/// Convert a refresh interval to a six-field cron expression
/// (second minute hour day month weekday).
pub fn cron_expression(interval_seconds: u64) -> String {
    if interval_seconds >= 60 {
        format!("0 */{} * * * *", interval_seconds / 60)
    } else {
        format!("*/{} * * * * *", interval_seconds)
    }
}
