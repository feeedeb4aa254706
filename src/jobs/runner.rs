//! Job execution wrapper
//!
//! The runner owns every cross-cutting concern of a job run: timing,
//! outcome classification, envelope construction and the publish. Business
//! logic only returns a discriminated outcome; it never builds envelopes.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::messaging::broker::BrokerError;
use crate::messaging::envelope::JobEnvelope;
use crate::messaging::publisher::EnvelopePublisher;
use crate::metrics::Metrics;
use crate::services::market_data::MarketDataError;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("market data error: {0}")]
    MarketData(#[from] MarketDataError),
    #[error("failed to encode job result: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("publish failed: {0}")]
    Publish(#[from] BrokerError),
    #[error("{0}")]
    Other(String),
}

/// Result of a job's business logic.
///
/// `Failed` is a structured failure the job itself reported; it is
/// recovered into a failed envelope and never propagated. Unexpected
/// faults travel as `Err(JobError)` out of [`Job::execute`] instead.
#[derive(Debug)]
pub enum JobOutcome<T> {
    Completed(T),
    Failed(Vec<String>),
}

/// A scheduled job's business logic as a capability.
#[async_trait]
pub trait Job: Send + Sync {
    type Output: Serialize + Send + Sync;

    /// Human-readable identity, used for routing diagnostics and logging.
    fn name(&self) -> &str;

    /// Coarse category, constant per job family.
    fn job_type(&self) -> &str {
        "data-sync"
    }

    /// Routing key the outcome envelope is published under.
    fn routing_key(&self) -> &str;

    async fn execute(&self) -> Result<JobOutcome<Self::Output>, JobError>;
}

/// Wraps job invocations with timing, envelope construction and publishing.
pub struct JobRunner {
    publisher: EnvelopePublisher,
    source: String,
    metrics: Option<Arc<Metrics>>,
}

impl JobRunner {
    pub fn new(publisher: EnvelopePublisher, source: &str) -> Self {
        Self {
            publisher,
            source: source.to_string(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Run one job and publish its outcome envelope.
    ///
    /// Structured failures are recovered: the failed envelope is the whole
    /// story and `invoke` returns `Ok`. An unexpected fault is published
    /// too, but then returned to the caller so the scheduling layer's own
    /// fault handling sees it. Publish errors propagate either way; the
    /// runner never retries a publish.
    pub async fn invoke<J: Job>(&self, job: &J) -> Result<(), JobError> {
        info!(job = %job.name(), "job starting");

        let started = Instant::now();
        let outcome = job.execute().await;
        let elapsed = started.elapsed();

        if let Some(m) = &self.metrics {
            m.job_duration_seconds.observe(elapsed.as_secs_f64());
        }

        match outcome {
            Ok(JobOutcome::Completed(output)) => {
                let data = serde_json::to_value(&output)?;
                let envelope =
                    JobEnvelope::succeeded(job.name(), job.job_type(), &self.source, data);
                self.publish(job.routing_key(), &envelope).await?;
                info!(
                    job = %job.name(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "job completed, outcome published"
                );
                if let Some(m) = &self.metrics {
                    m.jobs_completed_total.inc();
                }
                Ok(())
            }
            Ok(JobOutcome::Failed(errors)) => {
                let envelope = JobEnvelope::failed(
                    job.name(),
                    job.job_type(),
                    &self.source,
                    errors.join("; "),
                );
                self.publish(job.routing_key(), &envelope).await?;
                warn!(
                    job = %job.name(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    errors = errors.len(),
                    "job reported failure, outcome published"
                );
                if let Some(m) = &self.metrics {
                    m.jobs_completed_total.inc();
                }
                Ok(())
            }
            Err(fault) => {
                let envelope = JobEnvelope::failed(
                    job.name(),
                    job.job_type(),
                    &self.source,
                    fault.to_string(),
                );
                // The failed envelope must reach the broker before the
                // fault propagates to the caller.
                self.publish(job.routing_key(), &envelope).await?;
                error!(
                    job = %job.name(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    error = %fault,
                    "job faulted, failure envelope published"
                );
                if let Some(m) = &self.metrics {
                    m.jobs_failed_total.inc();
                }
                Err(fault)
            }
        }
    }

    async fn publish(&self, routing_key: &str, envelope: &JobEnvelope) -> Result<(), BrokerError> {
        self.publisher.publish(routing_key, envelope).await?;
        if let Some(m) = &self.metrics {
            m.envelopes_published_total.inc();
        }
        Ok(())
    }
}

/// Object-safe view of [`Job`] so heterogeneous jobs can share a schedule.
#[async_trait]
pub trait RunnableJob: Send + Sync {
    fn name(&self) -> &str;
    async fn run(&self, runner: &JobRunner) -> Result<(), JobError>;
}

#[async_trait]
impl<J: Job> RunnableJob for J {
    fn name(&self) -> &str {
        Job::name(self)
    }

    async fn run(&self, runner: &JobRunner) -> Result<(), JobError> {
        runner.invoke(self).await
    }
}
