//! Scheduled jobs and the execution wrapper that publishes their outcomes

pub mod market;
pub mod runner;

pub use market::{KlinesRefreshJob, SpotCoinsCacheWarmupJob, SpotCoinsRefreshJob};
pub use runner::{Job, JobError, JobOutcome, JobRunner, RunnableJob};
