//! Prometheus metrics for the pipeline services
//!
//! One `Metrics` instance is created per process and shared via `Arc`.
//! The worker mostly touches the job-side counters, the dashboard service
//! the consumer- and push-side ones; both export through `GET /metrics`
//! or log scrapes.

use prometheus::{Gauge, Histogram, HistogramOpts, IntCounter, IntGauge, Registry, TextEncoder};

pub struct Metrics {
    registry: Registry,

    // Producer side
    pub jobs_completed_total: IntCounter,
    pub jobs_failed_total: IntCounter,
    pub envelopes_published_total: IntCounter,
    pub job_duration_seconds: Histogram,

    // Consumer side
    pub messages_acked_total: IntCounter,
    pub messages_requeued_total: IntCounter,
    pub messages_dropped_total: IntCounter,

    // Connectivity / fan-out
    pub broker_connected: Gauge,
    pub ws_clients_connected: IntGauge,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let jobs_completed_total = IntCounter::new(
            "coindeck_jobs_completed_total",
            "Jobs that finished with a success or structured-failure envelope",
        )?;
        let jobs_failed_total = IntCounter::new(
            "coindeck_jobs_failed_total",
            "Jobs that ended in an unexpected fault",
        )?;
        let envelopes_published_total = IntCounter::new(
            "coindeck_envelopes_published_total",
            "Job outcome envelopes accepted by the broker",
        )?;
        let job_duration_seconds = Histogram::with_opts(HistogramOpts::new(
            "coindeck_job_duration_seconds",
            "Wall-clock duration of job business logic",
        ))?;

        let messages_acked_total = IntCounter::new(
            "coindeck_messages_acked_total",
            "Deliveries acknowledged after successful handling",
        )?;
        let messages_requeued_total = IntCounter::new(
            "coindeck_messages_requeued_total",
            "Deliveries negatively acknowledged with requeue",
        )?;
        let messages_dropped_total = IntCounter::new(
            "coindeck_messages_dropped_total",
            "Deliveries negatively acknowledged without requeue",
        )?;

        let broker_connected = Gauge::new(
            "coindeck_broker_connected",
            "1 when the AMQP connection is established",
        )?;
        let ws_clients_connected = IntGauge::new(
            "coindeck_ws_clients_connected",
            "Currently connected dashboard websocket clients",
        )?;

        registry.register(Box::new(jobs_completed_total.clone()))?;
        registry.register(Box::new(jobs_failed_total.clone()))?;
        registry.register(Box::new(envelopes_published_total.clone()))?;
        registry.register(Box::new(job_duration_seconds.clone()))?;
        registry.register(Box::new(messages_acked_total.clone()))?;
        registry.register(Box::new(messages_requeued_total.clone()))?;
        registry.register(Box::new(messages_dropped_total.clone()))?;
        registry.register(Box::new(broker_connected.clone()))?;
        registry.register(Box::new(ws_clients_connected.clone()))?;

        Ok(Self {
            registry,
            jobs_completed_total,
            jobs_failed_total,
            envelopes_published_total,
            job_duration_seconds,
            messages_acked_total,
            messages_requeued_total,
            messages_dropped_total,
            broker_connected,
            ws_clients_connected,
        })
    }

    /// Export all registered metrics in the Prometheus text format.
    pub fn export(&self) -> Result<String, prometheus::Error> {
        TextEncoder::new().encode_to_string(&self.registry.gather())
    }
}
