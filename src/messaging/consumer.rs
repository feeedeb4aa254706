//! Per-queue consumer lifecycle management
//!
//! One `ConsumerManager` per process. Each subscribed queue gets a
//! dedicated channel with prefetch 1, a receive task, and an explicit
//! acknowledgment policy driven by [`classify_failure`]. Handler failures
//! never crash a receive loop; they only decide how the delivery is
//! settled.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::messaging::broker::{
    BrokerError, Delivery, DeliveryAcker, MessageBroker, QueueSubscription,
};
use crate::messaging::handler::{classify_failure, AckAction, HandlerError, MessageHandler};
use crate::metrics::Metrics;

/// At most one unacknowledged message per channel. Guarantees fair load
/// distribution across consumer instances sharing a queue and bounds
/// in-flight work.
pub const PREFETCH_COUNT: u16 = 1;

#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("consumer for queue '{0}' already exists")]
    AlreadyConsuming(String),
    #[error("consumer setup for queue '{0}' was cancelled")]
    SetupCancelled(String),
    #[error(transparent)]
    Broker(#[from] BrokerError),
}

struct ActiveConsumer {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

pub struct ConsumerManager {
    broker: Arc<dyn MessageBroker>,
    consumers: DashMap<String, ActiveConsumer>,
    metrics: Option<Arc<Metrics>>,
}

impl ConsumerManager {
    pub fn new(broker: Arc<dyn MessageBroker>) -> Self {
        Self {
            broker,
            consumers: DashMap::new(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Subscribe `handler` to `queue`.
    ///
    /// `shutdown` aborts the setup phase if it fires before the channel is
    /// registered, and later stops the receive loop; keep its sender alive
    /// for the consumer's lifetime. A queue that already has an active
    /// consumer is a logical conflict, not a silent duplicate.
    pub async fn start_consuming<T>(
        &self,
        queue: &str,
        handler: Arc<dyn MessageHandler<T>>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(), ConsumerError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        if self.consumers.contains_key(queue) {
            warn!(queue = %queue, "consumer for queue already exists");
            return Err(ConsumerError::AlreadyConsuming(queue.to_string()));
        }

        let mut shutdown = shutdown;
        if *shutdown.borrow() {
            return Err(ConsumerError::SetupCancelled(queue.to_string()));
        }

        let subscription = tokio::select! {
            result = self.broker.consume(queue, PREFETCH_COUNT) => result?,
            _ = wait_for_shutdown(&mut shutdown) => {
                return Err(ConsumerError::SetupCancelled(queue.to_string()));
            }
        };

        let (stop_tx, stop_rx) = watch::channel(false);

        // Re-check under the map entry: a racing subscriber may have
        // registered while the channel was being opened.
        let raced = match self.consumers.entry(queue.to_string()) {
            Entry::Occupied(_) => Some(subscription),
            Entry::Vacant(slot) => {
                let task = tokio::spawn(receive_loop(
                    queue.to_string(),
                    subscription,
                    handler,
                    shutdown,
                    stop_rx,
                    self.metrics.clone(),
                ));
                slot.insert(ActiveConsumer {
                    stop: stop_tx,
                    task,
                });
                None
            }
        };

        if let Some(mut subscription) = raced {
            let _ = subscription.cancel().await;
            let _ = subscription.close().await;
            warn!(queue = %queue, "consumer for queue already exists");
            return Err(ConsumerError::AlreadyConsuming(queue.to_string()));
        }

        info!(queue = %queue, prefetch = PREFETCH_COUNT, "consumer registered");
        Ok(())
    }

    /// Tear down every tracked consumer: signal its loop, await the task
    /// (in-flight handlers finish first), and clear the tracking map.
    /// Tolerates channels that are already closed.
    pub async fn stop_consuming(&self) {
        let queues: Vec<String> = self.consumers.iter().map(|e| e.key().clone()).collect();
        for queue in queues {
            if let Some((_, active)) = self.consumers.remove(&queue) {
                let _ = active.stop.send(true);
                if let Err(e) = active.task.await {
                    warn!(queue = %queue, error = %e, "consumer task did not shut down cleanly");
                } else {
                    info!(queue = %queue, "consumer shut down");
                }
            }
        }
        self.consumers.clear();
    }

    /// Queues with an active consumer.
    pub fn active_queues(&self) -> Vec<String> {
        self.consumers.iter().map(|e| e.key().clone()).collect()
    }
}

/// Resolves when the shutdown flag becomes true or its sender is dropped.
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

async fn receive_loop<T>(
    queue: String,
    mut subscription: Box<dyn QueueSubscription>,
    handler: Arc<dyn MessageHandler<T>>,
    mut shutdown: watch::Receiver<bool>,
    mut stop: watch::Receiver<bool>,
    metrics: Option<Arc<Metrics>>,
) where
    T: DeserializeOwned + Send + 'static,
{
    info!(queue = %queue, "consumer loop started");

    loop {
        // Shutdown is only observed between deliveries, so an in-flight
        // handler invocation always completes before teardown.
        let delivery = tokio::select! {
            _ = wait_for_shutdown(&mut shutdown) => break,
            _ = wait_for_shutdown(&mut stop) => break,
            delivery = subscription.next_delivery() => match delivery {
                Some(delivery) => delivery,
                None => {
                    warn!(queue = %queue, "delivery stream ended");
                    break;
                }
            },
        };

        process_delivery(&queue, delivery, handler.as_ref(), metrics.as_deref()).await;
    }

    if let Err(e) = subscription.cancel().await {
        debug!(queue = %queue, error = %e, "consumer cancel failed");
    }
    if let Err(e) = subscription.close().await {
        debug!(queue = %queue, error = %e, "channel close failed");
    }
    info!(queue = %queue, "consumer loop stopped");
}

async fn process_delivery<T>(
    queue: &str,
    delivery: Delivery,
    handler: &dyn MessageHandler<T>,
    metrics: Option<&Metrics>,
) where
    T: DeserializeOwned + Send,
{
    let Delivery { payload, acker } = delivery;

    // Poison messages: nothing a redelivery could fix.
    if payload.is_empty() {
        warn!(queue = %queue, "empty payload, dropping message");
        settle(queue, acker.nack(false).await);
        if let Some(m) = metrics {
            m.messages_dropped_total.inc();
        }
        return;
    }

    let message: T = match serde_json::from_slice(&payload) {
        Ok(message) => message,
        Err(e) => {
            warn!(queue = %queue, error = %e, "undecodable payload, dropping message");
            settle(queue, acker.nack(false).await);
            if let Some(m) = metrics {
                m.messages_dropped_total.inc();
            }
            return;
        }
    };

    match handler.handle(message).await {
        Ok(()) => {
            settle(queue, acker.ack().await);
            if let Some(m) = metrics {
                m.messages_acked_total.inc();
            }
        }
        Err(e) => {
            let action = classify_failure(&e);
            log_failure(queue, &e, action);
            match action {
                AckAction::Drop => {
                    settle(queue, acker.nack(false).await);
                    if let Some(m) = metrics {
                        m.messages_dropped_total.inc();
                    }
                }
                AckAction::Requeue => {
                    settle(queue, acker.nack(true).await);
                    if let Some(m) = metrics {
                        m.messages_requeued_total.inc();
                    }
                }
            }
        }
    }
}

fn log_failure(queue: &str, error: &HandlerError, action: AckAction) {
    warn!(
        queue = %queue,
        error = %error,
        action = ?action,
        "handler failed, message {}",
        match action {
            AckAction::Drop => "dropped",
            AckAction::Requeue => "requeued",
        }
    );
}

fn settle(queue: &str, result: Result<(), BrokerError>) {
    if let Err(e) = result {
        error!(queue = %queue, error = %e, "failed to settle delivery");
    }
}
