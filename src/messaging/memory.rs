//! In-memory broker for tests and single-process development
//!
//! Implements the same contract as the AMQP broker: topic-pattern routing
//! into FIFO queues, per-subscription prefetch gating, and ack/nack with
//! requeue-or-drop. Exposes per-queue statistics (including the peak
//! number of unacknowledged deliveries) so flow-control and acknowledgment
//! behavior can be asserted without a live broker.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Notify;

use crate::messaging::broker::{
    BrokerError, Delivery, DeliveryAcker, MessageBroker, QueueSubscription,
};
use crate::messaging::topology::{BrokerTopology, QueueBinding};

/// Point-in-time view of one queue's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub depth: usize,
    pub acked: u64,
    pub requeued: u64,
    pub dropped: u64,
    pub in_flight: u64,
    pub peak_in_flight: u64,
}

#[derive(Default)]
struct QueueState {
    messages: Mutex<VecDeque<Vec<u8>>>,
    notify: Notify,
    acked: AtomicU64,
    requeued: AtomicU64,
    dropped: AtomicU64,
    in_flight: AtomicU64,
    peak_in_flight: AtomicU64,
}

#[derive(Default)]
pub struct InMemoryBroker {
    bindings: RwLock<Vec<QueueBinding>>,
    queues: DashMap<String, Arc<QueueState>>,
    published: Mutex<Vec<(String, Vec<u8>)>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every publish observed, in order, as (routing key, payload).
    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.published.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn stats(&self, queue: &str) -> QueueStats {
        match self.queues.get(queue) {
            None => QueueStats::default(),
            Some(state) => QueueStats {
                depth: state.messages.lock().unwrap_or_else(|e| e.into_inner()).len(),
                acked: state.acked.load(Ordering::Acquire),
                requeued: state.requeued.load(Ordering::Acquire),
                dropped: state.dropped.load(Ordering::Acquire),
                in_flight: state.in_flight.load(Ordering::Acquire),
                peak_in_flight: state.peak_in_flight.load(Ordering::Acquire),
            },
        }
    }

    /// Current bindings, for topology-convergence assertions.
    pub fn bindings(&self) -> Vec<QueueBinding> {
        self.bindings.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn ensure_topology(&self, topology: &BrokerTopology) -> Result<(), BrokerError> {
        let mut bindings = self.bindings.write().unwrap_or_else(|e| e.into_inner());
        for binding in &topology.bindings {
            self.queues
                .entry(binding.queue.clone())
                .or_insert_with(|| Arc::new(QueueState::default()));
            if !bindings.contains(binding) {
                bindings.push(binding.clone());
            }
        }
        Ok(())
    }

    async fn publish(&self, routing_key: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        self.published
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((routing_key.to_string(), payload.clone()));

        let bindings = self.bindings.read().unwrap_or_else(|e| e.into_inner()).clone();
        for binding in bindings {
            if !topic_matches(&binding.routing_key, routing_key) {
                continue;
            }
            if let Some(state) = self.queues.get(&binding.queue) {
                state
                    .messages
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .push_back(payload.clone());
                state.notify.notify_one();
            }
        }
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        prefetch: u16,
    ) -> Result<Box<dyn QueueSubscription>, BrokerError> {
        let state = self
            .queues
            .get(queue)
            .map(|s| s.clone())
            .ok_or_else(|| BrokerError::Consume(format!("queue '{}' does not exist", queue)))?;

        Ok(Box::new(MemoryQueueSubscription {
            state,
            prefetch: prefetch as u64,
            outstanding: Arc::new(AtomicU64::new(0)),
            cancelled: Arc::new(AtomicBool::new(false)),
        }))
    }
}

struct MemoryQueueSubscription {
    state: Arc<QueueState>,
    prefetch: u64,
    outstanding: Arc<AtomicU64>,
    cancelled: Arc<AtomicBool>,
}

#[async_trait]
impl QueueSubscription for MemoryQueueSubscription {
    async fn next_delivery(&mut self) -> Option<Delivery> {
        loop {
            if self.cancelled.load(Ordering::Acquire) {
                return None;
            }

            if self.outstanding.load(Ordering::Acquire) < self.prefetch {
                let next = self
                    .state
                    .messages
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .pop_front();
                if let Some(payload) = next {
                    self.outstanding.fetch_add(1, Ordering::AcqRel);
                    let in_flight = self.state.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
                    self.state
                        .peak_in_flight
                        .fetch_max(in_flight, Ordering::AcqRel);
                    return Some(Delivery {
                        payload: payload.clone(),
                        acker: Box::new(MemoryAcker {
                            state: self.state.clone(),
                            outstanding: self.outstanding.clone(),
                            payload,
                        }),
                    });
                }
            }

            let notified = self.state.notify.notified();
            if self.cancelled.load(Ordering::Acquire) {
                return None;
            }
            notified.await;
        }
    }

    async fn cancel(&mut self) -> Result<(), BrokerError> {
        self.cancelled.store(true, Ordering::Release);
        self.state.notify.notify_waiters();
        self.state.notify.notify_one();
        Ok(())
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        Ok(())
    }
}

struct MemoryAcker {
    state: Arc<QueueState>,
    outstanding: Arc<AtomicU64>,
    payload: Vec<u8>,
}

impl MemoryAcker {
    fn settle(&self) {
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
        self.state.in_flight.fetch_sub(1, Ordering::AcqRel);
        self.state.notify.notify_one();
    }
}

#[async_trait]
impl DeliveryAcker for MemoryAcker {
    async fn ack(self: Box<Self>) -> Result<(), BrokerError> {
        self.state.acked.fetch_add(1, Ordering::AcqRel);
        self.settle();
        Ok(())
    }

    async fn nack(self: Box<Self>, requeue: bool) -> Result<(), BrokerError> {
        if requeue {
            self.state
                .messages
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push_front(self.payload.clone());
            self.state.requeued.fetch_add(1, Ordering::AcqRel);
        } else {
            self.state.dropped.fetch_add(1, Ordering::AcqRel);
        }
        self.settle();
        Ok(())
    }
}

/// AMQP topic match: `*` matches exactly one dot-separated segment,
/// `#` matches zero or more.
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    fn matches(pattern: &[&str], key: &[&str]) -> bool {
        match (pattern.first(), key.first()) {
            (None, None) => true,
            (Some(&"#"), _) => {
                matches(&pattern[1..], key) || (!key.is_empty() && matches(pattern, &key[1..]))
            }
            (Some(&"*"), Some(_)) => matches(&pattern[1..], &key[1..]),
            (Some(segment), Some(key_segment)) => {
                segment == key_segment && matches(&pattern[1..], &key[1..])
            }
            _ => false,
        }
    }

    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    matches(&pattern, &key)
}
