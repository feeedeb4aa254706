//! Job-outcome messaging pipeline
//!
//! A background job's outcome travels as a [`JobEnvelope`] from the worker
//! process through a topic exchange into durable queues, where the
//! dashboard service consumes it with per-queue channels and an explicit
//! acknowledgment policy.

pub mod amqp;
pub mod broker;
pub mod consumer;
pub mod envelope;
pub mod handler;
pub mod memory;
pub mod publisher;
pub mod topology;

pub use amqp::AmqpBroker;
pub use broker::{BrokerError, Delivery, DeliveryAcker, MessageBroker, QueueSubscription};
pub use consumer::{ConsumerError, ConsumerManager};
pub use envelope::JobEnvelope;
pub use handler::{classify_failure, AckAction, HandlerError, MessageHandler};
pub use memory::InMemoryBroker;
pub use publisher::EnvelopePublisher;
pub use topology::{queues, routing, BrokerTopology, QueueBinding};
