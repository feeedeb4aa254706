//! End-to-end pipeline tests over the in-memory broker
//!
//! Producer (runner), broker topology and consumer run in-process so the
//! full publish → route → consume → dispatch → fan-out path is observable.

#[path = "test_utils.rs"]
mod test_utils;

use std::sync::Arc;
use std::time::Duration;

use coindeck::core::warmup::WarmupCoordinator;
use coindeck::handlers::{SpotCoinsHandler, WarmupHandler};
use coindeck::jobs::market::{SpotCoinsCacheWarmupJob, SpotCoinsRefreshJob, SPOT_COINS_WARMUP_JOB};
use coindeck::jobs::runner::JobRunner;
use coindeck::messaging::broker::MessageBroker;
use coindeck::messaging::consumer::{ConsumerError, ConsumerManager};
use coindeck::messaging::envelope::JobEnvelope;
use coindeck::messaging::handler::MessageHandler;
use coindeck::messaging::memory::InMemoryBroker;
use coindeck::messaging::publisher::EnvelopePublisher;
use coindeck::messaging::topology::{queues, routing, BrokerTopology};
use coindeck::push::SPOT_COINS_GROUP;
use tokio::sync::watch;

use test_utils::{
    sample_coins, wait_for, FailureMode, ProviderMode, RecordingPush, ScriptedHandler,
    StubProvider,
};

async fn broker_with_topology() -> Arc<InMemoryBroker> {
    let broker = Arc::new(InMemoryBroker::new());
    broker
        .ensure_topology(&BrokerTopology::market_data())
        .await
        .unwrap();
    broker
}

fn runner_over(broker: &Arc<InMemoryBroker>) -> JobRunner {
    let dyn_broker: Arc<dyn MessageBroker> = broker.clone();
    JobRunner::new(EnvelopePublisher::new(dyn_broker), "test-worker")
}

fn decode_published(broker: &InMemoryBroker) -> Vec<JobEnvelope> {
    broker
        .published()
        .iter()
        .map(|(_, payload)| serde_json::from_slice(payload).unwrap())
        .collect()
}

#[tokio::test]
async fn successful_job_publishes_one_success_envelope() {
    let broker = broker_with_topology().await;
    let runner = runner_over(&broker);
    let provider = Arc::new(StubProvider {
        mode: ProviderMode::Coins(sample_coins(5)),
    });

    let job = SpotCoinsCacheWarmupJob::new(provider);
    runner.invoke(&job).await.unwrap();

    let published = decode_published(&broker);
    assert_eq!(published.len(), 1);
    let envelope = &published[0];
    assert_eq!(envelope.job_name, SPOT_COINS_WARMUP_JOB);
    assert!(envelope.success);
    assert_eq!(envelope.source, "test-worker");
    let coins: Vec<coindeck::models::SpotCoin> = envelope.decode_data().unwrap().unwrap();
    assert_eq!(coins.len(), 5);

    // Routed into the warmup queue by the topic binding.
    assert_eq!(broker.stats(queues::WARMUP).depth, 1);
}

#[tokio::test]
async fn structured_failure_is_recovered_into_a_failed_envelope() {
    let broker = broker_with_topology().await;
    let runner = runner_over(&broker);
    let provider = Arc::new(StubProvider {
        mode: ProviderMode::Unavailable,
    });

    let job = SpotCoinsRefreshJob::new(provider);
    runner.invoke(&job).await.unwrap();

    let published = decode_published(&broker);
    assert_eq!(published.len(), 1);
    assert!(!published[0].success);
    assert!(published[0]
        .error_message
        .as_deref()
        .unwrap()
        .contains("503"));
}

#[tokio::test]
async fn warmup_with_nothing_to_warm_is_a_structured_failure() {
    let broker = broker_with_topology().await;
    let runner = runner_over(&broker);
    let provider = Arc::new(StubProvider {
        mode: ProviderMode::Empty,
    });

    runner
        .invoke(&SpotCoinsCacheWarmupJob::new(provider))
        .await
        .unwrap();

    let published = decode_published(&broker);
    assert_eq!(published.len(), 1);
    assert!(!published[0].success);
    assert!(published[0]
        .error_message
        .as_deref()
        .unwrap()
        .contains("no spot coins"));
}

#[tokio::test]
async fn faulting_job_publishes_the_failure_and_rethrows() {
    let broker = broker_with_topology().await;
    let runner = runner_over(&broker);
    let provider = Arc::new(StubProvider {
        mode: ProviderMode::Malformed,
    });

    let job = SpotCoinsRefreshJob::new(provider);
    let result = runner.invoke(&job).await;

    // The fault must propagate to the caller...
    let error = result.unwrap_err();
    assert!(error.to_string().contains("malformed provider payload"));

    // ...but only after exactly one failed envelope reached the broker.
    let published = decode_published(&broker);
    assert_eq!(published.len(), 1);
    assert!(!published[0].success);
    assert!(published[0]
        .error_message
        .as_deref()
        .unwrap()
        .contains("malformed provider payload"));
}

#[tokio::test]
async fn consumer_dispatches_success_envelopes_to_the_push_group() {
    let broker = broker_with_topology().await;
    let runner = runner_over(&broker);
    let provider = Arc::new(StubProvider {
        mode: ProviderMode::Coins(sample_coins(3)),
    });
    runner
        .invoke(&SpotCoinsRefreshJob::new(provider))
        .await
        .unwrap();

    let push = Arc::new(RecordingPush::new());
    let handler: Arc<dyn MessageHandler<JobEnvelope>> =
        Arc::new(SpotCoinsHandler::new(push.clone()));
    let dyn_broker: Arc<dyn MessageBroker> = broker.clone();
    let manager = ConsumerManager::new(dyn_broker);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    manager
        .start_consuming(queues::SPOT_COINS, handler, shutdown_rx)
        .await
        .unwrap();

    wait_for("spot envelope to be acknowledged", || {
        broker.stats(queues::SPOT_COINS).acked == 1
    })
    .await;

    let events = push.group_events.lock().unwrap();
    assert_eq!(events.len(), 1);
    let (group, event, payload) = &events[0];
    assert_eq!(group, SPOT_COINS_GROUP);
    assert_eq!(event, "spot-coins-updated");
    assert_eq!(payload.as_array().unwrap().len(), 3);
    drop(events);

    manager.stop_consuming().await;
}

#[tokio::test]
async fn validation_failures_are_dropped_without_requeue() {
    let broker = broker_with_topology().await;
    let envelope = JobEnvelope::succeeded("Spot Coins Refresh", "data-sync", "t", serde_json::json!([]));
    broker
        .publish(routing::SPOT_COINS_REFRESH, serde_json::to_vec(&envelope).unwrap())
        .await
        .unwrap();

    let handler: Arc<dyn MessageHandler<JobEnvelope>> =
        Arc::new(ScriptedHandler::new(FailureMode::AlwaysValidation));
    let dyn_broker: Arc<dyn MessageBroker> = broker.clone();
    let manager = ConsumerManager::new(dyn_broker);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    manager
        .start_consuming(queues::SPOT_COINS, handler, shutdown_rx)
        .await
        .unwrap();

    wait_for("message to be dropped", || {
        broker.stats(queues::SPOT_COINS).dropped == 1
    })
    .await;

    let stats = broker.stats(queues::SPOT_COINS);
    assert_eq!(stats.requeued, 0);
    assert_eq!(stats.acked, 0);
    assert_eq!(stats.depth, 0);

    manager.stop_consuming().await;
}

#[tokio::test]
async fn transient_failures_requeue_and_eventually_ack() {
    let broker = broker_with_topology().await;
    let envelope = JobEnvelope::succeeded("Spot Coins Refresh", "data-sync", "t", serde_json::json!([]));
    broker
        .publish(routing::SPOT_COINS_REFRESH, serde_json::to_vec(&envelope).unwrap())
        .await
        .unwrap();

    let handler: Arc<dyn MessageHandler<JobEnvelope>> =
        Arc::new(ScriptedHandler::new(FailureMode::TimeoutOnce));
    let dyn_broker: Arc<dyn MessageBroker> = broker.clone();
    let manager = ConsumerManager::new(dyn_broker);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    manager
        .start_consuming(queues::SPOT_COINS, handler, shutdown_rx)
        .await
        .unwrap();

    wait_for("redelivered message to be acknowledged", || {
        broker.stats(queues::SPOT_COINS).acked == 1
    })
    .await;

    let stats = broker.stats(queues::SPOT_COINS);
    assert_eq!(stats.requeued, 1);
    assert_eq!(stats.dropped, 0);

    manager.stop_consuming().await;
}

#[tokio::test]
async fn undecodable_payloads_are_treated_as_poison() {
    let broker = broker_with_topology().await;
    broker
        .publish(routing::SPOT_COINS_REFRESH, b"not json at all".to_vec())
        .await
        .unwrap();

    let handler: Arc<dyn MessageHandler<JobEnvelope>> =
        Arc::new(ScriptedHandler::new(FailureMode::TimeoutOnce));
    let dyn_broker: Arc<dyn MessageBroker> = broker.clone();
    let manager = ConsumerManager::new(dyn_broker);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    manager
        .start_consuming(queues::SPOT_COINS, handler, shutdown_rx)
        .await
        .unwrap();

    wait_for("poison message to be dropped", || {
        broker.stats(queues::SPOT_COINS).dropped == 1
    })
    .await;
    assert_eq!(broker.stats(queues::SPOT_COINS).requeued, 0);

    manager.stop_consuming().await;
}

#[tokio::test]
async fn prefetch_one_bounds_unacknowledged_messages() {
    let broker = broker_with_topology().await;
    for _ in 0..5 {
        let envelope =
            JobEnvelope::succeeded("Spot Coins Refresh", "data-sync", "t", serde_json::json!([]));
        broker
            .publish(routing::SPOT_COINS_REFRESH, serde_json::to_vec(&envelope).unwrap())
            .await
            .unwrap();
    }

    let handler: Arc<dyn MessageHandler<JobEnvelope>> = Arc::new(ScriptedHandler::new(
        FailureMode::SlowSuccess(Duration::from_millis(15)),
    ));
    let dyn_broker: Arc<dyn MessageBroker> = broker.clone();
    let manager = ConsumerManager::new(dyn_broker);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    manager
        .start_consuming(queues::SPOT_COINS, handler, shutdown_rx)
        .await
        .unwrap();

    wait_for("all five messages to be acknowledged", || {
        broker.stats(queues::SPOT_COINS).acked == 5
    })
    .await;

    assert_eq!(broker.stats(queues::SPOT_COINS).peak_in_flight, 1);

    manager.stop_consuming().await;
}

#[tokio::test]
async fn duplicate_subscription_is_a_conflict() {
    let broker = broker_with_topology().await;
    let dyn_broker: Arc<dyn MessageBroker> = broker.clone();
    let manager = ConsumerManager::new(dyn_broker);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let first: Arc<dyn MessageHandler<JobEnvelope>> =
        Arc::new(ScriptedHandler::new(FailureMode::TimeoutOnce));
    manager
        .start_consuming(queues::KLINES, first, shutdown_rx.clone())
        .await
        .unwrap();

    let second: Arc<dyn MessageHandler<JobEnvelope>> =
        Arc::new(ScriptedHandler::new(FailureMode::TimeoutOnce));
    let result = manager
        .start_consuming(queues::KLINES, second, shutdown_rx)
        .await;
    assert!(matches!(result, Err(ConsumerError::AlreadyConsuming(_))));

    manager.stop_consuming().await;
}

#[tokio::test]
async fn setup_is_cancelled_when_shutdown_is_already_signalled() {
    let broker = broker_with_topology().await;
    let dyn_broker: Arc<dyn MessageBroker> = broker.clone();
    let manager = ConsumerManager::new(dyn_broker);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    shutdown_tx.send(true).unwrap();

    let handler: Arc<dyn MessageHandler<JobEnvelope>> =
        Arc::new(ScriptedHandler::new(FailureMode::TimeoutOnce));
    let result = manager
        .start_consuming(queues::KLINES, handler, shutdown_rx)
        .await;
    assert!(matches!(result, Err(ConsumerError::SetupCancelled(_))));
    assert!(manager.active_queues().is_empty());
}

#[tokio::test]
async fn stop_consuming_clears_all_subscriptions_and_is_reentrant() {
    let broker = broker_with_topology().await;
    let dyn_broker: Arc<dyn MessageBroker> = broker.clone();
    let manager = ConsumerManager::new(dyn_broker);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let handler: Arc<dyn MessageHandler<JobEnvelope>> =
        Arc::new(ScriptedHandler::new(FailureMode::TimeoutOnce));
    manager
        .start_consuming(queues::WARMUP, handler, shutdown_rx)
        .await
        .unwrap();
    assert_eq!(manager.active_queues(), vec![queues::WARMUP.to_string()]);

    manager.stop_consuming().await;
    assert!(manager.active_queues().is_empty());

    // Stopping again with nothing tracked is a no-op.
    manager.stop_consuming().await;
}

#[tokio::test]
async fn ensure_topology_is_idempotent_under_concurrency() {
    let broker = Arc::new(InMemoryBroker::new());
    let topology = BrokerTopology::market_data();

    let a = {
        let broker = broker.clone();
        let topology = topology.clone();
        tokio::spawn(async move { broker.ensure_topology(&topology).await })
    };
    let b = {
        let broker = broker.clone();
        let topology = topology.clone();
        tokio::spawn(async move { broker.ensure_topology(&topology).await })
    };
    a.await.unwrap().unwrap();
    b.await.unwrap().unwrap();

    assert_eq!(broker.bindings().len(), topology.bindings.len());
}

#[tokio::test]
async fn warmup_scenario_broadcasts_ready_exactly_once() {
    let broker = broker_with_topology().await;
    let runner = runner_over(&broker);
    let provider = Arc::new(StubProvider {
        mode: ProviderMode::Coins(sample_coins(5)),
    });

    // Consumer side: warmup coordinator + recording push channel.
    let warmup = Arc::new(WarmupCoordinator::new());
    let push = Arc::new(RecordingPush::new());
    let handler: Arc<dyn MessageHandler<JobEnvelope>> =
        Arc::new(WarmupHandler::new(warmup.clone(), push.clone()));
    let dyn_broker: Arc<dyn MessageBroker> = broker.clone();
    let manager = ConsumerManager::new(dyn_broker);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    manager
        .start_consuming(queues::WARMUP, handler, shutdown_rx)
        .await
        .unwrap();

    // First successful run: one envelope, coordinator flips, one "ready".
    let job = SpotCoinsCacheWarmupJob::new(provider.clone());
    runner.invoke(&job).await.unwrap();
    wait_for("first warmup envelope to be consumed", || {
        broker.stats(queues::WARMUP).acked == 1
    })
    .await;

    assert!(warmup.is_warmed_up());
    assert_eq!(push.all_event_count(), 1);
    assert_eq!(push.all_events.lock().unwrap()[0].0, "ready");

    // Second successful run must not trigger a second broadcast.
    runner.invoke(&job).await.unwrap();
    wait_for("second warmup envelope to be consumed", || {
        broker.stats(queues::WARMUP).acked == 2
    })
    .await;

    assert!(warmup.is_warmed_up());
    assert_eq!(push.all_event_count(), 1);
    assert_eq!(push.group_event_count(), 0);

    manager.stop_consuming().await;
}
