//! Unit tests for the broker topology registry and topic matching

use coindeck::messaging::memory::topic_matches;
use coindeck::messaging::topology::{queues, routing, BrokerTopology};

#[test]
fn market_data_topology_binds_every_queue() {
    let topology = BrokerTopology::market_data();

    assert_eq!(topology.bindings.len(), 3);
    let bound: Vec<&str> = topology
        .bindings
        .iter()
        .map(|b| b.queue.as_str())
        .collect();
    assert!(bound.contains(&queues::SPOT_COINS));
    assert!(bound.contains(&queues::KLINES));
    assert!(bound.contains(&queues::WARMUP));
}

#[test]
fn published_routing_keys_match_their_queue_bindings() {
    let topology = BrokerTopology::market_data();

    let binding_for = |queue: &str| {
        topology
            .bindings
            .iter()
            .find(|b| b.queue == queue)
            .map(|b| b.routing_key.clone())
            .unwrap()
    };

    assert!(topic_matches(
        &binding_for(queues::SPOT_COINS),
        routing::SPOT_COINS_REFRESH
    ));
    assert!(topic_matches(
        &binding_for(queues::KLINES),
        routing::KLINES_REFRESH
    ));
    assert!(topic_matches(
        &binding_for(queues::WARMUP),
        routing::SPOT_COINS_WARMUP
    ));
}

#[test]
fn star_matches_exactly_one_segment() {
    assert!(topic_matches("jobs.spot-coins.*", "jobs.spot-coins.refresh"));
    assert!(!topic_matches("jobs.spot-coins.*", "jobs.spot-coins"));
    assert!(!topic_matches(
        "jobs.spot-coins.*",
        "jobs.spot-coins.refresh.extra"
    ));
    assert!(!topic_matches("jobs.spot-coins.*", "jobs.klines.refresh"));
}

#[test]
fn hash_matches_zero_or_more_segments() {
    assert!(topic_matches("jobs.warmup.#", "jobs.warmup"));
    assert!(topic_matches("jobs.warmup.#", "jobs.warmup.spot-coins"));
    assert!(topic_matches("jobs.warmup.#", "jobs.warmup.spot-coins.retry"));
    assert!(!topic_matches("jobs.warmup.#", "jobs.klines.refresh"));
}

#[test]
fn exact_pattern_requires_exact_key() {
    assert!(topic_matches("jobs.klines.refresh", "jobs.klines.refresh"));
    assert!(!topic_matches("jobs.klines.refresh", "jobs.klines.backfill"));
}
