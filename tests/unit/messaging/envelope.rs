//! Unit tests for the job-outcome envelope

use coindeck::messaging::envelope::JobEnvelope;
use coindeck::models::SpotCoin;
use serde_json::json;

fn sample_coin() -> SpotCoin {
    SpotCoin {
        symbol: "BTCUSDT".to_string(),
        last_price: 65000.5,
        price_change_percent: 1.25,
        volume: 1200.0,
        quote_volume: 78_000_000.0,
        high_price: 66000.0,
        low_price: 64000.0,
    }
}

#[test]
fn success_envelope_carries_data_and_no_error() {
    let data = serde_json::to_value(vec![sample_coin()]).unwrap();
    let envelope = JobEnvelope::succeeded("Spot Coins Refresh", "data-sync", "worker-1", data);

    assert!(envelope.success);
    assert!(envelope.data.is_some());
    assert!(envelope.error_message.is_none());
}

#[test]
fn failure_envelope_carries_error_and_no_data() {
    let envelope = JobEnvelope::failed(
        "Spot Coins Refresh",
        "data-sync",
        "worker-1",
        "upstream returned status 503".to_string(),
    );

    assert!(!envelope.success);
    assert!(envelope.data.is_none());
    assert_eq!(
        envelope.error_message.as_deref(),
        Some("upstream returned status 503")
    );
}

#[test]
fn wire_format_uses_camel_case_field_names() {
    let envelope = JobEnvelope::succeeded("Klines Refresh", "data-sync", "worker-1", json!([]));
    let wire = serde_json::to_value(&envelope).unwrap();

    assert_eq!(wire["jobName"], "Klines Refresh");
    assert_eq!(wire["jobType"], "data-sync");
    assert_eq!(wire["success"], true);
    assert_eq!(wire["source"], "worker-1");
    assert!(wire.get("completedAt").is_some());
    assert!(wire.get("errorMessage").is_some());
}

#[test]
fn round_trips_through_the_wire() {
    let envelope = JobEnvelope::failed("Klines Refresh", "data-sync", "worker-2", "boom".into());
    let bytes = serde_json::to_vec(&envelope).unwrap();
    let decoded: JobEnvelope = serde_json::from_slice(&bytes).unwrap();

    assert_eq!(decoded.job_name, "Klines Refresh");
    assert!(!decoded.success);
    assert_eq!(decoded.error_message.as_deref(), Some("boom"));
    assert!(decoded.data.is_none());
}

#[test]
fn decode_data_accepts_structured_payload() {
    let data = serde_json::to_value(vec![sample_coin()]).unwrap();
    let envelope = JobEnvelope::succeeded("Spot Coins Refresh", "data-sync", "worker-1", data);

    let coins: Option<Vec<SpotCoin>> = envelope.decode_data().unwrap();
    assert_eq!(coins.unwrap(), vec![sample_coin()]);
}

#[test]
fn decode_data_accepts_raw_encoded_string_payload() {
    // Some producers double-encode the payload as a JSON string.
    let raw = serde_json::to_string(&vec![sample_coin()]).unwrap();
    let envelope =
        JobEnvelope::succeeded("Spot Coins Refresh", "data-sync", "worker-1", json!(raw));

    let coins: Option<Vec<SpotCoin>> = envelope.decode_data().unwrap();
    assert_eq!(coins.unwrap(), vec![sample_coin()]);
}

#[test]
fn decode_data_on_missing_payload_is_none() {
    let envelope = JobEnvelope::failed("Spot Coins Refresh", "data-sync", "worker-1", "x".into());
    let coins: Option<Vec<SpotCoin>> = envelope.decode_data().unwrap();
    assert!(coins.is_none());
}

#[test]
fn decode_data_rejects_mismatched_payload() {
    let envelope = JobEnvelope::succeeded(
        "Spot Coins Refresh",
        "data-sync",
        "worker-1",
        json!({"not": "a list"}),
    );
    let result: Result<Option<Vec<SpotCoin>>, _> = envelope.decode_data();
    assert!(result.is_err());
}
