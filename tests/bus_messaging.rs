//! End-to-end pub/sub bus scenarios.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hsdb::bus::{Broker, Envelope, LocalBroker, ResponseStatus, ServiceManager};
use hsdb::config::BusConfig;
use hsdb::HsdbError;
use serde_json::json;

/// Scenario 3: dispatch round-trip. Unit A dispatches `ping` with
/// `{"n":42}` to unit B; B's handler replies `{"n":43}`; A observes the
/// response within the timeout.
#[tokio::test]
async fn dispatch_round_trip_resolves_with_handlers_reply() {
    let broker: Arc<dyn Broker> = Arc::new(LocalBroker::new());

    let unit_b = ServiceManager::new("unit-b", vec!["commands".to_string()], Arc::clone(&broker), BusConfig::default());
    unit_b.connect().unwrap();
    unit_b.register_handler(None, Some("dispatch".to_string()), |envelope| {
        if let Envelope::Dispatch { command, payload, .. } = envelope {
            if command == "ping" {
                let n = payload.get("n").and_then(|v| v.as_i64()).unwrap_or(0);
                return Ok(Some(json!({"n": n + 1})));
            }
        }
        Ok(None)
    });
    unit_b.start().unwrap();

    let unit_a = ServiceManager::new("unit-a", vec!["commands".to_string()], broker, BusConfig::default());
    unit_a.connect().unwrap();
    unit_a.start().unwrap();

    let response = unit_a.dispatch("unit-b", "ping", json!({"n": 42}), true).await.unwrap().expect("a response envelope");
    match response {
        Envelope::Response { payload, status, .. } => {
            assert_eq!(status, ResponseStatus::Ok);
            assert_eq!(payload.get("n"), Some(&json!(43)));
        }
        _ => panic!("expected a response envelope"),
    }

    unit_a.terminate().await.unwrap();
    unit_b.terminate().await.unwrap();
}

/// Boundary: dispatch with `await_response` and no listener resolves as a
/// timeout within the declared deadline.
#[tokio::test]
async fn dispatch_with_no_listener_times_out() {
    let broker: Arc<dyn Broker> = Arc::new(LocalBroker::new());
    let config = BusConfig { response_timeout: Duration::from_millis(50), ..BusConfig::default() };
    let manager = ServiceManager::new("lonely-unit", vec!["commands".to_string()], broker, config);
    manager.connect().unwrap();
    manager.start().unwrap();

    let started = std::time::Instant::now();
    let err = manager.dispatch("nobody", "ping", json!(null), true).await.unwrap_err();
    assert!(matches!(err, HsdbError::DispatchTimeout(_)));
    assert!(started.elapsed() < Duration::from_millis(500));

    manager.terminate().await.unwrap();
}

/// Handler routing: a handler scoped to one channel never sees envelopes
/// published to another, and a handler scoped to `dispatch` never fires for
/// a plain `broadcast` on the channel it does watch.
#[tokio::test]
async fn handler_channel_and_message_type_filters_are_respected() {
    let broker: Arc<dyn Broker> = Arc::new(LocalBroker::new());
    let manager =
        ServiceManager::new("filter-test", vec!["commands".to_string(), "notifications".to_string()], broker, BusConfig::default());
    manager.connect().unwrap();

    let notifications_seen = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&notifications_seen);
    manager.register_handler(Some("notifications".to_string()), Some("broadcast".to_string()), move |_| {
        seen.fetch_add(1, Ordering::SeqCst);
        Ok(None)
    });
    manager.start().unwrap();

    manager.broadcast_on("commands", "should-not-match-channel", json!(null)).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(notifications_seen.load(Ordering::SeqCst), 0);

    manager.dispatch_on("notifications", "someone", "should-not-match-type", json!(null), false).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(notifications_seen.load(Ordering::SeqCst), 0);

    manager.broadcast_on("notifications", "should-match", json!(null)).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(notifications_seen.load(Ordering::SeqCst), 1);

    manager.terminate().await.unwrap();
}
