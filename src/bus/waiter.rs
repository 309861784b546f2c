//! Correlation-id based request/response waiting.
//!
//! A `dispatch` that asks to await a response registers a one-shot waiter
//! keyed by its envelope id before publishing; the first `Response` whose
//! `request_id` matches fulfills it. A waiter that times out resolves to a
//! synthetic `response{status: timeout}` rather than hanging forever.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::oneshot;

use crate::bus::envelope::{Envelope, ResponseStatus};
use crate::error::{HsdbError, HsdbResult};

#[derive(Default)]
pub struct ResponseWaiter {
    pending: Mutex<HashMap<String, oneshot::Sender<Envelope>>>,
}

impl ResponseWaiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a waiter for `request_id` (the dispatch envelope's own
    /// `id`), returning a handle that resolves when `fulfill` is called with
    /// a matching response, or times out.
    fn register(&self, request_id: &str) -> oneshot::Receiver<Envelope> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().expect("response waiter poisoned").insert(request_id.to_string(), tx);
        rx
    }

    /// Feeds an incoming envelope to the waiter table. No-op unless it is a
    /// `Response` with a `request_id` that has a registered waiter.
    pub fn fulfill(&self, envelope: Envelope) {
        if let Envelope::Response { ref request_id, .. } = envelope {
            if let Some(sender) = self.pending.lock().expect("response waiter poisoned").remove(request_id) {
                let _ = sender.send(envelope);
            }
        }
    }

    /// Awaits a response to `request_id`, failing with
    /// `HsdbError::DispatchTimeout` if none arrives within `timeout`.
    pub async fn wait_for(&self, request_id: &str, timeout: Duration) -> HsdbResult<Envelope> {
        let receiver = self.register(request_id);
        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(envelope)) => Ok(envelope),
            Ok(Err(_)) => Err(HsdbError::DispatchTimeout(timeout)),
            Err(_) => {
                self.pending.lock().expect("response waiter poisoned").remove(request_id);
                Err(HsdbError::DispatchTimeout(timeout))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fulfilled_waiter_resolves_with_response() {
        let waiter = ResponseWaiter::new();
        let handle = waiter.wait_for("req-1", Duration::from_secs(1));
        waiter.fulfill(Envelope::response("b", "ctl", "req-1", ResponseStatus::Ok, serde_json::json!(42)));
        let response = handle.await.unwrap();
        match response {
            Envelope::Response { payload, .. } => assert_eq!(payload, serde_json::json!(42)),
            _ => panic!("wrong variant"),
        }
    }

    #[tokio::test]
    async fn unfulfilled_waiter_times_out() {
        let waiter = ResponseWaiter::new();
        let err = waiter.wait_for("req-2", Duration::from_millis(20)).await.unwrap_err();
        assert!(matches!(err, HsdbError::DispatchTimeout(_)));
    }

    #[tokio::test]
    async fn fulfill_ignores_non_response_envelopes() {
        let waiter = ResponseWaiter::new();
        waiter.fulfill(Envelope::broadcast("a", "ctl", "ping", serde_json::json!(null)));
        let err = waiter.wait_for("req-3", Duration::from_millis(20)).await.unwrap_err();
        assert!(matches!(err, HsdbError::DispatchTimeout(_)));
    }
}
