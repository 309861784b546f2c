//! Service lifecycle and handler routing.
//!
//! State machine and shutdown-deadline behavior are grounded in
//! `original_source/python/teatype/comms/ipc/redis/service.py`
//! (`RedisServiceManager.terminate()`'s 5s processor-join deadline) and
//! `message_processor.py`'s `register_handler`/`receive` channel-filtered
//! dispatch.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value as JsonValue;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use crate::bus::broker::Broker;
use crate::bus::envelope::{Envelope, ResponseStatus};
use crate::bus::waiter::ResponseWaiter;
use crate::config::BusConfig;
use crate::error::HsdbResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServiceState {
    Init,
    Connected,
    Subscribed,
    Active,
    Terminating,
    Closed,
}

/// A handler returns the payload to auto-publish as a `Response` when it
/// wants to answer the envelope (`Some`), or `None` to let later handlers in
/// registration order have a turn.
type Handler = dyn Fn(&Envelope) -> HsdbResult<Option<JsonValue>> + Send + Sync;

struct HandlerEntry {
    channel_filter: Option<String>,
    message_filter: Option<String>,
    callback: Arc<Handler>,
}

fn envelope_message_type(envelope: &Envelope) -> &'static str {
    match envelope {
        Envelope::Broadcast { .. } => "broadcast",
        Envelope::Dispatch { .. } => "dispatch",
        Envelope::Response { .. } => "response",
    }
}

/// Drives one named service's connection to the bus: subscribes to a set of
/// channels, routes incoming envelopes to registered handlers, and exposes
/// `broadcast`/`dispatch` for publishing.
pub struct ServiceManager {
    source_name: String,
    channels: Vec<String>,
    broker: Arc<dyn Broker>,
    waiter: Arc<ResponseWaiter>,
    handlers: Arc<Mutex<Vec<HandlerEntry>>>,
    state: Mutex<ServiceState>,
    config: BusConfig,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shutdown: Arc<AtomicBool>,
}

impl ServiceManager {
    pub fn new(source_name: impl Into<String>, channels: Vec<String>, broker: Arc<dyn Broker>, config: BusConfig) -> Self {
        Self {
            source_name: source_name.into(),
            channels,
            broker,
            waiter: Arc::new(ResponseWaiter::new()),
            handlers: Arc::new(Mutex::new(Vec::new())),
            state: Mutex::new(ServiceState::Init),
            config,
            tasks: Mutex::new(Vec::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn state(&self) -> ServiceState {
        *self.state.lock().expect("service manager state poisoned")
    }

    fn transition(&self, to: ServiceState) {
        *self.state.lock().expect("service manager state poisoned") = to;
    }

    /// `Init -> Connected`. The in-process broker is always reachable, but
    /// the step exists so callers (and a future networked `Broker` impl)
    /// have a place to surface `BrokerUnavailable`.
    pub fn connect(&self) -> HsdbResult<()> {
        self.transition(ServiceState::Connected);
        Ok(())
    }

    /// Registers a handler. `channel_filter`/`message_filter` of `None`
    /// match any channel/message type. Handlers run in registration order;
    /// the first one to return `Ok(Some(payload))` stops the chain and that
    /// payload is auto-published back as a `Response` envelope.
    pub fn register_handler<F>(&self, channel_filter: Option<String>, message_filter: Option<String>, callback: F)
    where
        F: Fn(&Envelope) -> HsdbResult<Option<JsonValue>> + Send + Sync + 'static,
    {
        self.handlers.lock().expect("handler list poisoned").push(HandlerEntry {
            channel_filter,
            message_filter,
            callback: Arc::new(callback),
        });
    }

    /// `Connected -> Subscribed -> Active`: spawns one task per channel that
    /// reads envelopes and routes them to matching handlers, and feeds every
    /// `Response` envelope to the correlation-id waiter.
    #[instrument(skip(self))]
    pub fn start(&self) -> HsdbResult<()> {
        self.transition(ServiceState::Subscribed);

        let mut tasks = self.tasks.lock().expect("task list poisoned");
        for channel in &self.channels {
            let mut receiver = self.broker.subscribe(channel);
            let handlers = Arc::clone(&self.handlers);
            let waiter = Arc::clone(&self.waiter);
            let shutdown = Arc::clone(&self.shutdown);
            let channel_name = channel.clone();
            let broker = Arc::clone(&self.broker);
            let source_name = self.source_name.clone();

            let task = tokio::spawn(async move {
                loop {
                    if shutdown.load(Ordering::SeqCst) {
                        break;
                    }
                    match receiver.recv().await {
                        Ok(envelope) => {
                            waiter.fulfill(envelope.clone());
                            dispatch_to_handlers(&handlers, &envelope, &broker, &source_name);
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(channel = %channel_name, skipped, "bus subscriber lagged, messages dropped");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            });
            tasks.push(task);
        }
        drop(tasks);

        self.transition(ServiceState::Active);
        info!(source = %self.source_name, "service manager active");
        Ok(())
    }

    /// Broadcasts on this service's first subscribed channel. Use
    /// `broadcast_on` to target a specific one when subscribed to several.
    pub fn broadcast(&self, message: impl Into<String>, value: JsonValue) -> HsdbResult<()> {
        let channel = self.default_channel();
        self.broadcast_on(channel, message, value)
    }

    /// Broadcasts on an explicitly chosen channel.
    pub fn broadcast_on(&self, channel: impl Into<String>, message: impl Into<String>, value: JsonValue) -> HsdbResult<()> {
        self.broker.publish(Envelope::broadcast(&self.source_name, channel, message, value))
    }

    /// Dispatches on this service's first subscribed channel, optionally
    /// awaiting a correlated response. Use `dispatch_on` to target a
    /// specific channel when subscribed to several.
    pub async fn dispatch(
        &self,
        receiver: impl Into<String>,
        command: impl Into<String>,
        payload: JsonValue,
        await_response: bool,
    ) -> HsdbResult<Option<Envelope>> {
        let channel = self.default_channel();
        self.dispatch_on(channel, receiver, command, payload, await_response).await
    }

    /// Dispatches on an explicitly chosen channel, optionally awaiting a
    /// correlated response.
    pub async fn dispatch_on(
        &self,
        channel: impl Into<String>,
        receiver: impl Into<String>,
        command: impl Into<String>,
        payload: JsonValue,
        await_response: bool,
    ) -> HsdbResult<Option<Envelope>> {
        let envelope = Envelope::dispatch(&self.source_name, channel, receiver, command, payload);
        let request_id = envelope.id().to_string();

        if await_response {
            let wait = self.waiter.wait_for(&request_id, self.config.response_timeout);
            self.broker.publish(envelope)?;
            Ok(Some(wait.await?))
        } else {
            self.broker.publish(envelope)?;
            Ok(None)
        }
    }

    fn default_channel(&self) -> String {
        self.channels.first().cloned().unwrap_or_else(|| "default".to_string())
    }

    /// `Active -> Terminating -> Closed`. Signals subscriber tasks to stop
    /// and waits up to `config.terminate_deadline` before giving up and
    /// aborting them outright, matching the original's 5s processor-join
    /// timeout.
    #[instrument(skip(self))]
    pub async fn terminate(&self) -> HsdbResult<()> {
        self.transition(ServiceState::Terminating);
        self.shutdown.store(true, Ordering::SeqCst);

        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock().expect("task list poisoned"));
        let deadline = self.config.terminate_deadline;
        for task in tasks {
            if tokio::time::timeout(deadline, task).await.is_err() {
                warn!("bus subscriber task did not stop within the terminate deadline");
            }
        }

        self.transition(ServiceState::Closed);
        info!(source = %self.source_name, "service manager closed");
        Ok(())
    }
}

/// Runs matching handlers in registration order. The first one to return
/// `Ok(Some(payload))` stops the chain; its payload is auto-published back as
/// a `Response` envelope correlated to `envelope`'s id, and later handlers
/// (even otherwise-matching ones) don't run.
fn dispatch_to_handlers(handlers: &Mutex<Vec<HandlerEntry>>, envelope: &Envelope, broker: &Arc<dyn Broker>, source_name: &str) {
    let message_type = envelope_message_type(envelope);
    let guard = handlers.lock().expect("handler list poisoned");
    for entry in guard.iter() {
        let channel_matches = entry.channel_filter.as_deref().is_none_or(|filter| filter == envelope.channel());
        let message_matches = entry.message_filter.as_deref().is_none_or(|filter| filter == message_type);
        if !channel_matches || !message_matches {
            continue;
        }
        let callback = Arc::clone(&entry.callback);
        let envelope_owned = envelope.clone();
        match std::panic::catch_unwind(AssertUnwindSafe(|| callback(&envelope_owned))) {
            Ok(Ok(Some(payload))) => {
                let response = Envelope::response(source_name, envelope.channel(), envelope.id(), ResponseStatus::Ok, payload);
                if let Err(err) = broker.publish(response) {
                    error!(%err, "failed to publish bus handler auto-response");
                }
                break;
            }
            Ok(Ok(None)) => {}
            Ok(Err(err)) => error!(%err, "bus handler returned an error"),
            Err(_) => error!("bus handler panicked"),
        }
    }
}
