//! The `Broker` seam and its in-process default implementation.
//!
//! A broker-shaped pub/sub substrate is the requirement here, not a specific
//! vendor: the original runs this over Redis
//! (`original_source/python/teatype/comms/ipc/redis/`), but this crate has
//! no network dependency in its default configuration, so `LocalBroker`
//! stands in for it using `tokio::sync::broadcast`, one channel per named
//! topic, matching the publish/subscribe shape the original's
//! `RedisMessageProcessor` exposes to callers.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::broadcast;

use crate::bus::envelope::Envelope;
use crate::error::HsdbResult;

/// Capacity of each channel's broadcast ring buffer. A slow subscriber that
/// falls more than this many messages behind sees `RecvError::Lagged` on its
/// next `recv()` rather than blocking publishers.
const CHANNEL_CAPACITY: usize = 256;

/// A pub/sub broker: publish an envelope to a named channel, subscribe to
/// receive envelopes published to a named channel.
pub trait Broker: Send + Sync {
    fn publish(&self, envelope: Envelope) -> HsdbResult<()>;
    fn subscribe(&self, channel: &str) -> broadcast::Receiver<Envelope>;
}

/// In-process broker backed by one `tokio::sync::broadcast` channel per
/// topic, created lazily on first publish or subscribe.
pub struct LocalBroker {
    channels: Mutex<HashMap<String, broadcast::Sender<Envelope>>>,
}

impl LocalBroker {
    pub fn new() -> Self {
        Self { channels: Mutex::new(HashMap::new()) }
    }

    fn sender_for(&self, channel: &str) -> broadcast::Sender<Envelope> {
        let mut channels = self.channels.lock().expect("broker channel map poisoned");
        channels.entry(channel.to_string()).or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0).clone()
    }
}

impl Default for LocalBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl Broker for LocalBroker {
    fn publish(&self, envelope: Envelope) -> HsdbResult<()> {
        let sender = self.sender_for(envelope.channel());
        // `send` errors only when there are no subscribers yet, which is a
        // normal, non-exceptional state for a pub/sub channel.
        let _ = sender.send(envelope);
        Ok(())
    }

    fn subscribe(&self, channel: &str) -> broadcast::Receiver<Envelope> {
        self.sender_for(channel).subscribe()
    }
}
