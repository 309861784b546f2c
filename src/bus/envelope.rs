//! Pub/sub message envelope.
//!
//! Shape grounded in
//! `original_source/python/teatype/comms/ipc/redis/messages.py`'s
//! `_BaseRedisMessage`/`RedisBroadcast`/`RedisDispatch`, generalized from two
//! concrete message classes into one `Envelope` enum so the broker/handler
//! plumbing doesn't need a registry of message types.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::id::generate_correlation_id;

/// Status carried by a `Response` envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Ok,
    Error,
    Timeout,
}

/// A message carried over the bus: a one-to-many broadcast, a one-to-one
/// dispatch (command + payload aimed at one receiver), or a response to a
/// prior dispatch correlated by id.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    Broadcast {
        id: String,
        source: String,
        channel: String,
        message: String,
        value: JsonValue,
        /// Sender's clock at the time of send, unix millis. Opaque to the
        /// bus: never used for ordering or deduplication, just carried.
        timestamp: i64,
    },
    Dispatch {
        id: String,
        source: String,
        channel: String,
        receiver: String,
        command: String,
        payload: JsonValue,
        timestamp: i64,
    },
    Response {
        id: String,
        source: String,
        channel: String,
        /// The `id` of the `Dispatch` this responds to.
        request_id: String,
        status: ResponseStatus,
        payload: JsonValue,
        timestamp: i64,
    },
}

impl Envelope {
    pub fn broadcast(source: impl Into<String>, channel: impl Into<String>, message: impl Into<String>, value: JsonValue) -> Self {
        Self::Broadcast {
            id: generate_correlation_id(),
            source: source.into(),
            channel: channel.into(),
            message: message.into(),
            value,
            timestamp: now_millis(),
        }
    }

    pub fn dispatch(
        source: impl Into<String>,
        channel: impl Into<String>,
        receiver: impl Into<String>,
        command: impl Into<String>,
        payload: JsonValue,
    ) -> Self {
        Self::Dispatch {
            id: generate_correlation_id(),
            source: source.into(),
            channel: channel.into(),
            receiver: receiver.into(),
            command: command.into(),
            payload,
            timestamp: now_millis(),
        }
    }

    pub fn response(source: impl Into<String>, channel: impl Into<String>, request_id: impl Into<String>, status: ResponseStatus, payload: JsonValue) -> Self {
        Self::Response {
            id: generate_correlation_id(),
            source: source.into(),
            channel: channel.into(),
            request_id: request_id.into(),
            status,
            payload,
            timestamp: now_millis(),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Envelope::Broadcast { id, .. } | Envelope::Dispatch { id, .. } | Envelope::Response { id, .. } => id,
        }
    }

    pub fn channel(&self) -> &str {
        match self {
            Envelope::Broadcast { channel, .. } | Envelope::Dispatch { channel, .. } | Envelope::Response { channel, .. } => channel,
        }
    }

    pub fn source(&self) -> &str {
        match self {
            Envelope::Broadcast { source, .. } | Envelope::Dispatch { source, .. } | Envelope::Response { source, .. } => source,
        }
    }

    /// Sender-clock timestamp (unix millis) carried by every envelope kind.
    pub fn timestamp(&self) -> i64 {
        match self {
            Envelope::Broadcast { timestamp, .. } | Envelope::Dispatch { timestamp, .. } | Envelope::Response { timestamp, .. } => *timestamp,
        }
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
