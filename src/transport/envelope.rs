//! Control-frame header contract.
//!
//! Field set ported from
//! `original_source/py/teatype/comms/ipc/socket/envelope.py`'s
//! `SocketEnvelope.normalize`: `receiver`/`source`/`method`/`content`/
//! `status`/`id`, with `pickle` replaced by `rmp-serde` as the portable wire
//! codec.

use serde::{Deserialize, Serialize};

use crate::id::generate_correlation_id;

/// What a control frame is for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameMethod {
    /// Announces the byte length of the payload about to follow.
    SizeOf,
    /// Carries an opaque application payload.
    Payload,
    /// Politely asks the peer to close the connection.
    CloseSocket,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameStatus {
    Pending,
    Closing,
    Complete,
}

/// The header every control frame carries, independent of its body.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FrameHeader {
    pub id: String,
    pub source: String,
    pub receiver: String,
    pub method: FrameMethod,
    pub status: FrameStatus,
}

impl FrameHeader {
    pub fn new(source: impl Into<String>, receiver: impl Into<String>, method: FrameMethod, status: FrameStatus) -> Self {
        Self { id: generate_correlation_id(), source: source.into(), receiver: receiver.into(), method, status }
    }
}
