//! Self-delimiting control-frame codec and the size-probe/ACK/payload
//! two-phase protocol.
//!
//! Grounded in
//! `original_source/py/teatype/comms/ipc/socket/protocol/frame_builder.py`
//! (`size_probe`/`close_signal` construction) and `session.py`'s receive
//! loop, which accumulates bytes and retries `pickle.loads` until it
//! succeeds. This crate replaces that retry-on-partial-read approach with an
//! explicit 4-byte big-endian length prefix ahead of each MessagePack-encoded
//! control frame, self-delimiting by construction rather than by exception
//! handling.

use serde_json::Value as JsonValue;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::{HsdbError, HsdbResult};
use crate::transport::envelope::{FrameHeader, FrameMethod, FrameStatus};

/// Literal bytes sent as the ACK to a `size_of` control frame.
pub const ACKNOWLEDGE_MESSAGE: &[u8] = b"OK";

/// A control frame: header plus an opaque MessagePack-encodable body.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct ControlFrame {
    pub header: FrameHeader,
    pub body: JsonValue,
}

impl ControlFrame {
    pub fn size_probe(source: impl Into<String>, receiver: impl Into<String>, payload_length: usize) -> Self {
        Self {
            header: FrameHeader::new(source, receiver, FrameMethod::SizeOf, FrameStatus::Pending),
            body: JsonValue::from(payload_length as u64),
        }
    }

    pub fn close_signal(source: impl Into<String>, receiver: impl Into<String>) -> Self {
        Self {
            header: FrameHeader::new(source, receiver, FrameMethod::CloseSocket, FrameStatus::Closing),
            body: JsonValue::from("Closing connection"),
        }
    }

    pub fn expected_payload_length(&self) -> Option<usize> {
        self.body.as_u64().map(|n| n as usize)
    }
}

/// Encodes a control frame as a 4-byte big-endian length prefix followed by
/// its MessagePack bytes.
pub fn encode_frame(frame: &ControlFrame) -> HsdbResult<Vec<u8>> {
    let body = rmp_serde::to_vec_named(frame).map_err(|err| HsdbError::Protocol(format!("frame encode failed: {err}")))?;
    let mut out = Vec::with_capacity(body.len() + 4);
    out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

/// Reads one length-prefixed control frame from an async stream.
pub async fn read_frame<R: AsyncReadExt + Unpin>(stream: &mut R) -> HsdbResult<ControlFrame> {
    let mut length_buf = [0u8; 4];
    stream.read_exact(&mut length_buf).await.map_err(|err| HsdbError::Protocol(format!("frame length read failed: {err}")))?;
    let length = u32::from_be_bytes(length_buf) as usize;

    let mut body = vec![0u8; length];
    stream.read_exact(&mut body).await.map_err(|err| HsdbError::Protocol(format!("frame body read failed: {err}")))?;

    rmp_serde::from_slice(&body).map_err(|err| HsdbError::Protocol(format!("frame decode failed: {err}")))
}

pub async fn write_frame<W: AsyncWriteExt + Unpin>(stream: &mut W, frame: &ControlFrame) -> HsdbResult<()> {
    let bytes = encode_frame(frame)?;
    stream.write_all(&bytes).await.map_err(|err| HsdbError::Protocol(format!("frame write failed: {err}")))
}

/// Reads exactly `expected_bytes` of raw payload (the original's
/// `_receive_exact`), looping until satisfied or the connection closes.
pub async fn read_exact_payload<R: AsyncReadExt + Unpin>(stream: &mut R, expected_bytes: usize) -> HsdbResult<Vec<u8>> {
    let mut buffer = vec![0u8; expected_bytes];
    stream.read_exact(&mut buffer).await.map_err(|err| HsdbError::Protocol(format!("payload read failed: {err}")))?;
    Ok(buffer)
}

pub async fn write_ack<W: AsyncWriteExt + Unpin>(stream: &mut W) -> HsdbResult<()> {
    stream.write_all(ACKNOWLEDGE_MESSAGE).await.map_err(|err| HsdbError::Protocol(format!("ack write failed: {err}")))
}

pub async fn read_ack<R: AsyncReadExt + Unpin>(stream: &mut R) -> HsdbResult<()> {
    let mut buf = [0u8; 2];
    stream.read_exact(&mut buf).await.map_err(|err| HsdbError::Protocol(format!("ack read failed: {err}")))?;
    if buf == *ACKNOWLEDGE_MESSAGE {
        Ok(())
    } else {
        Err(HsdbError::Protocol(format!("unexpected ack bytes: {buf:?}")))
    }
}
