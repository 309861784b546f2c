//! TCP client worker: bounded outbound queue, ACK-gated sends, exponential
//! backoff reconnection.
//!
//! Control-flow grounded in
//! `original_source/py/teatype/comms/ipc/socket/protocol/session.py`'s
//! send-side two-phase exchange (size probe, wait for `ACK`, then the raw
//! payload), generalized here to a dedicated worker task owning the socket
//! so callers never block on connection state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use crate::config::TransportConfig;
use crate::error::{HsdbError, HsdbResult};
use crate::transport::frame::{self, ControlFrame};

struct OutboundMessage {
    receiver: String,
    payload: Vec<u8>,
    reply: Option<oneshot::Sender<HsdbResult<()>>>,
}

/// Owns one outbound TCP connection. Messages are enqueued via `send` and
/// delivered in order by a background task; the caller never touches the
/// socket directly.
pub struct ClientWorker {
    name: String,
    outbound_tx: mpsc::Sender<OutboundMessage>,
    shutdown: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ClientWorker {
    /// Spawns the worker task and returns immediately; the first connection
    /// attempt happens in the background.
    pub fn spawn(name: impl Into<String>, addr: impl Into<String>, config: TransportConfig) -> Self {
        let name = name.into();
        let addr = addr.into();
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_queue_depth);
        let shutdown = Arc::new(AtomicBool::new(false));

        let task = tokio::spawn(run_worker(name.clone(), addr, config, outbound_rx, Arc::clone(&shutdown)));

        Self { name, outbound_tx, shutdown, task: Mutex::new(Some(task)) }
    }

    /// Enqueues a payload for `receiver`. Resolves once the payload has been
    /// written to the socket (not once the peer has acted on it); resolves
    /// to an error if the connection could not be (re)established and
    /// `auto_reconnect` is disabled.
    pub async fn send(&self, receiver: impl Into<String>, payload: Vec<u8>) -> HsdbResult<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let message = OutboundMessage { receiver: receiver.into(), payload, reply: Some(reply_tx) };
        self.outbound_tx
            .send(message)
            .await
            .map_err(|_| HsdbError::PeerUnreachable(format!("{}: worker task has stopped", self.name)))?;
        reply_rx.await.map_err(|_| HsdbError::PeerUnreachable(format!("{}: worker task dropped the reply", self.name)))?
    }

    pub async fn shutdown(self) {
        self.shutdown.store(true, Ordering::SeqCst);
        drop(self.outbound_tx);
        if let Some(task) = self.task.lock().expect("client worker task poisoned").take() {
            let _ = task.await;
        }
    }
}

#[instrument(skip(config, outbound_rx, shutdown))]
async fn run_worker(
    name: String,
    addr: String,
    config: TransportConfig,
    mut outbound_rx: mpsc::Receiver<OutboundMessage>,
    shutdown: Arc<AtomicBool>,
) {
    let mut backoff = config.reconnect_base_delay;

    loop {
        if shutdown.load(Ordering::SeqCst) {
            return;
        }

        match TcpStream::connect(&addr).await {
            Ok(mut stream) => {
                backoff = config.reconnect_base_delay;
                info!(%addr, "client connected");

                loop {
                    let Some(message) = outbound_rx.recv().await else {
                        return;
                    };
                    let result = send_one(&mut stream, &name, &config, &message).await;
                    let failed = result.is_err();
                    if let Some(reply) = message.reply {
                        let _ = reply.send(result);
                    }
                    if failed {
                        warn!(%addr, "send failed, reconnecting");
                        break;
                    }
                    if shutdown.load(Ordering::SeqCst) {
                        return;
                    }
                }
            }
            Err(err) => {
                if !config.auto_reconnect {
                    drain_with_error(&mut outbound_rx, &addr, &err.to_string()).await;
                    return;
                }
                warn!(%addr, %err, backoff_ms = backoff.as_millis() as u64, "connect failed, backing off");
                tokio::time::sleep(backoff).await;
                backoff = std::cmp::min(backoff * 2, config.reconnect_max_delay);
            }
        }
    }
}

async fn send_one(stream: &mut TcpStream, name: &str, config: &TransportConfig, message: &OutboundMessage) -> HsdbResult<()> {
    let probe = ControlFrame::size_probe(name, &message.receiver, message.payload.len());
    frame::write_frame(stream, &probe).await?;

    tokio::time::timeout(config.acknowledge_timeout, frame::read_ack(stream))
        .await
        .map_err(|_| HsdbError::Protocol("timed out waiting for ack".to_string()))??;

    use tokio::io::AsyncWriteExt;
    stream
        .write_all(&message.payload)
        .await
        .map_err(|err| HsdbError::Protocol(format!("payload write failed: {err}")))
}

/// Drains and fails every currently-queued message when the connection
/// cannot be established and reconnection is disabled ("dead-letter
/// draining").
async fn drain_with_error(outbound_rx: &mut mpsc::Receiver<OutboundMessage>, addr: &str, reason: &str) {
    outbound_rx.close();
    while let Some(message) = outbound_rx.recv().await {
        if let Some(reply) = message.reply {
            let _ = reply.send(Err(HsdbError::PeerUnreachable(format!("{addr}: {reason}"))));
        }
    }
}
