//! TCP server worker and per-connection session.
//!
//! Grounded in
//! `original_source/py/teatype/comms/ipc/socket/protocol/server_worker.py`
//! (accept loop, tracked session set, `dispatch` exception catch-and-log)
//! and `session.py` (`run`'s two-phase receive loop: a `size_of` control
//! frame, `ACK`, then exactly that many payload bytes).

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use crate::error::HsdbResult;
use crate::transport::envelope::FrameMethod;
use crate::transport::frame;

/// Invoked once per received payload, with the sender's address. Returning
/// an `Err` is logged and does not close the session (matching the
/// original's `dispatch`, which catches and logs handler exceptions rather
/// than tearing down the connection).
pub type DispatchHandler = Arc<dyn Fn(Vec<u8>, SocketAddr) -> Pin<Box<dyn Future<Output = HsdbResult<()>> + Send>> + Send + Sync>;

pub struct ServerWorker {
    local_addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    accept_task: JoinHandle<()>,
}

impl ServerWorker {
    /// Binds `addr`, starts the accept loop, and returns immediately. Each
    /// accepted connection becomes its own session task.
    pub async fn bind(addr: impl Into<String>, name: impl Into<String>, handler: DispatchHandler) -> HsdbResult<Self> {
        let addr = addr.into();
        let name = name.into();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|err| crate::error::HsdbError::Protocol(format!("bind {addr} failed: {err}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|err| crate::error::HsdbError::Protocol(format!("local_addr failed: {err}")))?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let accept_shutdown = Arc::clone(&shutdown);

        let accept_task = tokio::spawn(accept_loop(listener, name, handler, accept_shutdown));

        Ok(Self { local_addr, shutdown, accept_task })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn stop(self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.accept_task.abort();
        let _ = self.accept_task.await;
    }
}

#[instrument(skip(listener, handler, shutdown))]
async fn accept_loop(listener: TcpListener, name: String, handler: DispatchHandler, shutdown: Arc<AtomicBool>) {
    info!(name = %name, "server accept loop started");
    loop {
        if shutdown.load(Ordering::SeqCst) {
            return;
        }
        match listener.accept().await {
            Ok((socket, peer_addr)) => {
                let handler = Arc::clone(&handler);
                let name = name.clone();
                tokio::spawn(async move {
                    if let Err(err) = run_session(socket, peer_addr, &name, handler).await {
                        warn!(%peer_addr, %err, "session ended with an error");
                    }
                });
            }
            Err(err) => {
                error!(%err, "accept failed");
            }
        }
    }
}

async fn run_session(mut socket: TcpStream, peer_addr: SocketAddr, name: &str, handler: DispatchHandler) -> HsdbResult<()> {
    loop {
        let control = frame::read_frame(&mut socket).await?;

        match control.header.method {
            FrameMethod::CloseSocket => {
                info!(%peer_addr, "peer requested close");
                return Ok(());
            }
            FrameMethod::SizeOf => {
                let expected = control.expected_payload_length().unwrap_or(0);
                frame::write_ack(&mut socket).await?;
                let payload = frame::read_exact_payload(&mut socket, expected).await?;

                if let Err(err) = handler(payload, peer_addr).await {
                    error!(%peer_addr, %err, "dispatch handler failed");
                }
            }
            FrameMethod::Payload => {
                warn!(%peer_addr, "received a bare payload frame without a preceding size probe; ignoring");
            }
        }

        let _ = name;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportConfig;
    use crate::transport::client::ClientWorker;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn server_dispatches_received_payload_to_handler() {
        let received = Arc::new(AtomicUsize::new(0));
        let received_clone = Arc::clone(&received);
        let handler: DispatchHandler = Arc::new(move |payload, _addr| {
            let received = Arc::clone(&received_clone);
            Box::pin(async move {
                received.fetch_add(payload.len(), Ordering::SeqCst);
                Ok(())
            })
        });

        let server = ServerWorker::bind("127.0.0.1:0", "test-server", handler).await.unwrap();
        let addr = server.local_addr();

        let client = ClientWorker::spawn("test-client", addr.to_string(), TransportConfig::default());
        client.send("test-server", b"hello".to_vec()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(received.load(Ordering::SeqCst), 5);

        client.shutdown().await;
        server.stop().await;
    }
}
