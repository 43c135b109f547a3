use super::wire::TransportResponse;
use super::KernelTransport;
use crate::error::{DriverError, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

type Envelope = (Vec<u8>, oneshot::Sender<Vec<u8>>);

/// Serialises frames from any number of clients onto one transport.
/// Frames are handled on the blocking pool: a stop may wait on an IO thread.
pub struct TransportServer;

impl TransportServer {
    pub fn spawn(transport: Arc<KernelTransport>, queue_depth: usize) -> (ServerHandle, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Envelope>(queue_depth.max(1));

        let task = tokio::spawn(async move {
            tracing::debug!("transport server started");

            while let Some((frame, reply)) = rx.recv().await {
                let transport = transport.clone();
                let response = match tokio::task::spawn_blocking(move || transport.handle_frame(&frame)).await {
                    Ok(response) => response,
                    Err(e) => {
                        tracing::error!(error = %e, "frame handler task failed");
                        TransportResponse::error(&DriverError::internal("frame handler task failed"))
                            .encode()
                    }
                };

                if reply.send(response).is_err() {
                    tracing::debug!("client went away before its response");
                }
            }

            tracing::debug!("transport server stopped");
        });

        (ServerHandle { tx }, task)
    }
}

/// Client side of a running `TransportServer`. Cheap to clone.
#[derive(Clone)]
pub struct ServerHandle {
    tx: mpsc::Sender<Envelope>,
}

impl ServerHandle {
    pub async fn call(&self, frame: Vec<u8>) -> Result<Vec<u8>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send((frame, reply_tx))
            .await
            .map_err(|_| DriverError::internal("transport server is not running"))?;
        reply_rx
            .await
            .map_err(|_| DriverError::internal("transport server dropped the request"))
    }
}
