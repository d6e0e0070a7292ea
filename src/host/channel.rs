//! Host command channel and router.

use crate::error::{Result, TrackerError};
use crate::host::contract::{CommandEnvelope, ResponseEnvelope};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// Executes one host command.
#[async_trait]
pub trait CommandHandler: Send + Sync + 'static {
    /// Handle `envelope`. An `Err` becomes an error response for the same
    /// request id.
    async fn handle(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope>;
}

struct HostCommandRequest {
    envelope: CommandEnvelope,
    response_tx: oneshot::Sender<ResponseEnvelope>,
}

/// Sending half used by transports (stdio bridge, tests).
#[derive(Clone)]
pub struct HostCommandClient {
    request_tx: mpsc::Sender<HostCommandRequest>,
}

impl HostCommandClient {
    /// Validate and dispatch `envelope`, waiting for its response.
    pub async fn send(&self, envelope: CommandEnvelope) -> Result<ResponseEnvelope> {
        if let Err(e) = envelope.validate() {
            return Ok(ResponseEnvelope::error(envelope.request_id, e.to_string()));
        }

        let (response_tx, response_rx) = oneshot::channel();
        self.request_tx
            .send(HostCommandRequest {
                envelope,
                response_tx,
            })
            .await
            .map_err(|e| TrackerError::Channel(format!("failed to send host command request: {e}")))?;

        response_rx
            .await
            .map_err(|e| TrackerError::Channel(format!("host command response dropped: {e}")))
    }
}

/// Receiving half; routes each request to the handler on its own task so a
/// slow command (a flush) cannot hold up a fast one (a position fix).
pub struct HostCommandServer<H: CommandHandler> {
    request_rx: mpsc::Receiver<HostCommandRequest>,
    handler: Arc<H>,
}

/// Create a bounded command channel routed to `handler`.
#[must_use]
pub fn command_channel<H: CommandHandler>(
    request_capacity: usize,
    handler: Arc<H>,
) -> (HostCommandClient, HostCommandServer<H>) {
    let (request_tx, request_rx) = mpsc::channel(request_capacity.max(1));
    (
        HostCommandClient { request_tx },
        HostCommandServer {
            request_rx,
            handler,
        },
    )
}

impl<H: CommandHandler> HostCommandServer<H> {
    /// Serve until every client is dropped.
    pub async fn run(mut self) {
        while let Some(request) = self.request_rx.recv().await {
            let handler = Arc::clone(&self.handler);
            tokio::spawn(async move {
                let request_id = request.envelope.request_id.clone();
                let response = handler
                    .handle(&request.envelope)
                    .await
                    .unwrap_or_else(|e| ResponseEnvelope::error(request_id, e.to_string()));
                if request.response_tx.send(response).is_err() {
                    debug!("host command client went away before response");
                }
            });
        }
    }
}
