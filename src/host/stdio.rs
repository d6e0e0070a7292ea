//! Newline-delimited JSON bridge for the host command channel.
//!
//! Reads `CommandEnvelope` lines from the input, dispatches each through the
//! `HostCommandServer` router, and writes `ResponseEnvelope` and
//! `EventEnvelope` lines to the output.
//!
//! Stdout is exclusively reserved for the JSON protocol; all diagnostic
//! output (tracing, logs) must be routed to stderr.

use crate::error::{Result, TrackerError};
use crate::host::channel::{CommandHandler, HostCommandClient, command_channel};
use crate::host::contract::{CommandEnvelope, EventEnvelope, ResponseEnvelope};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Default request channel capacity for the bridge.
const REQUEST_CAPACITY: usize = 64;

type SharedWriter<W> = Arc<Mutex<W>>;

/// Run the bridge on the process's stdin and stdout until stdin closes.
///
/// `event_rx` must be subscribed before anything can publish, so events sent
/// while the process is still starting are buffered rather than lost.
pub async fn run_stdio_bridge<H: CommandHandler>(
    handler: Arc<H>,
    event_rx: broadcast::Receiver<EventEnvelope>,
) -> Result<()> {
    run_bridge(tokio::io::stdin(), tokio::io::stdout(), handler, event_rx).await
}

/// Run the bridge over an arbitrary line-oriented transport.
///
/// Three paths run concurrently:
///
/// 1. **Reader** -- reads commands and spawns one task per command, so a
///    capture waiting on `position.fix` never blocks the fix itself.
/// 2. **Event forwarder** -- writes broadcast events as JSON lines.
/// 3. **Server** -- runs the `HostCommandServer` router loop.
///
/// On input EOF the bridge waits for in-flight commands to answer, writes
/// any events already published, then returns.
pub async fn run_bridge<R, W, H>(
    input: R,
    output: W,
    handler: Arc<H>,
    event_rx: broadcast::Receiver<EventEnvelope>,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
    H: CommandHandler,
{
    let (client, server) = command_channel(REQUEST_CAPACITY, handler);
    let writer: SharedWriter<W> = Arc::new(Mutex::new(output));

    let server_handle = tokio::spawn(server.run());
    let stop_events = CancellationToken::new();
    let event_handle = tokio::spawn(forward_events(
        event_rx,
        Arc::clone(&writer),
        stop_events.clone(),
    ));

    let reader_result = run_reader(input, client, Arc::clone(&writer)).await;

    stop_events.cancel();
    if let Err(e) = event_handle.await {
        tracing::error!(error = %e, "event forwarder ended abnormally");
    }
    let _ = server_handle.await;

    reader_result
}

async fn forward_events<W: AsyncWrite + Unpin>(
    mut event_rx: broadcast::Receiver<EventEnvelope>,
    writer: SharedWriter<W>,
    stop: CancellationToken,
) {
    loop {
        // Buffered events win over the stop signal so nothing queued is lost.
        let received = tokio::select! {
            biased;
            received = event_rx.recv() => received,
            () = stop.cancelled() => break,
        };
        match received {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => {
                    let mut w = writer.lock().await;
                    if let Err(e) = write_line(&mut *w, &json).await {
                        tracing::warn!(
                            error = %e,
                            "failed to write event envelope; stopping event forwarder"
                        );
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "failed to serialize event envelope; skipping");
                }
            },
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(lagged = n, "event forwarder lagged; some events were dropped");
            }
            Err(broadcast::error::RecvError::Closed) => {
                tracing::info!("event broadcast channel closed; stopping event forwarder");
                break;
            }
        }
    }
}

async fn run_reader<R, W>(input: R, client: HostCommandClient, writer: SharedWriter<W>) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut reader = BufReader::new(input);
    let mut line = String::new();
    let mut in_flight = JoinSet::new();

    loop {
        line.clear();
        let bytes_read = reader
            .read_line(&mut line)
            .await
            .map_err(|e| TrackerError::Channel(format!("failed to read from stdin: {e}")))?;

        if bytes_read == 0 {
            tracing::info!("stdin closed (EOF); shutting down bridge");
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let envelope: CommandEnvelope = match serde_json::from_str(trimmed) {
            Ok(env) => env,
            Err(e) => {
                tracing::warn!(error = %e, raw_line = %trimmed, "failed to parse command envelope");
                let response = ResponseEnvelope::error(
                    "parse-error",
                    format!("failed to parse command envelope: {e}"),
                );
                write_response(&writer, &response).await?;
                continue;
            }
        };

        let client = client.clone();
        let writer = Arc::clone(&writer);
        in_flight.spawn(async move {
            let request_id = envelope.request_id.clone();
            let response = match client.send(envelope).await {
                Ok(resp) => resp,
                Err(e) => {
                    tracing::error!(error = %e, "host command dispatch failed");
                    ResponseEnvelope::error(request_id, format!("dispatch failed: {e}"))
                }
            };
            write_response(&writer, &response).await
        });

        while let Some(done) = in_flight.try_join_next() {
            log_task_result(done);
        }
    }

    drop(client);
    while let Some(done) = in_flight.join_next().await {
        log_task_result(done);
    }
    Ok(())
}

fn log_task_result(done: std::result::Result<Result<()>, tokio::task::JoinError>) {
    match done {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(error = %e, "failed to write response"),
        Err(e) => tracing::error!(error = %e, "command task ended abnormally"),
    }
}

async fn write_response<W: AsyncWrite + Unpin>(
    writer: &SharedWriter<W>,
    response: &ResponseEnvelope,
) -> Result<()> {
    let json = serde_json::to_string(response)
        .map_err(|e| TrackerError::Channel(format!("failed to serialize response envelope: {e}")))?;
    let mut w = writer.lock().await;
    write_line(&mut *w, &json).await
}

/// Write a single JSON line and flush.
async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, json: &str) -> Result<()> {
    writer
        .write_all(json.as_bytes())
        .await
        .map_err(|e| TrackerError::Channel(format!("failed to write to stdout: {e}")))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| TrackerError::Channel(format!("failed to write newline to stdout: {e}")))?;
    writer
        .flush()
        .await
        .map_err(|e| TrackerError::Channel(format!("failed to flush stdout: {e}")))?;
    Ok(())
}
