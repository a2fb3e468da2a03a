//! Stdin/stdout JSON bridge for the host command channel.
//!
//! Reads newline-delimited JSON `CommandEnvelope` messages from stdin,
//! dispatches them through [`HostCommandHandler`], and writes
//! `ResponseEnvelope` and `EventEnvelope` messages as newline-delimited
//! JSON to stdout.
//!
//! Stdout is exclusively reserved for the JSON protocol; all diagnostic
//! output (tracing, logs) must be routed to stderr.

use crate::error::{Result, TrackingError};
use crate::host::contract::{CommandEnvelope, CommandName, ResponseEnvelope};
use crate::host::handler::{HostCommandHandler, event_envelope};
use crate::runtime::TrackerEvent;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::{Mutex, broadcast::error::RecvError};
use tokio_util::sync::CancellationToken;

/// Run the bridge on the process's stdin and stdout.
pub async fn run_stdio_bridge(handler: HostCommandHandler) -> Result<()> {
    let reader = BufReader::new(tokio::io::stdin());
    let writer = BufWriter::new(tokio::io::stdout());
    run_bridge(handler, reader, writer).await
}

/// Run the bridge until the reader hits EOF or `lifecycle.terminating`
/// arrives.
///
/// Events are forwarded on a separate task sharing the writer, so a
/// response and an event never interleave within a line. Events already
/// published when the reader finishes are still written. The tracker is
/// stopped on exit only if it was not told the process is terminating;
/// on termination the persisted state is left for the next launch.
pub async fn run_bridge<R, W>(handler: HostCommandHandler, reader: R, writer: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let writer = Arc::new(Mutex::new(writer));

    let event_writer = Arc::clone(&writer);
    let mut event_rx = handler.service().subscribe();
    let done = CancellationToken::new();
    let forwarder_done = done.clone();
    let event_handle = tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                received = event_rx.recv() => received,
                _ = forwarder_done.cancelled() => break,
            };
            match event {
                Ok(event) => {
                    if !forward_event(&event_writer, &event).await {
                        return;
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!(lagged = n, "event forwarder lagged; some events were dropped");
                }
                Err(RecvError::Closed) => return,
            }
        }
        // Flush what was published before shutdown.
        while let Ok(event) = event_rx.try_recv() {
            if !forward_event(&event_writer, &event).await {
                return;
            }
        }
    });

    let outcome = run_reader(&handler, reader, Arc::clone(&writer)).await;

    if !matches!(outcome, Ok(true)) {
        if let Err(e) = handler.service().stop().await {
            tracing::warn!(error = %e, "tracker did not stop cleanly");
        }
    }
    done.cancel();
    if let Err(e) = event_handle.await {
        tracing::warn!(error = %e, "event forwarder ended abnormally");
    }

    outcome.map(|_| ())
}

/// Returns false once the output is unusable.
async fn forward_event<W: AsyncWrite + Unpin>(writer: &Mutex<W>, event: &TrackerEvent) -> bool {
    match event_envelope(event).and_then(|env| to_json(&env)) {
        Ok(json) => {
            let mut w = writer.lock().await;
            if let Err(e) = write_line(&mut *w, &json).await {
                tracing::warn!(error = %e, "failed to write event envelope; stopping event forwarder");
                return false;
            }
            true
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to encode event; skipping");
            true
        }
    }
}

/// Returns `Ok(true)` when the host announced termination.
async fn run_reader<R, W>(
    handler: &HostCommandHandler,
    mut reader: R,
    writer: Arc<Mutex<W>>,
) -> Result<bool>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        let bytes_read = reader
            .read_line(&mut line)
            .await
            .map_err(|e| TrackingError::Channel(format!("failed to read command: {e}")))?;
        if bytes_read == 0 {
            tracing::info!("stdin closed (EOF); shutting down bridge");
            return Ok(false);
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<CommandEnvelope>(trimmed) {
            Ok(envelope) => {
                let terminating = envelope.command == CommandName::LifecycleTerminating;
                let response = handler.handle(envelope).await;
                if terminating {
                    write_response(&writer, &response).await?;
                    tracing::info!("host is terminating; shutting down bridge");
                    return Ok(true);
                }
                response
            }
            Err(e) => {
                tracing::warn!(error = %e, raw_line = %trimmed, "failed to parse command envelope");
                ResponseEnvelope::error("parse-error", format!("failed to parse command envelope: {e}"))
            }
        };
        write_response(&writer, &response).await?;
    }
}

async fn write_response<W: AsyncWrite + Unpin>(
    writer: &Mutex<W>,
    response: &ResponseEnvelope,
) -> Result<()> {
    let json = to_json(response)?;
    let mut w = writer.lock().await;
    write_line(&mut *w, &json).await
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| TrackingError::Channel(format!("failed to serialize envelope: {e}")))
}

/// Write a single JSON line and flush.
async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, json: &str) -> Result<()> {
    writer
        .write_all(json.as_bytes())
        .await
        .map_err(|e| TrackingError::Channel(format!("failed to write output: {e}")))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| TrackingError::Channel(format!("failed to write newline: {e}")))?;
    writer
        .flush()
        .await
        .map_err(|e| TrackingError::Channel(format!("failed to flush output: {e}")))?;
    Ok(())
}
