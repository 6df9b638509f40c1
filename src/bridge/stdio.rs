//! Newline-delimited JSON-RPC over a byte stream pair (stdio in production)

use super::engine::BridgeEngine;
use crate::error::{Error, Result};
use crate::rpc::{self, error_response, JsonRpcMessage};
use futures::StreamExt;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};

/// Longest accepted client line (16 MiB)
const MAX_LINE_LENGTH: usize = 16 * 1024 * 1024;

/// Serve the engine over the process's stdin/stdout
pub async fn run_stdio(
    engine: Arc<BridgeEngine>,
    client_rx: mpsc::UnboundedReceiver<JsonRpcMessage>,
) -> Result<()> {
    serve_lines(engine, tokio::io::stdin(), tokio::io::stdout(), client_rx).await
}

/// Read client lines from `reader`, handle each in its own task, and write
/// every client-bound message to `writer` through a single writer task.
/// Returns when the input ends and in-flight requests have been answered.
pub async fn serve_lines<R, W>(
    engine: Arc<BridgeEngine>,
    reader: R,
    writer: W,
    client_rx: mpsc::UnboundedReceiver<JsonRpcMessage>,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (stop_tx, stop_rx) = oneshot::channel();
    let writer_task = tokio::spawn(write_loop(writer, client_rx, stop_rx));

    let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
    let mut in_flight = JoinSet::new();

    loop {
        tokio::select! {
            Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
            next = lines.next() => match next {
                Some(Ok(line)) => {
                    let engine = engine.clone();
                    in_flight.spawn(async move {
                        if let Some(response) = engine.handle_line(&line).await {
                            engine.context().send_to_client(JsonRpcMessage::Response(response));
                        }
                    });
                }
                Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                    tracing::warn!(max = MAX_LINE_LENGTH, "Client line too long, discarded");
                    let err = Error::Parse("line exceeds maximum length".to_string());
                    engine
                        .context()
                        .send_to_client(JsonRpcMessage::Response(error_response(None, &err)));
                }
                Some(Err(LinesCodecError::Io(e))) => {
                    tracing::warn!("Client input failed: {}", e);
                    break;
                }
                None => break,
            }
        }
    }

    tracing::info!(in_flight = in_flight.len(), "Client input closed");
    while in_flight.join_next().await.is_some() {}
    engine.shutdown().await;

    let _ = stop_tx.send(());
    writer_task
        .await
        .map_err(|e| Error::Internal(format!("client writer task failed: {}", e)))?
}

async fn write_loop<W>(
    mut writer: W,
    mut rx: mpsc::UnboundedReceiver<JsonRpcMessage>,
    mut stop: oneshot::Receiver<()>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            biased;
            message = rx.recv() => match message {
                Some(message) => write_message(&mut writer, &message).await?,
                None => break,
            },
            _ = &mut stop => {
                while let Ok(message) = rx.try_recv() {
                    write_message(&mut writer, &message).await?;
                }
                break;
            }
        }
    }
    writer.flush().await?;
    Ok(())
}

async fn write_message<W>(writer: &mut W, message: &JsonRpcMessage) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let line = rpc::encode(message)?;
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::engine::testing::{engine_with, EngineHarness};
    use crate::config::ClientDialect;
    use crate::error::codes;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, BufReader};

    #[tokio::test]
    async fn test_serves_requests_and_parse_errors() {
        let EngineHarness {
            engine,
            mut agent,
            client_rx,
        } = engine_with(ClientDialect::Acp);

        let (client_side, bridge_side) = tokio::io::duplex(64 * 1024);
        let (bridge_read, bridge_write) = tokio::io::split(bridge_side);
        let (client_read, mut client_write) = tokio::io::split(client_side);
        let server = tokio::spawn(serve_lines(engine, bridge_read, bridge_write, client_rx));
        let mut client_lines = BufReader::new(client_read).lines();

        client_write.write_all(b"{broken\n").await.unwrap();
        let line = tokio::time::timeout(Duration::from_secs(5), client_lines.next_line())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let parsed: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["id"], Value::Null);
        assert_eq!(parsed["error"]["code"], codes::PARSE_ERROR);

        client_write
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"initialize\",\"params\":{\"protocolVersion\":1}}\n")
            .await
            .unwrap();
        let forwarded = agent.next().await;
        assert_eq!(forwarded["method"], "initialize");
        agent
            .send(json!({"jsonrpc": "2.0", "id": forwarded["id"], "result": {"protocolVersion": 1}}))
            .await;

        let line = tokio::time::timeout(Duration::from_secs(5), client_lines.next_line())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let parsed: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["id"], 1);
        assert_eq!(parsed["result"]["protocolVersion"], 1);

        client_write.shutdown().await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
