//! ACP agent connection with request/response correlation
//!
//! One reader task turns agent output into either resolved pending requests
//! or [`AgentEvent`]s. One writer task owns the agent's input. Callers never
//! touch the byte streams directly.

use crate::error::{Error, Result};
use crate::rpc::{self, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, RequestId};
use futures::StreamExt;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};

/// Longest accepted agent output line (16 MiB)
const MAX_LINE_LENGTH: usize = 16 * 1024 * 1024;

/// Grace period for the agent process to exit after kill
const KILL_GRACE: Duration = Duration::from_secs(5);

/// Agent-originated traffic that is not a reply to one of our requests
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// One-way message, e.g. `session/update`
    Notification { method: String, params: Value },
    /// Call the agent expects us to answer, e.g. `session/request_permission`
    Request {
        id: RequestId,
        method: String,
        params: Value,
    },
    /// Agent output ended; the client is closed
    Exited { reason: String },
}

struct PendingRequest {
    method: String,
    session_id: Option<String>,
    tx: oneshot::Sender<Result<Value>>,
}

struct Shared {
    pending: Mutex<HashMap<u64, PendingRequest>>,
    /// Only flipped while `pending` is locked, so no insert can follow a drain
    closed: AtomicBool,
    outgoing: Mutex<Option<mpsc::UnboundedSender<String>>>,
}

impl Shared {
    /// Mark closed and fail every pending request. Used by close and by the
    /// reader on EOF.
    async fn fail_all(&self, reason: &str) -> usize {
        let drained: Vec<_> = {
            let mut pending = self.pending.lock().await;
            self.closed.store(true, Ordering::SeqCst);
            pending.drain().map(|(_, p)| p).collect()
        };
        let count = drained.len();
        for entry in drained {
            let _ = entry.tx.send(Err(Error::Closed(reason.to_string())));
        }
        count
    }
}

/// Handle to one ACP agent
pub struct AgentClient {
    shared: Arc<Shared>,
    next_id: AtomicU64,
    child: Mutex<Option<Child>>,
}

impl AgentClient {
    /// Wire a client over an agent's output (`reader`) and input (`writer`).
    ///
    /// Agent events are delivered on `events`, which is unbounded so the
    /// reader never waits on event consumers. Events for a response are
    /// always sent before that response resolves its caller.
    pub fn connect<R, W, E>(
        reader: R,
        writer: W,
        child: Option<Child>,
        events: mpsc::UnboundedSender<E>,
    ) -> Arc<Self>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
        E: From<AgentEvent> + Send + 'static,
    {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            pending: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            outgoing: Mutex::new(Some(out_tx)),
        });

        tokio::spawn(write_loop(writer, out_rx));
        tokio::spawn(read_loop(reader, shared.clone(), events));

        Arc::new(Self {
            shared,
            next_id: AtomicU64::new(1),
            child: Mutex::new(child),
        })
    }

    /// [`connect`](Self::connect) with a dedicated event channel
    pub fn connect_pair<R, W>(
        reader: R,
        writer: W,
        child: Option<Child>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<AgentEvent>)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::connect(reader, writer, child, tx), rx)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Number of requests awaiting a response
    pub async fn pending_count(&self) -> usize {
        self.shared.pending.lock().await.len()
    }

    /// Send a request and wait for its response
    pub async fn request(&self, method: &str, params: Value, timeout: Duration) -> Result<Value> {
        self.request_for_session(None, method, params, timeout).await
    }

    /// Send a request tagged with a local session, so a kill can fail it
    pub async fn request_for_session(
        &self,
        session_id: Option<&str>,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.shared.pending.lock().await;
            if self.shared.closed.load(Ordering::SeqCst) {
                return Err(Error::Closed(format!("cannot send '{}'", method)));
            }
            pending.insert(
                id,
                PendingRequest {
                    method: method.to_string(),
                    session_id: session_id.map(str::to_string),
                    tx,
                },
            );
        }

        let line = rpc::encode(&JsonRpcRequest::new(id as i64, method, params))?;
        if let Err(e) = self.send_line(line).await {
            self.shared.pending.lock().await.remove(&id);
            return Err(e);
        }
        tracing::debug!(request_id = id, method, session_id = ?session_id, "Sent agent request");

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::Closed(format!("'{}' abandoned", method))),
            Err(_) => {
                self.shared.pending.lock().await.remove(&id);
                tracing::warn!(request_id = id, method, "Agent request timed out");
                Err(Error::Timeout {
                    method: method.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Send a notification
    pub async fn notify(&self, method: &str, params: Value) -> Result<()> {
        let line = rpc::encode(&JsonRpcNotification::new(method, params))?;
        self.send_line(line).await
    }

    /// Answer an agent-initiated request
    pub async fn respond(&self, id: RequestId, result: Value) -> Result<()> {
        let line = rpc::encode(&rpc::success_response(id, result))?;
        self.send_line(line).await
    }

    /// Answer an agent-initiated request with an error
    pub async fn respond_error(&self, id: RequestId, err: &Error) -> Result<()> {
        let line = rpc::encode(&rpc::error_response(Some(id), err))?;
        self.send_line(line).await
    }

    /// Fail the in-flight requests of one session with `Killed`
    pub async fn cancel_session(&self, session_id: &str) -> usize {
        let drained: Vec<_> = {
            let mut pending = self.shared.pending.lock().await;
            let ids: Vec<u64> = pending
                .iter()
                .filter(|(_, p)| p.session_id.as_deref() == Some(session_id))
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter().filter_map(|id| pending.remove(&id)).collect()
        };
        let count = drained.len();
        for entry in drained {
            tracing::debug!(session_id, method = %entry.method, "Failing in-flight request");
            let _ = entry.tx.send(Err(Error::Killed(session_id.to_string())));
        }
        count
    }

    /// Close the connection. Pending requests fail with `Closed`, the writer
    /// stops, and the agent process is killed. Later calls do nothing.
    pub async fn close(&self) {
        let failed = self.shared.fail_all("agent client closed").await;
        let released = self.shared.outgoing.lock().await.take().is_some();

        // Reaped even when the reader already saw EOF
        if let Some(mut child) = self.child.lock().await.take() {
            tracing::info!(pid = ?child.id(), "Stopping agent process");
            let _ = child.start_kill();
            if tokio::time::timeout(KILL_GRACE, child.wait()).await.is_err() {
                tracing::warn!("Agent process did not exit in time");
                let _ = child.kill().await;
            }
        }
        if released {
            tracing::info!(failed, "Agent client closed");
        }
    }

    async fn send_line(&self, line: String) -> Result<()> {
        let guard = self.shared.outgoing.lock().await;
        let tx = guard
            .as_ref()
            .ok_or_else(|| Error::Closed("agent input closed".to_string()))?;
        tx.send(line)
            .map_err(|_| Error::Closed("agent writer stopped".to_string()))
    }
}

async fn write_loop<W>(mut writer: W, mut rx: mpsc::UnboundedReceiver<String>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    while let Some(line) = rx.recv().await {
        let written = async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        }
        .await;
        if let Err(e) = written {
            tracing::warn!("Failed to write to agent: {}", e);
            break;
        }
    }
    let _ = writer.shutdown().await;
    tracing::debug!("Agent writer stopped");
}

async fn read_loop<R, E>(reader: R, shared: Arc<Shared>, events: mpsc::UnboundedSender<E>)
where
    R: AsyncRead + Unpin + Send + 'static,
    E: From<AgentEvent> + Send + 'static,
{
    let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
    let reason = loop {
        match lines.next().await {
            Some(Ok(line)) => dispatch_line(&line, &shared, &events).await,
            Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                tracing::warn!("Agent output line exceeds {} bytes, skipped", MAX_LINE_LENGTH);
            }
            Some(Err(LinesCodecError::Io(e))) => break format!("agent output error: {}", e),
            None => break "agent output ended".to_string(),
        }
    };

    let failed = shared.fail_all(&reason).await;
    shared.outgoing.lock().await.take();
    tracing::info!(failed, reason = %reason, "Agent reader stopped");
    let _ = events.send(AgentEvent::Exited { reason }.into());
}

async fn dispatch_line<E>(line: &str, shared: &Shared, events: &mpsc::UnboundedSender<E>)
where
    E: From<AgentEvent>,
{
    let message = match rpc::decode(line) {
        Ok(Some(message)) => message,
        Ok(None) => return,
        Err(e) => {
            tracing::warn!("Ignoring unparseable agent output: {}", e);
            return;
        }
    };

    match message {
        JsonRpcMessage::Response(response) => {
            let Some(id) = response.id.as_ref().and_then(numeric_id) else {
                tracing::debug!(id = ?response.id, "Discarding response with foreign id");
                return;
            };
            let Some(entry) = shared.pending.lock().await.remove(&id) else {
                tracing::debug!(request_id = id, "Discarding response for unknown or expired request");
                return;
            };
            let result = response.into_result().map_err(|err| Error::Agent {
                code: err.code,
                message: err.message,
                data: err.data,
            });
            let _ = entry.tx.send(result);
        }
        JsonRpcMessage::Notification(n) => {
            let _ = events.send(
                AgentEvent::Notification {
                    method: n.method,
                    params: n.params.unwrap_or(Value::Null),
                }
                .into(),
            );
        }
        JsonRpcMessage::Request(r) => {
            let _ = events.send(
                AgentEvent::Request {
                    id: r.id,
                    method: r.method,
                    params: r.params.unwrap_or(Value::Null),
                }
                .into(),
            );
        }
    }
}

fn numeric_id(id: &RequestId) -> Option<u64> {
    match id {
        RequestId::Number(n) => u64::try_from(*n).ok(),
        RequestId::Str(s) => s.parse().ok(),
    }
}
