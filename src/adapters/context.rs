//! Shared services handed to every adapter call

use crate::agent::AgentClient;
use crate::bridge::PumpItem;
use crate::config::{AgentConfig, BridgeConfig};
use crate::error::{Error, Result};
use crate::hub::{HttpHubLink, HubReporter};
use crate::interceptors::{ApprovalGate, KillSwitch, Redactor};
use crate::rpc::JsonRpcMessage;
use crate::session::{SessionRecord, SessionRegistry};
use crate::tap::{Frame, Recorder};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Per-engine services. Adapters keep no session state of their own; every
/// read and write goes through here.
pub struct AdapterContext {
    pub agent: Arc<AgentClient>,
    pub sessions: SessionRegistry,
    pub kill_switch: KillSwitch,
    pub approvals: ApprovalGate,
    pub redactor: Redactor,
    pub recorder: Recorder,
    pub hub: Option<HubReporter>,
    pub timeouts: AgentConfig,
    /// Working directory announced to the agent on `session/new`
    pub cwd: PathBuf,
    client_tx: mpsc::UnboundedSender<JsonRpcMessage>,
    pump_tx: mpsc::UnboundedSender<PumpItem>,
}

impl AdapterContext {
    /// Build the service set from configuration
    pub fn new(
        config: &BridgeConfig,
        agent: Arc<AgentClient>,
        client_tx: mpsc::UnboundedSender<JsonRpcMessage>,
        pump_tx: mpsc::UnboundedSender<PumpItem>,
    ) -> Result<Self> {
        let redactor = if config.redaction.enabled {
            Redactor::new(config.redaction.effective_rules())?
        } else {
            Redactor::disabled()
        };

        let hub = match (&config.hub.url, config.hub.enabled) {
            (Some(url), true) => {
                let link = HttpHubLink::new(url, Duration::from_millis(config.hub.timeout_ms))?;
                tracing::info!(url = %url, "Hub reporting enabled");
                Some(HubReporter::spawn(Arc::new(link), config.hub.queue_capacity))
            }
            (None, true) => {
                return Err(Error::Config("hub.enabled is set but hub.url is missing".to_string()))
            }
            _ => None,
        };

        let cwd = match &config.backend.cwd {
            Some(cwd) => cwd.clone(),
            None => std::env::current_dir()?,
        };

        Ok(Self {
            agent,
            sessions: SessionRegistry::new(),
            kill_switch: KillSwitch::new(),
            approvals: ApprovalGate::new(),
            redactor,
            recorder: Recorder::new(config.recorder.capacity),
            hub,
            timeouts: config.agent.clone(),
            cwd,
            client_tx,
            pump_tx,
        })
    }

    /// Redact, record and report one frame
    pub async fn record(&self, session_id: &str, frame_type: &str, payload: &Value) -> Frame {
        let scrubbed = self.redactor.redact_value(payload);
        let frame = self
            .recorder
            .record_frame(session_id, frame_type, scrubbed.value, scrubbed.redacted)
            .await;
        if let Some(hub) = &self.hub {
            hub.frame(frame.clone());
        }
        frame
    }

    /// Record a frame and forward `message` to the client unless the session
    /// is killed, in which case the frame is recorded as blocked. Returns
    /// whether the message was forwarded.
    pub async fn forward_to_client(
        &self,
        session_id: &str,
        frame_type: &str,
        payload: &Value,
        message: Option<JsonRpcMessage>,
    ) -> bool {
        if self.kill_switch.is_killed(session_id).await {
            let scrubbed = self.redactor.redact_value(payload);
            self.recorder
                .record_blocked(session_id, frame_type, scrubbed.value, scrubbed.redacted)
                .await;
            tracing::debug!(session_id, frame_type, "Blocked frame for killed session");
            return false;
        }
        self.record(session_id, frame_type, payload).await;
        match message {
            Some(message) => self.send_to_client(message),
            None => false,
        }
    }

    /// Queue a message for the client writer
    pub fn send_to_client(&self, message: JsonRpcMessage) -> bool {
        if self.client_tx.send(message).is_err() {
            tracing::debug!("Client writer gone, dropping message");
            return false;
        }
        true
    }

    /// Issue an agent request on behalf of `session_id`
    pub async fn agent_request(
        &self,
        session_id: Option<&str>,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value> {
        if let Some(sid) = session_id {
            if self.kill_switch.is_killed(sid).await {
                return Err(Error::Killed(sid.to_string()));
            }
        }
        self.agent
            .request_for_session(session_id, method, params, timeout)
            .await
    }

    /// Send an agent notification on behalf of `session_id`
    pub async fn agent_notify(&self, session_id: Option<&str>, method: &str, params: Value) -> Result<()> {
        if let Some(sid) = session_id {
            if self.kill_switch.is_killed(sid).await {
                return Err(Error::Killed(sid.to_string()));
            }
        }
        self.agent.notify(method, params).await
    }

    /// Register a session, reporting it to the hub when new
    pub async fn ensure_session(&self, session_id: &str) -> SessionRecord {
        let (record, created) = self.sessions.ensure_session(session_id).await;
        if created {
            if let Some(hub) = &self.hub {
                hub.session_start(session_id);
            }
        }
        record
    }

    /// Agent session id bound to a local session
    pub async fn agent_session(&self, session_id: &str) -> Option<String> {
        self.sessions.agent_session_id(session_id).await
    }

    /// Local session id for an agent session id, falling back to the agent id
    pub async fn local_session(&self, agent_session_id: &str) -> String {
        self.sessions
            .local_session_id(agent_session_id)
            .await
            .unwrap_or_else(|| agent_session_id.to_string())
    }

    /// Complete a session and cancel its pending approvals
    pub async fn end_session(&self, session_id: &str) -> bool {
        let completed = self.sessions.complete_session(session_id).await;
        let cancelled = self.approvals.cancel_session(session_id).await;
        if completed {
            if let Some(agent_sid) = self.agent_session(session_id).await {
                if let Err(e) = self
                    .agent
                    .notify("session/cancel", json!({"sessionId": agent_sid}))
                    .await
                {
                    tracing::debug!(session_id, "Cancel on teardown not delivered: {}", e);
                }
            }
            self.record(session_id, "session.ended", &json!({"cancelledApprovals": cancelled}))
                .await;
            if let Some(hub) = &self.hub {
                hub.session_end(session_id);
            }
        }
        completed
    }

    /// Engage the kill-switch: block traffic both ways, cancel pending
    /// approvals and fail in-flight agent requests for the session.
    pub async fn kill_session(&self, session_id: &str) -> bool {
        let newly = self.kill_switch.mark_killed(session_id).await;
        let transitioned = self.sessions.kill_session(session_id).await;
        let approvals = self.approvals.cancel_session(session_id).await;
        let requests = self.agent.cancel_session(session_id).await;

        if let Some(agent_sid) = self.agent_session(session_id).await {
            if let Err(e) = self
                .agent
                .notify("session/cancel", json!({"sessionId": agent_sid}))
                .await
            {
                tracing::debug!(session_id, "Cancel after kill not delivered: {}", e);
            }
        }

        tracing::warn!(
            session_id,
            cancelled_approvals = approvals,
            failed_requests = requests,
            "Kill-switch engaged"
        );
        self.recorder
            .record_blocked(
                session_id,
                "session.killed",
                json!({"cancelledApprovals": approvals, "failedRequests": requests}),
                false,
            )
            .await;
        if transitioned {
            if let Some(hub) = &self.hub {
                hub.session_end(session_id);
            }
        }
        newly
    }

    /// Release the kill-switch. The session stays in its terminal state.
    pub async fn clear_kill(&self, session_id: &str) -> bool {
        self.kill_switch.clear_killed(session_id).await
    }

    /// Drop a session's agent binding and recorded frames
    pub async fn reset_session(&self, session_id: &str) -> Result<SessionRecord> {
        let record = self.sessions.reset_runner_session(session_id).await?;
        self.recorder.clear(session_id).await;
        Ok(record)
    }

    /// Wait until every agent event received so far has been processed
    pub async fn flush_agent_events(&self) {
        let (tx, rx) = oneshot::channel();
        if self.pump_tx.send(PumpItem::Flush(tx)).is_err() {
            return;
        }
        if tokio::time::timeout(self.timeouts.request_timeout(), rx)
            .await
            .is_err()
        {
            tracing::warn!("Agent event flush timed out");
        }
    }
}
