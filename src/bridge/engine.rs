//! Bridge engine
//!
//! Owns the routing table, the adapter context and the agent event pump.
//! Transports feed it client lines and drain client-bound messages.

use super::pump::{self, parse_approval_id, parse_relay_id, PumpItem};
use crate::adapters::{adapters_for, session_param, AdapterContext, ClientAdapter};
use crate::agent::{spawn_agent, AgentClient};
use crate::config::BridgeConfig;
use crate::error::{Error, Result};
use crate::hub::HubCommand;
use crate::interceptors::ApprovalDecision;
use crate::rpc::{
    self, error_response, success_response, JsonRpcMessage, JsonRpcResponse, RequestId,
};
use crate::translate::acp;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

/// Method name → owning adapter, built once at startup
pub struct RoutingTable {
    routes: HashMap<&'static str, Arc<dyn ClientAdapter>>,
    adapters: Vec<Arc<dyn ClientAdapter>>,
}

impl RoutingTable {
    /// Insert every declared method. A method declared twice is a
    /// configuration error.
    pub fn build(adapters: Vec<Arc<dyn ClientAdapter>>) -> Result<Self> {
        let mut routes: HashMap<&'static str, Arc<dyn ClientAdapter>> = HashMap::new();
        for adapter in &adapters {
            for &method in adapter.supported_methods() {
                if let Some(owner) = routes.get(method) {
                    return Err(Error::Config(format!(
                        "method '{}' declared by both '{}' and '{}'",
                        method,
                        owner.name(),
                        adapter.name()
                    )));
                }
                routes.insert(method, adapter.clone());
            }
        }
        tracing::debug!(methods = routes.len(), adapters = adapters.len(), "Built routing table");
        Ok(Self { routes, adapters })
    }

    pub fn route(&self, method: &str) -> Option<&Arc<dyn ClientAdapter>> {
        self.routes.get(method)
    }

    /// Declared methods in adapter declaration order
    pub fn methods(&self) -> Vec<&'static str> {
        self.adapters
            .iter()
            .flat_map(|a| a.supported_methods().iter().copied())
            .collect()
    }

    /// Adapter rendering agent traffic for the client
    pub fn primary(&self) -> Option<&Arc<dyn ClientAdapter>> {
        self.adapters.first()
    }
}

/// One client connection bridged to one agent
pub struct BridgeEngine {
    ctx: Arc<AdapterContext>,
    routes: RoutingTable,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl BridgeEngine {
    /// Spawn the configured agent and assemble the engine
    pub fn launch(
        config: &BridgeConfig,
        client_tx: mpsc::UnboundedSender<JsonRpcMessage>,
    ) -> Result<Arc<Self>> {
        let spec = config.backend_spec()?;
        let (pump_tx, pump_rx) = mpsc::unbounded_channel::<PumpItem>();
        let agent = spawn_agent(&spec, &config.backend, pump_tx.clone())?;
        Self::assemble(config, agent, adapters_for(config.client.dialect), client_tx, pump_tx, pump_rx)
    }

    /// Assemble over an already-connected agent stream pair
    pub fn connect<R, W>(
        config: &BridgeConfig,
        reader: R,
        writer: W,
        client_tx: mpsc::UnboundedSender<JsonRpcMessage>,
    ) -> Result<Arc<Self>>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (pump_tx, pump_rx) = mpsc::unbounded_channel::<PumpItem>();
        let agent = AgentClient::connect(reader, writer, None, pump_tx.clone());
        Self::assemble(config, agent, adapters_for(config.client.dialect), client_tx, pump_tx, pump_rx)
    }

    fn assemble(
        config: &BridgeConfig,
        agent: Arc<AgentClient>,
        adapters: Vec<Arc<dyn ClientAdapter>>,
        client_tx: mpsc::UnboundedSender<JsonRpcMessage>,
        pump_tx: mpsc::UnboundedSender<PumpItem>,
        pump_rx: mpsc::UnboundedReceiver<PumpItem>,
    ) -> Result<Arc<Self>> {
        let routes = RoutingTable::build(adapters)?;
        let renderer = routes
            .primary()
            .cloned()
            .ok_or_else(|| Error::Config("no client adapter configured".to_string()))?;
        let ctx = Arc::new(AdapterContext::new(config, agent, client_tx, pump_tx)?);
        let pump = tokio::spawn(pump::run(ctx.clone(), renderer.clone(), pump_rx));

        tracing::info!(
            dialect = renderer.name(),
            methods = ?routes.methods(),
            "Bridge engine ready"
        );
        Ok(Arc::new(Self {
            ctx,
            routes,
            pump: Mutex::new(Some(pump)),
        }))
    }

    pub fn context(&self) -> &Arc<AdapterContext> {
        &self.ctx
    }

    pub fn routes(&self) -> &RoutingTable {
        &self.routes
    }

    /// Handle one client line. Returns the response to send, if any.
    pub async fn handle_line(&self, line: &str) -> Option<JsonRpcResponse> {
        match rpc::decode(line) {
            Ok(Some(message)) => self.handle_message(message).await,
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("Rejected client input: {}", e);
                Some(error_response(None, &e))
            }
        }
    }

    /// Handle one decoded client message
    pub async fn handle_message(&self, message: JsonRpcMessage) -> Option<JsonRpcResponse> {
        match message {
            JsonRpcMessage::Request(req) => {
                let params = req.params.unwrap_or(Value::Null);
                Some(match self.dispatch(Some(&req.id), &req.method, params).await {
                    Ok(result) => success_response(req.id, result),
                    Err(e) => error_response(Some(req.id), &e),
                })
            }
            JsonRpcMessage::Notification(note) => {
                let params = note.params.unwrap_or(Value::Null);
                if let Err(e) = self.dispatch(None, &note.method, params).await {
                    tracing::debug!(method = %note.method, "Client notification failed: {}", e);
                }
                None
            }
            JsonRpcMessage::Response(resp) => {
                self.handle_client_response(resp).await;
                None
            }
        }
    }

    async fn dispatch(&self, id: Option<&RequestId>, method: &str, params: Value) -> Result<Value> {
        let Some(adapter) = self.routes.route(method) else {
            tracing::debug!(method, "No route for method");
            return Err(Error::Routing(method.to_string()));
        };
        let session_id = session_param(&params).map(str::to_string);
        tracing::debug!(method, adapter = adapter.name(), request_id = ?id, "Dispatching");

        let result = adapter.handle(&self.ctx, id, method, params).await;
        if let Err(e) = &result {
            tracing::warn!(method, session_id = ?session_id, "Request failed: {}", e);
            if let Some(sid) = &session_id {
                self.ctx
                    .record(
                        sid,
                        "bridge.error",
                        &json!({"method": method, "code": e.rpc_code(), "message": e.rpc_message()}),
                    )
                    .await;
            }
        }
        result
    }

    /// Client answers to requests the bridge sent it
    async fn handle_client_response(&self, resp: JsonRpcResponse) {
        let Some(id) = resp.id.clone() else {
            tracing::debug!("Client sent an error without id");
            return;
        };

        if let Some((session_id, tool_call_id)) = parse_approval_id(&id) {
            let decision = match resp.into_result() {
                Ok(result) => acp::decision_from_outcome(&result, &[]),
                Err(err) => {
                    tracing::debug!(session_id = %session_id, "Client failed permission request: {}", err.message);
                    ApprovalDecision::Cancelled
                }
            };
            if !self
                .ctx
                .approvals
                .resolve_approval(&session_id, &tool_call_id, decision)
                .await
            {
                tracing::debug!(session_id = %session_id, tool_call_id = %tool_call_id, "Late permission answer");
            }
            return;
        }

        if let Some(agent_id) = parse_relay_id(&id) {
            let relayed = match resp.into_result() {
                Ok(result) => self.ctx.agent.respond(agent_id, result).await,
                Err(err) => {
                    let err = Error::Agent {
                        code: err.code,
                        message: err.message,
                        data: err.data,
                    };
                    self.ctx.agent.respond_error(agent_id, &err).await
                }
            };
            if let Err(e) = relayed {
                tracing::debug!("Could not relay client answer to agent: {}", e);
            }
            return;
        }

        tracing::debug!(id = %id, "Discarding unmatched client response");
    }

    /// Apply a hub or control-route command. Returns whether it changed state.
    pub async fn apply_hub_command(&self, command: HubCommand) -> bool {
        tracing::info!(command = ?command, "Applying control command");
        match command {
            HubCommand::Kill { session_id } => self.ctx.kill_session(&session_id).await,
            HubCommand::ClearKill { session_id } => self.ctx.clear_kill(&session_id).await,
            HubCommand::Approve {
                session_id,
                tool_call_id,
                option_id,
            } => {
                self.ctx
                    .approvals
                    .resolve_approval(&session_id, &tool_call_id, ApprovalDecision::Approved { option_id })
                    .await
            }
            HubCommand::Deny {
                session_id,
                tool_call_id,
                option_id,
            } => {
                self.ctx
                    .approvals
                    .resolve_approval(&session_id, &tool_call_id, ApprovalDecision::Denied { option_id })
                    .await
            }
        }
    }

    /// Cancel approvals, complete active sessions and close the agent
    pub async fn shutdown(&self) {
        let cancelled = self.ctx.approvals.cancel_all().await;
        let active = self.ctx.sessions.active_ids().await;
        for session_id in &active {
            self.ctx.end_session(session_id).await;
        }
        self.ctx.agent.close().await;
        if let Some(pump) = self.pump.lock().await.take() {
            pump.abort();
        }
        tracing::info!(
            cancelled_approvals = cancelled,
            completed_sessions = active.len(),
            "Bridge engine shut down"
        );
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::adapters::testing::FakeAgent;
    use crate::config::ClientDialect;
    use std::path::PathBuf;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, BufReader};

    pub struct EngineHarness {
        pub engine: Arc<BridgeEngine>,
        pub agent: FakeAgent,
        pub client_rx: mpsc::UnboundedReceiver<JsonRpcMessage>,
    }

    pub fn engine_with(dialect: ClientDialect) -> EngineHarness {
        let mut config = BridgeConfig::default();
        config.client.dialect = dialect;
        config.backend.cwd = Some(PathBuf::from("/work"));
        config.agent.request_timeout_ms = 2_000;
        config.agent.approval_timeout_ms = 2_000;

        let (bridge_side, agent_side) = tokio::io::duplex(64 * 1024);
        let (bridge_read, bridge_write) = tokio::io::split(bridge_side);
        let (agent_read, agent_write) = tokio::io::split(agent_side);
        let (client_tx, client_rx) = mpsc::unbounded_channel();
        let engine = BridgeEngine::connect(&config, bridge_read, bridge_write, client_tx).unwrap();
        EngineHarness {
            engine,
            agent: FakeAgent {
                lines: BufReader::new(agent_read).lines(),
                writer: agent_write,
            },
            client_rx,
        }
    }

    impl EngineHarness {
        pub async fn next_client_message(&mut self) -> JsonRpcMessage {
            tokio::time::timeout(Duration::from_secs(5), self.client_rx.recv())
                .await
                .expect("no client message")
                .expect("client channel closed")
        }
    }
}
