//! Agent process lifecycle
//!
//! Spawns the configured ACP agent with piped stdio and hands its streams to
//! an [`AgentClient`]. Agent stderr is forwarded to the log.

use super::client::{AgentClient, AgentEvent};
use crate::config::{BackendConfig, BackendSpec};
use crate::error::{Error, Result};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

/// Spawn the agent described by `spec` and connect to it. Agent events are
/// delivered on `events`.
pub fn spawn_agent<E>(
    spec: &BackendSpec,
    backend: &BackendConfig,
    events: mpsc::UnboundedSender<E>,
) -> Result<Arc<AgentClient>>
where
    E: From<AgentEvent> + Send + 'static,
{
    let BackendSpec::Acp { program, args } = spec;

    let mut command = Command::new(program);
    command
        .args(args)
        .envs(&backend.env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(cwd) = &backend.cwd {
        command.current_dir(cwd);
    }

    tracing::info!(
        program = %program,
        args = ?args,
        cwd = ?backend.cwd,
        "Spawning ACP agent"
    );

    let mut child = command
        .spawn()
        .map_err(|e| Error::Backend(format!("Failed to spawn agent '{}': {}", program, e)))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| Error::Backend("Agent stdin not captured".to_string()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::Backend("Agent stdout not captured".to_string()))?;
    if let Some(stderr) = child.stderr.take() {
        let pid = child.id();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(target: "acp_bridge::agent_stderr", pid = ?pid, "{}", line);
            }
        });
    }

    tracing::info!(pid = ?child.id(), "ACP agent started");
    Ok(AgentClient::connect(stdout, stdin, Some(child), events))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn test_missing_program_is_backend_error() {
        let spec = BackendSpec::parse("acp:/definitely/not/a/real/agent-binary").unwrap();
        let (tx, _rx) = mpsc::unbounded_channel::<AgentEvent>();
        let err = spawn_agent(&spec, &BackendConfig::default(), tx).err().unwrap();
        assert!(matches!(err, Error::Backend(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_echo_agent_roundtrip() {
        // `cat` echoes our notification back, which arrives as an agent notification
        let spec = BackendSpec::parse("acp:cat").unwrap();
        let (tx, mut events) = mpsc::unbounded_channel::<AgentEvent>();
        let client = spawn_agent(&spec, &BackendConfig::default(), tx).unwrap();

        client
            .notify("session/update", json!({"sessionId": "s1"}))
            .await
            .unwrap();
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            AgentEvent::Notification {
                method: "session/update".into(),
                params: json!({"sessionId": "s1"})
            }
        );

        client.close().await;
        assert!(client.is_closed());
    }
}
