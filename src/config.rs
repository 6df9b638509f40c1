//! acp-bridge configuration management
//!
//! Precedence, lowest first: built-in defaults, the TOML file, `ACP_BRIDGE_*`
//! environment variables, CLI flags (applied by the binary).

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default HTTP listen port
pub const DEFAULT_PORT: u16 = 3917;

/// Environment variable naming the config file
pub const ENV_CONFIG: &str = "ACP_BRIDGE_CONFIG";
pub const ENV_BACKEND: &str = "ACP_BRIDGE_BACKEND";
pub const ENV_LISTEN: &str = "ACP_BRIDGE_LISTEN";
pub const ENV_CLIENT: &str = "ACP_BRIDGE_CLIENT";
pub const ENV_HUB_URL: &str = "ACP_BRIDGE_HUB_URL";

/// Main bridge configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Client-facing side
    pub client: ClientConfig,

    /// Agent backend to spawn
    pub backend: BackendConfig,

    /// Agent request timeouts
    pub agent: AgentConfig,

    /// Per-session replay window
    pub recorder: RecorderConfig,

    /// Secret redaction
    pub redaction: RedactionConfig,

    /// Hub control plane
    pub hub: HubConfig,
}

/// Client wire dialect, fixed at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientDialect {
    /// Agent Client Protocol passthrough
    #[default]
    Acp,
    /// Copilot-style `session.*` dialect
    Copilot,
    /// Claude-style dialect (no methods yet)
    Claude,
}

impl std::str::FromStr for ClientDialect {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "acp" => Ok(Self::Acp),
            "copilot" => Ok(Self::Copilot),
            "claude" => Ok(Self::Claude),
            other => Err(Error::Config(format!("Unknown client dialect: {}", other))),
        }
    }
}

impl std::fmt::Display for ClientDialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Acp => "acp",
            Self::Copilot => "copilot",
            Self::Claude => "claude",
        };
        write!(f, "{}", s)
    }
}

/// Client transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Stdio,
    Http,
}

/// Client-facing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Wire dialect spoken by the client
    pub dialect: ClientDialect,

    /// Transport the client connects over
    pub transport: TransportKind,

    /// HTTP listen address, `host:port` or `port`
    pub listen: Option<String>,

    /// Allowed CORS origins for the HTTP transport (empty = any)
    pub cors_origins: Vec<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            dialect: ClientDialect::Acp,
            transport: TransportKind::Stdio,
            listen: None,
            cors_origins: Vec::new(),
        }
    }
}

/// Backend configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Backend specifier, e.g. `acp:my-agent --stdio`
    pub specifier: Option<String>,

    /// Working directory for the agent process
    pub cwd: Option<PathBuf>,

    /// Extra environment for the agent process
    pub env: HashMap<String, String>,
}

/// Agent request timeouts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Timeout for ordinary requests in milliseconds
    pub request_timeout_ms: u64,

    /// Timeout for `session/prompt` in milliseconds (a whole turn)
    pub prompt_timeout_ms: u64,

    /// How long a permission request waits for a decision
    pub approval_timeout_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 30_000,
            prompt_timeout_ms: 600_000,
            approval_timeout_ms: 300_000,
        }
    }
}

impl AgentConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn prompt_timeout(&self) -> Duration {
        Duration::from_millis(self.prompt_timeout_ms)
    }

    pub fn approval_timeout(&self) -> Duration {
        Duration::from_millis(self.approval_timeout_ms)
    }
}

/// Recorder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Frames retained per session
    pub capacity: usize,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            capacity: crate::tap::DEFAULT_CAPACITY,
        }
    }
}

/// A single redaction rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedactionRule {
    /// Rule name, used in diagnostics
    pub name: String,

    /// Regex pattern
    pub pattern: String,

    /// Replacement text; may reference capture groups
    #[serde(default = "default_replacement")]
    pub replacement: String,
}

fn default_replacement() -> String {
    "[REDACTED]".to_string()
}

/// Redaction configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedactionConfig {
    pub enabled: bool,

    /// Rules applied after the built-in ones
    pub rules: Vec<RedactionRule>,
}

impl Default for RedactionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rules: Vec::new(),
        }
    }
}

impl RedactionConfig {
    /// Built-in rules followed by the configured extras
    pub fn effective_rules(&self) -> Vec<RedactionRule> {
        let mut rules = default_redaction_rules();
        rules.extend(self.rules.iter().cloned());
        rules
    }
}

/// Built-in secret rules
pub fn default_redaction_rules() -> Vec<RedactionRule> {
    vec![
        RedactionRule {
            name: "json_secret_field".to_string(),
            pattern: r#"(?i)"([A-Za-z0-9_\-]*(?:api[_-]?key|token|secret|password|passwd|credential)[A-Za-z0-9_\-]*)"\s*:\s*"(?:[^"\\]|\\.)*""#.to_string(),
            replacement: r#""${1}":"[REDACTED]""#.to_string(),
        },
        RedactionRule {
            name: "env_assignment".to_string(),
            pattern: r#"(?i)\b([A-Z0-9_]*(?:API_KEY|TOKEN|SECRET|PASSWORD)[A-Z0-9_]*)=([^\s"\\&;,]+)"#.to_string(),
            replacement: "${1}=[REDACTED]".to_string(),
        },
        RedactionRule {
            name: "api_key_prefix".to_string(),
            pattern: r"\b(?:sk-ant-[A-Za-z0-9_\-]{8,}|sk-[A-Za-z0-9_\-]{16,}|gh[pousr]_[A-Za-z0-9]{20,}|github_pat_[A-Za-z0-9_]{20,}|xox[abprs]-[A-Za-z0-9\-]{10,}|AKIA[0-9A-Z]{16})".to_string(),
            replacement: default_replacement(),
        },
    ]
}

/// Hub control-plane configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    pub enabled: bool,

    /// Base URL, e.g. `http://127.0.0.1:8700`
    pub url: Option<String>,

    /// Reports queued before new ones are dropped
    pub queue_capacity: usize,

    /// Per-report HTTP timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: None,
            queue_capacity: 256,
            timeout_ms: 2_000,
        }
    }
}

/// Parsed backend specifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendSpec {
    /// Spawn an ACP agent: program plus arguments
    Acp { program: String, args: Vec<String> },
}

impl BackendSpec {
    /// Parse `acp:<command line>`
    pub fn parse(spec: &str) -> Result<Self> {
        let spec = spec.trim();
        let (scheme, rest) = spec
            .split_once(':')
            .ok_or_else(|| Error::Config(format!("Backend must be '<kind>:<value>', got '{}'", spec)))?;

        match scheme {
            "acp" => {
                let words = shell_words::split(rest)
                    .map_err(|e| Error::Config(format!("Invalid backend command line: {}", e)))?;
                let mut words = words.into_iter();
                let program = words
                    .next()
                    .filter(|p| !p.is_empty())
                    .ok_or_else(|| Error::Config("Backend command is empty".to_string()))?;
                Ok(Self::Acp {
                    program,
                    args: words.collect(),
                })
            }
            other => Err(Error::Config(format!("Unsupported backend kind: {}", other))),
        }
    }
}

impl std::fmt::Display for BackendSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Acp { program, args } => {
                let mut words = vec![program.as_str()];
                words.extend(args.iter().map(String::as_str));
                write!(f, "acp:{}", shell_words::join(words))
            }
        }
    }
}

/// Parse `host:port` or a bare `port`. Absent or invalid input falls back
/// to `127.0.0.1:3917`.
pub fn parse_listen_addr(value: Option<&str>) -> SocketAddr {
    let fallback = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), DEFAULT_PORT);
    let Some(raw) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return fallback;
    };

    if let Ok(port) = raw.parse::<u16>() {
        return SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port);
    }
    if let Ok(addr) = raw.parse::<SocketAddr>() {
        return addr;
    }
    if let Some(port) = raw
        .strip_prefix("localhost:")
        .and_then(|p| p.parse::<u16>().ok())
    {
        return SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port);
    }

    tracing::warn!(listen = raw, "Invalid listen address, using {}", fallback);
    fallback
}

impl BridgeConfig {
    /// Load from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))
    }

    /// Load an explicit file, or the default file if it exists, or defaults
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        match default_config_path() {
            Some(path) if path.exists() => {
                tracing::debug!(path = %path.display(), "Loading default config file");
                Self::load(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    /// Apply `ACP_BRIDGE_*` overrides from the process environment
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(backend) = lookup(ENV_BACKEND) {
            self.backend.specifier = Some(backend);
        }
        if let Some(listen) = lookup(ENV_LISTEN) {
            self.client.listen = Some(listen);
        }
        if let Some(client) = lookup(ENV_CLIENT) {
            self.client.dialect = client.parse()?;
        }
        if let Some(url) = lookup(ENV_HUB_URL) {
            self.hub.url = Some(url);
            self.hub.enabled = true;
        }
        Ok(())
    }

    /// Parsed backend specifier; missing is a configuration error
    pub fn backend_spec(&self) -> Result<BackendSpec> {
        let raw = self
            .backend
            .specifier
            .as_deref()
            .ok_or_else(|| Error::Config("No backend configured (use --backend acp:<command>)".to_string()))?;
        BackendSpec::parse(raw)
    }

    pub fn listen_addr(&self) -> SocketAddr {
        parse_listen_addr(self.client.listen.as_deref())
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(format!("Failed to render config: {}", e)))
    }
}

/// `~/.acp-bridge/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs_next::home_dir().map(|home| home.join(".acp-bridge").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert_eq!(config.client.dialect, ClientDialect::Acp);
        assert_eq!(config.client.transport, TransportKind::Stdio);
        assert_eq!(config.recorder.capacity, 500);
        assert!(config.redaction.enabled);
        assert!(!config.hub.enabled);
        assert!(config.backend.specifier.is_none());
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[client]
dialect = "copilot"
transport = "http"
listen = "9000"

[backend]
specifier = "acp:my-agent --stdio"

[agent]
prompt_timeout_ms = 1000

[[redaction.rules]]
name = "internal"
pattern = "corp-[0-9]+"
"#
        )
        .unwrap();

        let config = BridgeConfig::load(file.path()).unwrap();
        assert_eq!(config.client.dialect, ClientDialect::Copilot);
        assert_eq!(config.client.transport, TransportKind::Http);
        assert_eq!(config.listen_addr().port(), 9000);
        assert_eq!(config.agent.prompt_timeout(), Duration::from_millis(1000));
        assert_eq!(config.agent.request_timeout_ms, 30_000);
        assert_eq!(config.redaction.rules[0].replacement, "[REDACTED]");
        assert_eq!(
            config.redaction.effective_rules().len(),
            default_redaction_rules().len() + 1
        );
        assert_eq!(
            config.backend_spec().unwrap(),
            BackendSpec::Acp {
                program: "my-agent".into(),
                args: vec!["--stdio".into()]
            }
        );
    }

    #[test]
    fn test_load_invalid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[client\ndialect = ").unwrap();
        assert!(matches!(BridgeConfig::load(file.path()), Err(Error::Config(_))));
    }

    #[test]
    fn test_load_missing_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(BridgeConfig::load_or_default(Some(&missing)).is_err());
    }

    #[test]
    fn test_overrides() {
        let mut config = BridgeConfig::default();
        let env: HashMap<&str, &str> = [
            (ENV_BACKEND, "acp:agent"),
            (ENV_CLIENT, "copilot"),
            (ENV_HUB_URL, "http://hub.local"),
        ]
        .into_iter()
        .collect();
        config
            .apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.backend.specifier.as_deref(), Some("acp:agent"));
        assert_eq!(config.client.dialect, ClientDialect::Copilot);
        assert!(config.hub.enabled);

        let err = config.apply_overrides(|k| (k == ENV_CLIENT).then(|| "gopher".to_string()));
        assert!(matches!(err, Err(Error::Config(_))));
    }

    #[test]
    fn test_backend_spec_parse() {
        assert_eq!(
            BackendSpec::parse("acp:node 'my agent.js' --flag").unwrap(),
            BackendSpec::Acp {
                program: "node".into(),
                args: vec!["my agent.js".into(), "--flag".into()]
            }
        );
        assert!(BackendSpec::parse("acp:").is_err());
        assert!(BackendSpec::parse("grpc:thing").is_err());
        assert!(BackendSpec::parse("no-scheme").is_err());
        assert!(BackendSpec::parse("acp:'unterminated").is_err());
    }

    #[test]
    fn test_backend_spec_display() {
        let spec = BackendSpec::parse("acp:node 'my agent.js'").unwrap();
        assert_eq!(spec.to_string(), "acp:node 'my agent.js'");
    }

    #[test]
    fn test_missing_backend_is_config_error() {
        assert!(matches!(
            BridgeConfig::default().backend_spec(),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_parse_listen_addr() {
        let default: SocketAddr = "127.0.0.1:3917".parse().unwrap();
        assert_eq!(parse_listen_addr(None), default);
        assert_eq!(parse_listen_addr(Some("")), default);
        assert_eq!(parse_listen_addr(Some("not an address")), default);
        assert_eq!(parse_listen_addr(Some("8080")), "127.0.0.1:8080".parse().unwrap());
        assert_eq!(parse_listen_addr(Some("0.0.0.0:9000")), "0.0.0.0:9000".parse().unwrap());
        assert_eq!(parse_listen_addr(Some("localhost:7000")), "127.0.0.1:7000".parse().unwrap());
        assert_eq!(parse_listen_addr(Some("127.0.0.1:99999")), default);
    }

    #[test]
    fn test_dialect_from_str() {
        assert_eq!("ACP".parse::<ClientDialect>().unwrap(), ClientDialect::Acp);
        assert_eq!("claude".parse::<ClientDialect>().unwrap(), ClientDialect::Claude);
        assert!("x".parse::<ClientDialect>().is_err());
    }

    #[test]
    fn test_roundtrip_toml() {
        let mut config = BridgeConfig::default();
        config.backend.specifier = Some("acp:agent".into());
        let rendered = config.to_toml().unwrap();
        let parsed: BridgeConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.backend.specifier.as_deref(), Some("acp:agent"));
    }
}
