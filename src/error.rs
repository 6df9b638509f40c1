//! ACP Bridge error types

use thiserror::Error;

/// JSON-RPC error codes used by the bridge
pub mod codes {
    /// Invalid JSON was received
    pub const PARSE_ERROR: i64 = -32700;
    /// The JSON sent is not a valid request object
    pub const INVALID_REQUEST: i64 = -32600;
    /// The method does not exist or is not routable
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// Invalid method parameters
    pub const INVALID_PARAMS: i64 = -32602;
    /// Internal bridge error
    pub const INTERNAL_ERROR: i64 = -32603;
    /// Agent request exceeded its deadline
    pub const TIMEOUT: i64 = -32001;
    /// Agent connection is closed
    pub const CLOSED: i64 = -32002;
    /// Session was stopped by the kill-switch
    pub const KILLED: i64 = -32003;
}

/// ACP Bridge error type
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed JSON-RPC input
    #[error("Parse error: {0}")]
    Parse(String),

    /// No adapter owns the method
    #[error("Method not found: {0}")]
    Routing(String),

    /// Envelope or normalized message shape is invalid
    #[error("Invalid request: {0}")]
    Validation(String),

    /// Agent request exceeded its deadline
    #[error("Agent request '{method}' timed out after {timeout_ms}ms")]
    Timeout { method: String, timeout_ms: u64 },

    /// Agent client is closed
    #[error("Agent connection closed: {0}")]
    Closed(String),

    /// Session was stopped by the kill-switch
    #[error("Session killed: {0}")]
    Killed(String),

    /// Configuration error (fatal at startup)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error returned by the agent itself
    #[error("Agent error {code}: {message}")]
    Agent {
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// Agent process could not be started
    #[error("Backend error: {0}")]
    Backend(String),

    /// Listener or stream failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// JSON-RPC error code reported to the client for this error
    pub fn rpc_code(&self) -> i64 {
        match self {
            Self::Parse(_) => codes::PARSE_ERROR,
            Self::Routing(_) => codes::METHOD_NOT_FOUND,
            Self::Validation(_) => codes::INVALID_REQUEST,
            Self::Timeout { .. } => codes::TIMEOUT,
            Self::Closed(_) => codes::CLOSED,
            Self::Killed(_) => codes::KILLED,
            Self::Agent { code, .. } => *code,
            Self::Serialization(_) => codes::INVALID_PARAMS,
            _ => codes::INTERNAL_ERROR,
        }
    }

    /// Optional structured data attached to the JSON-RPC error
    pub fn rpc_data(&self) -> Option<serde_json::Value> {
        match self {
            Self::Agent { data, .. } => data.clone(),
            _ => None,
        }
    }

    /// Message reported to the client. Agent errors keep the agent's text verbatim.
    pub fn rpc_message(&self) -> String {
        match self {
            Self::Agent { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, Error>;
