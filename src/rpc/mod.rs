//! JSON-RPC 2.0 envelopes and line codec
//!
//! Shared by both sides of the bridge: the client transport and the agent
//! channel. No protocol knowledge lives here, only framing and shape.

mod codec;

pub use codec::{
    classify, decode, encode, error_response, parse_line, success_response, JsonRpcError,
    JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId,
    JSONRPC_VERSION,
};
