//! Newline-delimited JSON-RPC codec
//!
//! `parse_line` turns one input unit into a JSON value, `classify` sorts it
//! into a request, notification or response, and `encode` produces the wire
//! form with its trailing line terminator.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Protocol version string carried by every envelope
pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC request id (numbers and strings are both legal on the wire)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    Str(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::Str(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

/// A call expecting a response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            method: method.into(),
            params: Some(params),
        }
    }
}

/// A one-way message without id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params: Some(params),
        }
    }
}

/// Structured JSON-RPC error object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl From<&Error> for JsonRpcError {
    fn from(err: &Error) -> Self {
        Self {
            code: err.rpc_code(),
            message: err.rpc_message(),
            data: err.rpc_data(),
        }
    }
}

/// Reply to a request. Exactly one of `result` / `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    /// `None` only for errors about input whose id could not be read
    pub id: Option<RequestId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Convert into the caller-facing result
    pub fn into_result(self) -> std::result::Result<Value, JsonRpcError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Any JSON-RPC envelope
#[derive(Debug, Clone, PartialEq)]
pub enum JsonRpcMessage {
    Request(JsonRpcRequest),
    Notification(JsonRpcNotification),
    Response(JsonRpcResponse),
}

impl Serialize for JsonRpcMessage {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Request(r) => r.serialize(serializer),
            Self::Notification(n) => n.serialize(serializer),
            Self::Response(r) => r.serialize(serializer),
        }
    }
}

/// Parse one line of input. Blank input yields `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<Value>> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(trimmed)
        .map(Some)
        .map_err(|e| Error::Parse(e.to_string()))
}

/// Sort a parsed value into an envelope kind.
///
/// Only the envelope is checked; method names and params are left to adapters.
pub fn classify(value: Value) -> Result<JsonRpcMessage> {
    let obj = match value {
        Value::Object(obj) => obj,
        other => {
            return Err(Error::Validation(format!(
                "expected a JSON-RPC object, got {}",
                json_kind(&other)
            )))
        }
    };

    let has_method = obj.contains_key("method");
    let has_id = obj.get("id").map(|id| !id.is_null()).unwrap_or(false);
    let is_response = obj.contains_key("result") || obj.contains_key("error");
    let value = Value::Object(obj);

    let msg = match (has_method, has_id, is_response) {
        (true, true, _) => JsonRpcMessage::Request(from_value(value, "request")?),
        (true, false, _) => JsonRpcMessage::Notification(from_value(value, "notification")?),
        (false, _, true) => {
            let resp: JsonRpcResponse = from_value(value, "response")?;
            if resp.result.is_some() && resp.error.is_some() {
                return Err(Error::Validation(
                    "response carries both result and error".to_string(),
                ));
            }
            JsonRpcMessage::Response(resp)
        }
        _ => {
            return Err(Error::Validation(
                "envelope has neither method nor result/error".to_string(),
            ))
        }
    };
    Ok(msg)
}

/// `parse_line` followed by `classify`
pub fn decode(line: &str) -> Result<Option<JsonRpcMessage>> {
    match parse_line(line)? {
        Some(value) => classify(value).map(Some),
        None => Ok(None),
    }
}

/// Serialize an envelope to its wire form (JSON plus `\n`)
pub fn encode<T: Serialize>(msg: &T) -> Result<String> {
    let mut line = serde_json::to_string(msg)?;
    line.push('\n');
    Ok(line)
}

/// Build a success response
pub fn success_response(id: RequestId, result: Value) -> JsonRpcResponse {
    JsonRpcResponse {
        jsonrpc: JSONRPC_VERSION.to_string(),
        id: Some(id),
        result: Some(result),
        error: None,
    }
}

/// Build an error response from a bridge error
pub fn error_response(id: Option<RequestId>, err: &Error) -> JsonRpcResponse {
    JsonRpcResponse {
        jsonrpc: JSONRPC_VERSION.to_string(),
        id,
        result: None,
        error: Some(JsonRpcError::from(err)),
    }
}

fn from_value<T: serde::de::DeserializeOwned>(value: Value, kind: &str) -> Result<T> {
    serde_json::from_value(value).map_err(|e| Error::Validation(format!("malformed {}: {}", kind, e)))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_blank_line_is_sentinel() {
        assert!(parse_line("").unwrap().is_none());
        assert!(parse_line("   \r\n").unwrap().is_none());
    }

    #[test]
    fn test_malformed_line_is_parse_error() {
        let err = parse_line("{not json").unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
        assert_eq!(err.rpc_code(), -32700);
    }

    #[test]
    fn test_classify_request() {
        let msg = decode(r#"{"jsonrpc":"2.0","id":7,"method":"session/new","params":{"cwd":"/"}}"#)
            .unwrap()
            .unwrap();
        match msg {
            JsonRpcMessage::Request(req) => {
                assert_eq!(req.id, RequestId::Number(7));
                assert_eq!(req.method, "session/new");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_classify_notification_and_null_id() {
        let msg = classify(json!({"jsonrpc":"2.0","method":"session/cancel","params":{}})).unwrap();
        assert!(matches!(msg, JsonRpcMessage::Notification(_)));

        let msg = classify(json!({"jsonrpc":"2.0","id":null,"method":"x"})).unwrap();
        assert!(matches!(msg, JsonRpcMessage::Notification(_)));
    }

    #[test]
    fn test_classify_responses() {
        let ok = classify(json!({"jsonrpc":"2.0","id":"a","result":{"x":1}})).unwrap();
        match ok {
            JsonRpcMessage::Response(resp) => {
                assert_eq!(resp.into_result().unwrap(), json!({"x":1}));
            }
            other => panic!("unexpected {:?}", other),
        }

        let err = classify(json!({"jsonrpc":"2.0","id":3,"error":{"code":-32601,"message":"nope"}}))
            .unwrap();
        match err {
            JsonRpcMessage::Response(resp) => {
                let e = resp.into_result().unwrap_err();
                assert_eq!(e.code, -32601);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_classify_rejects_non_envelopes() {
        assert!(matches!(classify(json!([1, 2])), Err(Error::Validation(_))));
        assert!(matches!(classify(json!({"jsonrpc":"2.0","id":1})), Err(Error::Validation(_))));
        assert!(matches!(
            classify(json!({"jsonrpc":"2.0","id":1,"result":1,"error":{"code":1,"message":"x"}})),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_encode_appends_newline() {
        let line = encode(&JsonRpcNotification::new("session/update", json!({"a":1}))).unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
        let back = decode(&line).unwrap().unwrap();
        assert!(matches!(back, JsonRpcMessage::Notification(_)));
    }

    #[test]
    fn test_error_response_shape() {
        let resp = error_response(None, &Error::Routing("foo".into()));
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["id"], Value::Null);
        assert_eq!(value["error"]["code"], -32601);
        assert!(value.get("result").is_none());
    }
}
