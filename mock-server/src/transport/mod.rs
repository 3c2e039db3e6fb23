//! JSON-RPC wire types and the TCP transport that carries them.
//!
//! The mock speaks the media server's raw-TCP dialect: requests arrive as
//! bare JSON objects with no delimiter between them, and every response or
//! notification goes back out as one JSON object followed by `\n`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod tcp;

/// Sender tag the media server stamps on every notification it pushes.
pub const NOTIFICATION_SENDER: &str = "xbmc";

/// JSON-RPC 2.0 request structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    /// Correlation token. Requests without one never get a response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
}

impl JsonRpcRequest {
    pub fn new(id: i64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params,
            id: Some(id),
        }
    }
}

/// JSON-RPC 2.0 response structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: i64,
}

impl JsonRpcResponse {
    pub fn success(id: i64, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(id: i64, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(error),
            id,
        }
    }
}

/// JSON-RPC 2.0 error structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;

    /// Generic application failure, used by the media server for
    /// "request was valid but could not be carried out".
    pub const FAILED_TO_EXECUTE: i32 = -32100;

    /// Convert from a handler-level RpcError to a JSON-RPC error.
    pub fn from_rpc_error(err: &crate::rpc::RpcError) -> Self {
        let code = match err.code {
            crate::rpc::CODE_INVALID_PARAMS => Self::INVALID_PARAMS,
            crate::rpc::CODE_NOT_FOUND => Self::INVALID_PARAMS,
            crate::rpc::CODE_FAILED => Self::FAILED_TO_EXECUTE,
            crate::rpc::CODE_UNSUPPORTED => Self::METHOD_NOT_FOUND,
            _ => Self::INTERNAL_ERROR,
        };

        Self {
            code,
            message: err.message.clone(),
            data: err.data.clone(),
        }
    }
}

/// JSON-RPC 2.0 notification (server -> client push).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    pub params: Value,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params,
        }
    }

    /// Build a server push in the `{"data": ..., "sender": "xbmc"}` envelope.
    pub fn from_server(method: impl Into<String>, data: Value) -> Self {
        Self::new(
            method,
            serde_json::json!({
                "data": data,
                "sender": NOTIFICATION_SENDER,
            }),
        )
    }

    /// The `data` member of a server push, if present.
    pub fn data(&self) -> Option<&Value> {
        self.params.get("data")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserialize_request_with_id() {
        let json = r#"{"jsonrpc":"2.0","method":"JSONRPC.Ping","params":{},"id":1}"#;
        let req: JsonRpcRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.method, "JSONRPC.Ping");
        assert_eq!(req.id, Some(1));
    }

    #[test]
    fn deserialize_request_without_params() {
        let json = r#"{"jsonrpc":"2.0","method":"Player.GetActivePlayers","id":7}"#;
        let req: JsonRpcRequest = serde_json::from_str(json).unwrap();
        assert!(req.params.is_null());
    }

    #[test]
    fn request_with_string_id_is_rejected() {
        let json = r#"{"jsonrpc":"2.0","method":"JSONRPC.Ping","id":"abc"}"#;
        assert!(serde_json::from_str::<JsonRpcRequest>(json).is_err());
    }

    #[test]
    fn serialize_success_response() {
        let resp = JsonRpcResponse::success(3, json!("OK"));
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"result\":\"OK\""));
        assert!(json.contains("\"id\":3"));
        assert!(!json.contains("error"));
    }

    #[test]
    fn serialize_error_response() {
        let err = crate::rpc::RpcError::invalid_params("missing playerid");
        let resp = JsonRpcResponse::error(1, JsonRpcError::from_rpc_error(&err));
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"code\":-32602"));
        assert!(!json.contains("result"));
    }

    #[test]
    fn server_notification_has_no_id() {
        let notification =
            JsonRpcNotification::from_server("Player.OnStop", json!({ "end": false }));
        let value = serde_json::to_value(&notification).unwrap();
        assert!(value.get("id").is_none());
        assert_eq!(value["params"]["sender"], "xbmc");
        assert_eq!(notification.data(), Some(&json!({ "end": false })));
    }
}
