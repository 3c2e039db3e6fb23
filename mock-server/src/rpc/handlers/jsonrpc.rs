use crate::rpc::handler::{dispatch_method, ConnectionHandler, HandlerBookkeeping, MethodSet};
use crate::rpc::RpcResult;
use crate::transport::{JsonRpcRequest, JsonRpcResponse};
use serde_json::{json, Value};

/// API version the mock reports from `JSONRPC.Version`.
pub const API_VERSION: (u32, u32, u32) = (12, 4, 0);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JsonRpcMethod {
    Ping,
    Version,
}

impl MethodSet for JsonRpcMethod {
    const ALL: &'static [Self] = &[JsonRpcMethod::Ping, JsonRpcMethod::Version];

    fn name(self) -> &'static str {
        match self {
            JsonRpcMethod::Ping => "JSONRPC.Ping",
            JsonRpcMethod::Version => "JSONRPC.Version",
        }
    }
}

/// The `JSONRPC.*` namespace: liveness and version checks.
#[derive(Debug, Default)]
pub struct JsonRpcHandler {
    books: HandlerBookkeeping,
}

impl JsonRpcHandler {
    pub fn new() -> Self {
        Self::default()
    }

    fn run(&self, method: JsonRpcMethod) -> RpcResult<Value> {
        match method {
            JsonRpcMethod::Ping => Ok(json!("pong")),
            JsonRpcMethod::Version => {
                let (major, minor, patch) = API_VERSION;
                Ok(json!({
                    "version": { "major": major, "minor": minor, "patch": patch }
                }))
            }
        }
    }
}

impl ConnectionHandler for JsonRpcHandler {
    fn name(&self) -> &'static str {
        "jsonrpc"
    }

    fn supported_methods(&self) -> Vec<&'static str> {
        JsonRpcMethod::names()
    }

    fn handle(&self, method: &str, request: &JsonRpcRequest) -> Vec<JsonRpcResponse> {
        dispatch_method::<JsonRpcMethod>(self.name(), &self.books, method, request, |m| {
            Some(self.run(m))
        })
    }

    fn bookkeeping(&self) -> &HandlerBookkeeping {
        &self.books
    }

    fn reset(&self) {
        self.books.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_answers_pong() {
        let handler = JsonRpcHandler::new();
        let request = JsonRpcRequest::new(1, "JSONRPC.Ping", Value::Null);
        let responses = handler.handle("JSONRPC.Ping", &request);
        assert_eq!(responses, vec![JsonRpcResponse::success(1, json!("pong"))]);
        assert!(handler.bookkeeping().was_handled("JSONRPC.Ping"));
    }

    #[test]
    fn version_reports_major() {
        let handler = JsonRpcHandler::new();
        let request = JsonRpcRequest::new(2, "JSONRPC.Version", Value::Null);
        let responses = handler.handle("JSONRPC.Version", &request);
        let result = responses[0].result.as_ref().unwrap();
        assert_eq!(result["version"]["major"], API_VERSION.0);
    }

    #[test]
    fn reset_forgets_handled_methods() {
        let handler = JsonRpcHandler::new();
        let request = JsonRpcRequest::new(1, "JSONRPC.Ping", Value::Null);
        handler.handle("JSONRPC.Ping", &request);
        handler.reset();
        assert!(!handler.bookkeeping().was_handled("JSONRPC.Ping"));
    }
}
