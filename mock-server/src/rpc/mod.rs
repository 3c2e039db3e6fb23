use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod dispatcher;
pub mod handler;
pub mod handlers;

pub use dispatcher::Dispatcher;
pub use handler::{ConnectionHandler, HandlerBookkeeping, MethodSet};

pub const CODE_INVALID_PARAMS: &str = "INVALID_PARAMS";
pub const CODE_NOT_FOUND: &str = "NOT_FOUND";
pub const CODE_FAILED: &str = "FAILED";
pub const CODE_UNSUPPORTED: &str = "UNSUPPORTED";

/// Handler-level failure, mapped to a JSON-RPC error by the transport types.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcError {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(code: &'static str, message: impl Into<String>, data: Value) -> Self {
        Self {
            code,
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(CODE_INVALID_PARAMS, message)
    }
}

pub type RpcResult<T> = Result<T, RpcError>;

/// Deserialize request params, treating absent params as an empty object.
pub fn parse_params<T: for<'de> Deserialize<'de>>(params: &Value) -> RpcResult<T> {
    let params = if params.is_null() {
        Value::Object(Default::default())
    } else {
        params.clone()
    };
    serde_json::from_value(params).map_err(|err| {
        RpcError::with_data(
            CODE_INVALID_PARAMS,
            "Invalid params",
            Value::String(err.to_string()),
        )
    })
}

/// Pick the requested subset of a property map, or all of it when the
/// caller named none. Unknown names are skipped.
pub fn select_properties(all: serde_json::Map<String, Value>, requested: &[String]) -> Value {
    if requested.is_empty() {
        return Value::Object(all);
    }
    let selected = requested
        .iter()
        .filter_map(|name| all.get(name).map(|value| (name.clone(), value.clone())))
        .collect();
    Value::Object(selected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    struct Params {
        #[serde(default)]
        playerid: Option<i64>,
    }

    #[test]
    fn parse_params_accepts_null() {
        let params: Params = parse_params(&Value::Null).unwrap();
        assert!(params.playerid.is_none());
    }

    #[test]
    fn parse_params_reports_type_errors() {
        let err = parse_params::<Params>(&json!({ "playerid": "zero" })).unwrap_err();
        assert_eq!(err.code, CODE_INVALID_PARAMS);
        assert!(err.data.is_some());
    }

    #[test]
    fn select_properties_filters_by_name() {
        let mut all = serde_json::Map::new();
        all.insert("volume".into(), json!(40));
        all.insert("muted".into(), json!(false));

        let picked = select_properties(all.clone(), &["muted".to_string(), "bogus".to_string()]);
        assert_eq!(picked, json!({ "muted": false }));
        assert_eq!(select_properties(all, &[]), json!({ "volume": 40, "muted": false }));
    }
}
