use crate::lock;
use crate::rpc::handler::{dispatch_method, ConnectionHandler, HandlerBookkeeping, MethodSet};
use crate::rpc::{parse_params, select_properties, RpcError, RpcResult};
use crate::transport::{JsonRpcRequest, JsonRpcResponse};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Mutex;
use tracing::warn;

const FIXTURE: &str = include_str!("../../../fixtures/addons.json");

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddonsMethod {
    GetAddons,
    GetAddonDetails,
    ExecuteAddon,
}

impl MethodSet for AddonsMethod {
    const ALL: &'static [Self] = &[
        AddonsMethod::GetAddons,
        AddonsMethod::GetAddonDetails,
        AddonsMethod::ExecuteAddon,
    ];

    fn name(self) -> &'static str {
        match self {
            AddonsMethod::GetAddons => "Addons.GetAddons",
            AddonsMethod::GetAddonDetails => "Addons.GetAddonDetails",
            AddonsMethod::ExecuteAddon => "Addons.ExecuteAddon",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Addon {
    pub addonid: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub author: String,
    pub enabled: bool,
    #[serde(default)]
    pub thumbnail: String,
}

impl Addon {
    /// `addonid` and `type` always, plus the requested properties.
    fn to_value(&self, properties: &[String]) -> Value {
        let Ok(Value::Object(mut all)) = serde_json::to_value(self) else {
            return Value::Null;
        };
        let addonid = all.remove("addonid").unwrap_or_default();
        let kind = all.remove("type").unwrap_or_default();
        // Only named properties beyond the identity pair.
        let mut selected = if properties.is_empty() {
            serde_json::Map::new()
        } else {
            match select_properties(all, properties) {
                Value::Object(selected) => selected,
                _ => serde_json::Map::new(),
            }
        };
        selected.insert("addonid".into(), addonid);
        selected.insert("type".into(), kind);
        Value::Object(selected)
    }
}

/// Parse the bundled add-on list.
pub fn fixture_addons() -> Result<Vec<Addon>, serde_json::Error> {
    serde_json::from_str(FIXTURE)
}

#[derive(Debug, Default, Deserialize)]
struct Limits {
    #[serde(default)]
    start: usize,
    #[serde(default)]
    end: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct GetAddonsParams {
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    enabled: Option<Value>,
    #[serde(default)]
    properties: Vec<String>,
    #[serde(default)]
    limits: Limits,
}

#[derive(Debug, Deserialize)]
struct DetailsParams {
    addonid: String,
    #[serde(default)]
    properties: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ExecuteParams {
    addonid: String,
}

/// The `Addons.*` namespace over a fixed add-on catalogue.
#[derive(Debug)]
pub struct AddonsHandler {
    books: HandlerBookkeeping,
    addons: Vec<Addon>,
    executed: Mutex<Vec<String>>,
}

impl Default for AddonsHandler {
    fn default() -> Self {
        let addons = fixture_addons().unwrap_or_else(|err| {
            warn!(error = %err, "bundled add-on fixture is invalid; serving none");
            Vec::new()
        });
        Self::with_addons(addons)
    }
}

impl AddonsHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_addons(addons: Vec<Addon>) -> Self {
        Self {
            books: HandlerBookkeeping::new(),
            addons,
            executed: Mutex::default(),
        }
    }

    /// Ids passed to `Addons.ExecuteAddon`, oldest first.
    pub fn executed(&self) -> Vec<String> {
        lock(&self.executed).clone()
    }

    fn find(&self, addonid: &str) -> RpcResult<&Addon> {
        self.addons
            .iter()
            .find(|addon| addon.addonid == addonid)
            .ok_or_else(|| RpcError::invalid_params(format!("unknown addon {addonid}")))
    }

    fn run(&self, method: AddonsMethod, params: &Value) -> RpcResult<Value> {
        match method {
            AddonsMethod::GetAddons => self.get_addons(params),
            AddonsMethod::GetAddonDetails => {
                let params: DetailsParams = parse_params(params)?;
                let addon = self.find(&params.addonid)?;
                Ok(json!({ "addon": addon.to_value(&params.properties) }))
            }
            AddonsMethod::ExecuteAddon => {
                let params: ExecuteParams = parse_params(params)?;
                self.find(&params.addonid)?;
                lock(&self.executed).push(params.addonid);
                Ok(json!("OK"))
            }
        }
    }

    fn get_addons(&self, params: &Value) -> RpcResult<Value> {
        let params: GetAddonsParams = parse_params(params)?;
        let enabled = match params.enabled {
            None => None,
            Some(Value::Bool(flag)) => Some(flag),
            Some(Value::String(token)) if token == "all" => None,
            Some(other) => {
                return Err(RpcError::invalid_params(format!(
                    "enabled must be a boolean or \"all\", got {other}"
                )))
            }
        };

        let matching: Vec<&Addon> = self
            .addons
            .iter()
            .filter(|addon| enabled.map_or(true, |flag| addon.enabled == flag))
            .filter(|addon| params.kind.as_ref().map_or(true, |kind| &addon.kind == kind))
            .collect();
        let total = matching.len();
        let start = params.limits.start.min(total);
        let end = params.limits.end.unwrap_or(total).clamp(start, total);

        let addons: Vec<Value> = matching[start..end]
            .iter()
            .map(|addon| addon.to_value(&params.properties))
            .collect();
        Ok(json!({
            "addons": addons,
            "limits": { "start": start, "end": end, "total": total },
        }))
    }
}

impl ConnectionHandler for AddonsHandler {
    fn name(&self) -> &'static str {
        "addons"
    }

    fn supported_methods(&self) -> Vec<&'static str> {
        AddonsMethod::names()
    }

    fn handle(&self, method: &str, request: &JsonRpcRequest) -> Vec<JsonRpcResponse> {
        dispatch_method::<AddonsMethod>(self.name(), &self.books, method, request, |m| {
            Some(self.run(m, &request.params))
        })
    }

    fn bookkeeping(&self) -> &HandlerBookkeeping {
        &self.books
    }

    fn reset(&self) {
        lock(&self.executed).clear();
        self.books.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::JsonRpcError;

    fn call(handler: &AddonsHandler, method: &str, params: Value) -> JsonRpcResponse {
        let request = JsonRpcRequest::new(1, method, params);
        handler.handle(method, &request).remove(0)
    }

    #[test]
    fn fixture_parses() {
        let addons = fixture_addons().unwrap();
        assert_eq!(addons.len(), 5);
        assert!(addons.iter().any(|addon| !addon.enabled));
    }

    #[test]
    fn get_addons_filters_enabled() {
        let handler = AddonsHandler::new();
        let result = call(&handler, "Addons.GetAddons", json!({ "enabled": true }))
            .result
            .unwrap();
        assert_eq!(result["limits"]["total"], 4);

        let result = call(&handler, "Addons.GetAddons", json!({ "enabled": "all" }))
            .result
            .unwrap();
        assert_eq!(result["limits"]["total"], 5);
    }

    #[test]
    fn get_addons_filters_type_and_pages() {
        let handler = AddonsHandler::new();
        let result = call(
            &handler,
            "Addons.GetAddons",
            json!({
                "type": "xbmc.python.pluginsource",
                "properties": ["name"],
                "limits": { "start": 0, "end": 2 }
            }),
        )
        .result
        .unwrap();
        assert_eq!(result["limits"]["total"], 3);
        let addons = result["addons"].as_array().unwrap();
        assert_eq!(addons.len(), 2);
        assert_eq!(
            addons[0],
            json!({
                "addonid": "plugin.video.youtube",
                "type": "xbmc.python.pluginsource",
                "name": "YouTube"
            })
        );
    }

    #[test]
    fn details_for_known_and_unknown_addons() {
        let handler = AddonsHandler::new();
        let result = call(
            &handler,
            "Addons.GetAddonDetails",
            json!({ "addonid": "script.globalsearch", "properties": ["version", "enabled"] }),
        )
        .result
        .unwrap();
        assert_eq!(result["addon"]["version"], "9.0.7");
        assert_eq!(result["addon"]["enabled"], true);

        let response = call(
            &handler,
            "Addons.GetAddonDetails",
            json!({ "addonid": "plugin.nope" }),
        );
        assert_eq!(response.error.unwrap().code, JsonRpcError::INVALID_PARAMS);
    }

    #[test]
    fn execute_records_known_addons_only() {
        let handler = AddonsHandler::new();
        let response = call(
            &handler,
            "Addons.ExecuteAddon",
            json!({ "addonid": "plugin.video.youtube" }),
        );
        assert_eq!(response.result, Some(json!("OK")));

        let response = call(
            &handler,
            "Addons.ExecuteAddon",
            json!({ "addonid": "plugin.missing" }),
        );
        assert_eq!(response.error.unwrap().code, JsonRpcError::INVALID_PARAMS);
        assert_eq!(handler.executed(), vec!["plugin.video.youtube".to_string()]);
    }
}
