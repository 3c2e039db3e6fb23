use crate::lock;
use crate::rpc::handler::{dispatch_method, ConnectionHandler, HandlerBookkeeping, MethodSet};
use crate::rpc::{parse_params, select_properties, RpcError, RpcResult};
use crate::transport::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Mutex;

pub const DEFAULT_VOLUME: i64 = 100;
pub const MAX_VOLUME: i64 = 100;
pub const VOLUME_STEP: i64 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplicationMethod {
    GetProperties,
    SetMute,
    SetVolume,
    Quit,
}

impl MethodSet for ApplicationMethod {
    const ALL: &'static [Self] = &[
        ApplicationMethod::GetProperties,
        ApplicationMethod::SetMute,
        ApplicationMethod::SetVolume,
        ApplicationMethod::Quit,
    ];

    fn name(self) -> &'static str {
        match self {
            ApplicationMethod::GetProperties => "Application.GetProperties",
            ApplicationMethod::SetMute => "Application.SetMute",
            ApplicationMethod::SetVolume => "Application.SetVolume",
            ApplicationMethod::Quit => "Application.Quit",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct AudioState {
    volume: i64,
    muted: bool,
}

impl Default for AudioState {
    fn default() -> Self {
        Self {
            volume: DEFAULT_VOLUME,
            muted: false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PropertiesParams {
    #[serde(default)]
    properties: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct MuteParams {
    #[serde(default)]
    mute: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct VolumeParams {
    volume: Value,
}

/// The `Application.*` namespace: volume and mute.
#[derive(Debug, Default)]
pub struct ApplicationHandler {
    books: HandlerBookkeeping,
    state: Mutex<AudioState>,
}

impl ApplicationHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn volume(&self) -> i64 {
        lock(&self.state).volume
    }

    pub fn is_muted(&self) -> bool {
        lock(&self.state).muted
    }

    pub fn set_muted(&self, muted: bool, notify: bool) {
        self.update(notify, |state| state.muted = muted);
    }

    /// Set the volume, clamped to `0..=MAX_VOLUME`. Returns the stored value.
    pub fn set_volume(&self, volume: i64, notify: bool) -> i64 {
        self.update(notify, |state| state.volume = volume.clamp(0, MAX_VOLUME))
            .volume
    }

    /// Read-modify-write under one lock, then notify with the result.
    fn update(&self, notify: bool, change: impl FnOnce(&mut AudioState)) -> AudioState {
        let state = {
            let mut state = lock(&self.state);
            change(&mut state);
            *state
        };
        if notify {
            self.notify_volume_changed(state);
        }
        state
    }

    fn notify_volume_changed(&self, state: AudioState) {
        self.books.add_notification(JsonRpcNotification::from_server(
            "Application.OnVolumeChanged",
            json!({ "muted": state.muted, "volume": state.volume }),
        ));
    }

    fn run(&self, method: ApplicationMethod, params: &Value) -> Option<RpcResult<Value>> {
        match method {
            ApplicationMethod::GetProperties => Some(self.get_properties(params)),
            ApplicationMethod::SetMute => Some(self.handle_set_mute(params)),
            ApplicationMethod::SetVolume => Some(self.handle_set_volume(params)),
            ApplicationMethod::Quit => Some(Ok(json!("OK"))),
        }
    }

    fn get_properties(&self, params: &Value) -> RpcResult<Value> {
        let params: PropertiesParams = parse_params(params)?;
        let state = *lock(&self.state);

        let mut all = Map::new();
        all.insert("volume".into(), json!(state.volume));
        all.insert("muted".into(), json!(state.muted));
        all.insert("name".into(), json!("Kodi"));
        all.insert(
            "version".into(),
            json!({ "major": 21, "minor": 0, "revision": "mock", "tag": "stable" }),
        );
        Ok(select_properties(all, &params.properties))
    }

    fn handle_set_mute(&self, params: &Value) -> RpcResult<Value> {
        let params: MuteParams = parse_params(params)?;
        let toggle = match params.mute {
            None => None,
            Some(Value::Bool(mute)) => Some(mute),
            Some(Value::String(token)) if token == "toggle" => None,
            Some(other) => {
                return Err(RpcError::invalid_params(format!(
                    "mute must be a boolean or \"toggle\", got {other}"
                )))
            }
        };
        let state = self.update(true, |state| {
            state.muted = toggle.unwrap_or(!state.muted);
        });
        Ok(json!(state.muted))
    }

    fn handle_set_volume(&self, params: &Value) -> RpcResult<Value> {
        let params: VolumeParams = parse_params(params)?;
        let change = match &params.volume {
            Value::Number(number) => VolumeChange::Absolute(number.as_i64().ok_or_else(|| {
                RpcError::invalid_params(format!("volume must be an integer, got {number}"))
            })?),
            Value::String(token) if token == "increment" => VolumeChange::Step(VOLUME_STEP),
            Value::String(token) if token == "decrement" => VolumeChange::Step(-VOLUME_STEP),
            other => {
                return Err(RpcError::invalid_params(format!(
                    "volume must be an integer, \"increment\" or \"decrement\", got {other}"
                )))
            }
        };
        let state = self.update(true, |state| {
            let target = match change {
                VolumeChange::Absolute(volume) => volume,
                VolumeChange::Step(step) => state.volume.saturating_add(step),
            };
            state.volume = target.clamp(0, MAX_VOLUME);
        });
        Ok(json!(state.volume))
    }
}

#[derive(Clone, Copy, Debug)]
enum VolumeChange {
    Absolute(i64),
    Step(i64),
}

impl ConnectionHandler for ApplicationHandler {
    fn name(&self) -> &'static str {
        "application"
    }

    fn supported_methods(&self) -> Vec<&'static str> {
        ApplicationMethod::names()
    }

    fn handle(&self, method: &str, request: &JsonRpcRequest) -> Vec<JsonRpcResponse> {
        dispatch_method::<ApplicationMethod>(self.name(), &self.books, method, request, |m| {
            self.run(m, &request.params)
        })
    }

    fn bookkeeping(&self) -> &HandlerBookkeeping {
        &self.books
    }

    fn reset(&self) {
        *lock(&self.state) = AudioState::default();
        self.books.clear();
    }
}
