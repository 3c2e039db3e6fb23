//! Simulated playback: a three-state player driving the shared playlists.

use crate::lock;
use crate::models::{MediaItem, PlaybackTime, PlaylistId, PlaylistStore};
use crate::rpc::handler::{dispatch_method, ConnectionHandler, HandlerBookkeeping, MethodSet};
use crate::rpc::handlers::playlist::playlist_id;
use crate::rpc::{parse_params, select_properties, RpcError, RpcResult, CODE_FAILED};
use crate::transport::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Mutex;

/// Seconds skipped by the `small*` seek steps.
pub const SMALL_SEEK_STEP: i64 = 30;
/// Seconds skipped by the `big*` seek steps.
pub const BIG_SEEK_STEP: i64 = 600;
/// Playback speeds the player accepts, in `increment` order.
pub const SPEEDS: [i64; 13] = [-32, -16, -8, -4, -2, -1, 0, 1, 2, 4, 8, 16, 32];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlayerMethod {
    GetActivePlayers,
    GetProperties,
    GetItem,
    Open,
    PlayPause,
    Stop,
    Seek,
    SetRepeat,
    SetShuffle,
    SetSpeed,
    GoTo,
    SetPartyMode,
    Zoom,
    Rotate,
}

impl MethodSet for PlayerMethod {
    const ALL: &'static [Self] = &[
        PlayerMethod::GetActivePlayers,
        PlayerMethod::GetProperties,
        PlayerMethod::GetItem,
        PlayerMethod::Open,
        PlayerMethod::PlayPause,
        PlayerMethod::Stop,
        PlayerMethod::Seek,
        PlayerMethod::SetRepeat,
        PlayerMethod::SetShuffle,
        PlayerMethod::SetSpeed,
        PlayerMethod::GoTo,
        PlayerMethod::SetPartyMode,
        PlayerMethod::Zoom,
        PlayerMethod::Rotate,
    ];

    fn name(self) -> &'static str {
        match self {
            PlayerMethod::GetActivePlayers => "Player.GetActivePlayers",
            PlayerMethod::GetProperties => "Player.GetProperties",
            PlayerMethod::GetItem => "Player.GetItem",
            PlayerMethod::Open => "Player.Open",
            PlayerMethod::PlayPause => "Player.PlayPause",
            PlayerMethod::Stop => "Player.Stop",
            PlayerMethod::Seek => "Player.Seek",
            PlayerMethod::SetRepeat => "Player.SetRepeat",
            PlayerMethod::SetShuffle => "Player.SetShuffle",
            PlayerMethod::SetSpeed => "Player.SetSpeed",
            PlayerMethod::GoTo => "Player.GoTo",
            PlayerMethod::SetPartyMode => "Player.SetPartyMode",
            PlayerMethod::Zoom => "Player.Zoom",
            PlayerMethod::Rotate => "Player.Rotate",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PlayState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RepeatMode {
    #[default]
    Off,
    One,
    All,
}

impl RepeatMode {
    pub fn as_str(self) -> &'static str {
        match self {
            RepeatMode::Off => "off",
            RepeatMode::One => "one",
            RepeatMode::All => "all",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "off" => Some(RepeatMode::Off),
            "one" => Some(RepeatMode::One),
            "all" => Some(RepeatMode::All),
            _ => None,
        }
    }

    /// off → one → all → off
    pub fn cycle(self) -> Self {
        match self {
            RepeatMode::Off => RepeatMode::One,
            RepeatMode::One => RepeatMode::All,
            RepeatMode::All => RepeatMode::Off,
        }
    }
}

#[derive(Clone, Debug, Default)]
struct PlayerState {
    play_state: PlayState,
    elapsed: u64,
    repeat: RepeatMode,
    shuffled: bool,
    speed: i64,
    playlist: Option<PlaylistId>,
    item: Option<MediaItem>,
}

impl PlayerState {
    fn duration(&self) -> u64 {
        self.item.as_ref().map_or(0, |item| item.duration)
    }

    fn item_ref(&self) -> Value {
        self.item
            .as_ref()
            .map_or_else(|| json!({ "type": "unknown" }), MediaItem::notification_ref)
    }

    fn player_data(&self, playerid: PlaylistId) -> Value {
        json!({
            "item": self.item_ref(),
            "player": { "playerid": playerid.ordinal(), "speed": self.speed },
        })
    }

    fn percentage(&self) -> f64 {
        match self.duration() {
            0 => 0.0,
            total => self.elapsed as f64 * 100.0 / total as f64,
        }
    }

    /// One `GetProperties` tick of simulated playback.
    fn tick(&mut self) {
        if self.play_state != PlayState::Playing {
            return;
        }
        self.elapsed += 1;
        let duration = self.duration();
        if self.elapsed > duration {
            self.elapsed = if self.repeat == RepeatMode::Off { duration } else { 0 };
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct PlayerParams {
    #[serde(default)]
    playerid: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct PropertiesParams {
    #[serde(default)]
    playerid: Option<i64>,
    #[serde(default)]
    properties: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct OpenTarget {
    playlistid: i64,
    #[serde(default)]
    position: usize,
}

#[derive(Debug, Deserialize)]
struct OpenParams {
    item: OpenTarget,
}

#[derive(Debug, Deserialize)]
struct PlayPauseParams {
    #[serde(default)]
    playerid: Option<i64>,
    #[serde(default)]
    play: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct SeekParams {
    #[serde(default)]
    playerid: Option<i64>,
    value: Value,
}

#[derive(Debug, Deserialize)]
struct RepeatParams {
    #[serde(default)]
    playerid: Option<i64>,
    repeat: String,
}

#[derive(Debug, Deserialize)]
struct ShuffleParams {
    #[serde(default)]
    playerid: Option<i64>,
    #[serde(default)]
    shuffle: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct SpeedParams {
    #[serde(default)]
    playerid: Option<i64>,
    speed: Value,
}

#[derive(Debug, Deserialize)]
struct GoToParams {
    #[serde(default)]
    playerid: Option<i64>,
    to: Value,
}

/// Parse a `true`/`false`/`"toggle"` switch; absent means toggle.
fn toggle_value(value: Option<&Value>, current: bool, field: &str) -> RpcResult<bool> {
    match value {
        None => Ok(!current),
        Some(Value::Bool(flag)) => Ok(*flag),
        Some(Value::String(token)) if token == "toggle" => Ok(!current),
        Some(other) => Err(RpcError::invalid_params(format!(
            "{field} must be a boolean or \"toggle\", got {other}"
        ))),
    }
}

/// Reject a `playerid` outside the known players.
fn check_player_id(params: &Value) -> RpcResult<()> {
    let params: PlayerParams = parse_params(params)?;
    if let Some(id) = params.playerid {
        playlist_id(id)?;
    }
    Ok(())
}

fn no_active_player() -> RpcError {
    RpcError::new(CODE_FAILED, "no active player")
}

/// The `Player.*` namespace.
///
/// Player ids share the playlist numbering. Lock order is player state first,
/// then the playlist store.
#[derive(Debug, Default)]
pub struct PlayerHandler {
    books: HandlerBookkeeping,
    state: Mutex<PlayerState>,
    store: PlaylistStore,
}

impl PlayerHandler {
    pub fn new(store: PlaylistStore) -> Self {
        Self {
            books: HandlerBookkeeping::new(),
            state: Mutex::default(),
            store,
        }
    }

    pub fn store(&self) -> &PlaylistStore {
        &self.store
    }

    pub fn play_state(&self) -> PlayState {
        lock(&self.state).play_state
    }

    /// Elapsed playback time in seconds.
    pub fn elapsed(&self) -> u64 {
        lock(&self.state).elapsed
    }

    pub fn repeat_mode(&self) -> RepeatMode {
        lock(&self.state).repeat
    }

    pub fn is_shuffled(&self) -> bool {
        lock(&self.state).shuffled
    }

    pub fn current_item(&self) -> Option<MediaItem> {
        lock(&self.state).item.clone()
    }

    /// Start playing `playlist[index]` as if `Player.Open` had been called.
    pub fn start_play(&self, playlist: PlaylistId, index: usize) -> RpcResult<()> {
        let notifications = self.load(playlist, index)?;
        self.emit(notifications);
        Ok(())
    }

    /// Stop playback as if `Player.Stop` had been called.
    pub fn stop_play(&self) {
        let notifications = self.stop();
        self.emit(notifications);
    }

    fn emit(&self, notifications: Vec<JsonRpcNotification>) {
        for notification in notifications {
            self.books.add_notification(notification);
        }
    }

    fn load(&self, playlist: PlaylistId, index: usize) -> RpcResult<Vec<JsonRpcNotification>> {
        let mut state = lock(&self.state);
        let item = self.store.item_at(playlist, index).ok_or_else(|| {
            RpcError::invalid_params(format!(
                "no item at position {index} in playlist {}",
                playlist.as_str()
            ))
        })?;

        if let Some(previous) = state.playlist.filter(|previous| *previous != playlist) {
            self.store.set_position(previous, None);
        }
        self.store.set_position(playlist, Some(index));

        let resumed_from_pause = state.play_state == PlayState::Paused;
        state.play_state = PlayState::Playing;
        state.speed = 1;
        state.elapsed = 0;
        state.playlist = Some(playlist);
        state.item = Some(item);

        let data = state.player_data(playlist);
        let mut notifications = vec![
            JsonRpcNotification::from_server("Player.OnPlay", data.clone()),
            JsonRpcNotification::from_server("Player.OnAVStart", data.clone()),
        ];
        if resumed_from_pause {
            notifications.push(JsonRpcNotification::from_server("Player.OnSpeedChanged", data));
        }
        Ok(notifications)
    }

    fn stop(&self) -> Vec<JsonRpcNotification> {
        let mut state = lock(&self.state);
        if state.play_state == PlayState::Stopped {
            return Vec::new();
        }
        let data = json!({ "item": state.item_ref(), "end": false });
        if let Some(playlist) = state.playlist {
            self.store.set_position(playlist, None);
        }
        *state = PlayerState {
            repeat: state.repeat,
            shuffled: state.shuffled,
            ..Default::default()
        };
        vec![JsonRpcNotification::from_server("Player.OnStop", data)]
    }

    /// The active player, checked against the caller's `playerid` if given.
    fn active(state: &PlayerState, playerid: Option<i64>) -> RpcResult<PlaylistId> {
        let active = match (state.play_state, state.playlist) {
            (PlayState::Stopped, _) | (_, None) => return Err(no_active_player()),
            (_, Some(active)) => active,
        };
        match playerid {
            Some(requested) if requested != active.ordinal() as i64 => Err(RpcError::new(
                CODE_FAILED,
                format!("player {requested} is not active"),
            )),
            _ => Ok(active),
        }
    }

    fn run(&self, method: PlayerMethod, params: &Value) -> Option<RpcResult<Value>> {
        let result = match method {
            PlayerMethod::GetActivePlayers => Ok(self.get_active_players()),
            PlayerMethod::GetProperties => self.get_properties(params),
            PlayerMethod::GetItem => self.get_item(params),
            PlayerMethod::Open => self.handle_open(params),
            PlayerMethod::PlayPause => self.handle_play_pause(params),
            PlayerMethod::Stop => self.handle_stop(params),
            PlayerMethod::Seek => self.handle_seek(params),
            PlayerMethod::SetRepeat => self.handle_set_repeat(params),
            PlayerMethod::SetShuffle => self.handle_set_shuffle(params),
            PlayerMethod::SetSpeed => self.handle_set_speed(params),
            PlayerMethod::GoTo => self.handle_go_to(params),
            PlayerMethod::SetPartyMode | PlayerMethod::Zoom | PlayerMethod::Rotate => return None,
        };
        Some(result)
    }

    fn get_active_players(&self) -> Value {
        let state = lock(&self.state);
        match Self::active(&state, None) {
            Ok(active) => json!([{
                "playerid": active.ordinal(),
                "type": active.as_str(),
                "playertype": "internal",
            }]),
            Err(_) => json!([]),
        }
    }

    fn get_properties(&self, params: &Value) -> RpcResult<Value> {
        let params: PropertiesParams = parse_params(params)?;
        let mut state = lock(&self.state);
        state.tick();

        let playlistid = params
            .playerid
            .or_else(|| state.playlist.map(|id| id.ordinal() as i64))
            .unwrap_or(-1);

        let mut all = Map::new();
        all.insert("speed".into(), json!(state.speed));
        all.insert("time".into(), json!(PlaybackTime::from_secs(state.elapsed)));
        all.insert("totaltime".into(), json!(PlaybackTime::from_secs(state.duration())));
        all.insert("percentage".into(), json!(state.percentage()));
        all.insert("repeat".into(), json!(state.repeat.as_str()));
        all.insert("shuffled".into(), json!(state.shuffled));
        all.insert("playlistid".into(), json!(playlistid));
        let position = state.playlist.and_then(|id| self.store.position(id));
        all.insert(
            "position".into(),
            json!(position.map_or(-1, |position| position as i64)),
        );
        all.insert(
            "type".into(),
            json!(state.playlist.map_or("audio", PlaylistId::as_str)),
        );
        Ok(select_properties(all, &params.properties))
    }

    fn get_item(&self, params: &Value) -> RpcResult<Value> {
        check_player_id(params)?;
        let state = lock(&self.state);
        let item = state.item.as_ref().map_or_else(
            || json!({ "label": "", "type": "unknown" }),
            MediaItem::to_value,
        );
        Ok(json!({ "item": item }))
    }

    fn handle_open(&self, params: &Value) -> RpcResult<Value> {
        let params: OpenParams = parse_params(params)?;
        let playlist = playlist_id(params.item.playlistid)?;
        self.start_play(playlist, params.item.position)?;
        Ok(json!("OK"))
    }

    fn handle_play_pause(&self, params: &Value) -> RpcResult<Value> {
        let params: PlayPauseParams = parse_params(params)?;
        let mut state = lock(&self.state);
        let active = Self::active(&state, params.playerid)?;

        let playing = state.play_state == PlayState::Playing;
        let play = toggle_value(params.play.as_ref(), playing, "play")?;
        if play == playing {
            return Ok(json!({ "speed": state.speed }));
        }

        let method = if play {
            state.play_state = PlayState::Playing;
            state.speed = 1;
            "Player.OnPlay"
        } else {
            state.play_state = PlayState::Paused;
            state.speed = 0;
            "Player.OnPause"
        };
        let data = state.player_data(active);
        let speed = state.speed;
        drop(state);

        self.emit(vec![
            JsonRpcNotification::from_server(method, data.clone()),
            JsonRpcNotification::from_server("Player.OnSpeedChanged", data),
        ]);
        Ok(json!({ "speed": speed }))
    }

    fn handle_stop(&self, params: &Value) -> RpcResult<Value> {
        check_player_id(params)?;
        self.stop_play();
        Ok(json!("OK"))
    }

    fn handle_seek(&self, params: &Value) -> RpcResult<Value> {
        let params: SeekParams = parse_params(params)?;
        let mut state = lock(&self.state);
        let active = Self::active(&state, params.playerid)?;
        let duration = i64::try_from(state.duration()).unwrap_or(i64::MAX);
        let elapsed = i64::try_from(state.elapsed).unwrap_or(i64::MAX);

        let step = |token: &str| -> RpcResult<i64> {
            match token {
                "smallforward" => Ok(elapsed.saturating_add(SMALL_SEEK_STEP)),
                "smallbackward" => Ok(elapsed.saturating_sub(SMALL_SEEK_STEP)),
                "bigforward" => Ok(elapsed.saturating_add(BIG_SEEK_STEP)),
                "bigbackward" => Ok(elapsed.saturating_sub(BIG_SEEK_STEP)),
                other => Err(RpcError::invalid_params(format!("unknown seek step {other}"))),
            }
        };
        let percentage = |value: f64| (value.clamp(0.0, 100.0) * duration as f64 / 100.0) as i64;
        let time = |value: &Value| -> RpcResult<i64> {
            let time = serde_json::from_value::<PlaybackTime>(value.clone())
                .map_err(|err| RpcError::invalid_params(format!("invalid seek time: {err}")))?;
            let secs = time
                .as_secs()
                .ok_or_else(|| RpcError::invalid_params("seek time out of range"))?;
            Ok(i64::try_from(secs).unwrap_or(i64::MAX))
        };

        let target = match &params.value {
            Value::String(token) => step(token)?,
            Value::Number(number) => percentage(number.as_f64().unwrap_or_default()),
            Value::Object(object) => {
                if let Some(token) = object.get("step").and_then(Value::as_str) {
                    step(token)?
                } else if let Some(value) = object.get("percentage").and_then(Value::as_f64) {
                    percentage(value)
                } else if let Some(offset) = object.get("seconds").and_then(Value::as_i64) {
                    elapsed.saturating_add(offset)
                } else if let Some(value) = object.get("time") {
                    time(value)?
                } else {
                    time(&params.value)?
                }
            }
            other => return Err(RpcError::invalid_params(format!("invalid seek value {other}"))),
        };

        let target = target.clamp(0, duration);
        state.elapsed = target.unsigned_abs();
        let offset = PlaybackTime::from_secs(target.abs_diff(elapsed));
        let result = json!({
            "percentage": state.percentage(),
            "time": PlaybackTime::from_secs(state.elapsed),
            "totaltime": PlaybackTime::from_secs(state.duration()),
        });
        let data = json!({
            "item": state.item_ref(),
            "player": {
                "playerid": active.ordinal(),
                "speed": state.speed,
                "time": PlaybackTime::from_secs(state.elapsed),
                "seekoffset": offset,
            },
        });
        drop(state);

        self.emit(vec![JsonRpcNotification::from_server("Player.OnSeek", data)]);
        Ok(result)
    }

    fn property_changed(playerid: Option<i64>, property: Value) -> JsonRpcNotification {
        JsonRpcNotification::from_server(
            "Player.OnPropertyChanged",
            json!({ "player": { "playerid": playerid.unwrap_or(0) }, "property": property }),
        )
    }

    fn handle_set_repeat(&self, params: &Value) -> RpcResult<Value> {
        let params: RepeatParams = parse_params(params)?;
        let repeat = {
            let mut state = lock(&self.state);
            state.repeat = match params.repeat.as_str() {
                "cycle" => state.repeat.cycle(),
                other => RepeatMode::parse(other).ok_or_else(|| {
                    RpcError::invalid_params(format!("unknown repeat mode {other}"))
                })?,
            };
            state.repeat
        };
        self.emit(vec![Self::property_changed(
            params.playerid,
            json!({ "repeat": repeat.as_str() }),
        )]);
        Ok(json!("OK"))
    }

    fn handle_set_shuffle(&self, params: &Value) -> RpcResult<Value> {
        let params: ShuffleParams = parse_params(params)?;
        let shuffled = {
            let mut state = lock(&self.state);
            state.shuffled = toggle_value(params.shuffle.as_ref(), state.shuffled, "shuffle")?;
            state.shuffled
        };
        self.emit(vec![Self::property_changed(
            params.playerid,
            json!({ "shuffled": shuffled }),
        )]);
        Ok(json!("OK"))
    }

    fn handle_set_speed(&self, params: &Value) -> RpcResult<Value> {
        let params: SpeedParams = parse_params(params)?;
        let mut state = lock(&self.state);
        let active = Self::active(&state, params.playerid)?;

        let current = SPEEDS.iter().position(|speed| *speed == state.speed).unwrap_or(7);
        let speed = match &params.speed {
            Value::String(token) if token == "increment" => {
                SPEEDS[(current + 1).min(SPEEDS.len() - 1)]
            }
            Value::String(token) if token == "decrement" => SPEEDS[current.saturating_sub(1)],
            Value::Number(number) => number
                .as_i64()
                .filter(|speed| SPEEDS.contains(speed))
                .ok_or_else(|| RpcError::invalid_params(format!("unsupported speed {number}")))?,
            other => return Err(RpcError::invalid_params(format!("invalid speed {other}"))),
        };

        state.speed = speed;
        state.play_state = if speed == 0 {
            PlayState::Paused
        } else {
            PlayState::Playing
        };
        let data = state.player_data(active);
        drop(state);

        self.emit(vec![JsonRpcNotification::from_server(
            "Player.OnSpeedChanged",
            data,
        )]);
        Ok(json!({ "speed": speed }))
    }

    fn handle_go_to(&self, params: &Value) -> RpcResult<Value> {
        let params: GoToParams = parse_params(params)?;
        let (playlist, target) = {
            let state = lock(&self.state);
            let active = Self::active(&state, params.playerid)?;
            // The store owns the cursor; with the current item removed, `next`
            // starts over from the top.
            let position = self
                .store
                .position(active)
                .map_or(-1, |position| position as i64);
            let target = match &params.to {
                Value::String(token) if token == "next" => position + 1,
                Value::String(token) if token == "previous" => position - 1,
                Value::Number(number) => number.as_i64().ok_or_else(|| {
                    RpcError::invalid_params(format!("invalid playlist position {number}"))
                })?,
                other => return Err(RpcError::invalid_params(format!("invalid target {other}"))),
            };
            (active, target)
        };
        let index = usize::try_from(target)
            .map_err(|_| RpcError::invalid_params(format!("no item at position {target}")))?;
        self.start_play(playlist, index)?;
        Ok(json!("OK"))
    }
}

impl ConnectionHandler for PlayerHandler {
    fn name(&self) -> &'static str {
        "player"
    }

    fn supported_methods(&self) -> Vec<&'static str> {
        PlayerMethod::names()
    }

    fn handle(&self, method: &str, request: &JsonRpcRequest) -> Vec<JsonRpcResponse> {
        dispatch_method::<PlayerMethod>(self.name(), &self.books, method, request, |m| {
            self.run(m, &request.params)
        })
    }

    fn bookkeeping(&self) -> &HandlerBookkeeping {
        &self.books
    }

    fn reset(&self) {
        let mut state = lock(&self.state);
        *state = PlayerState::default();
        for id in PlaylistId::ALL {
            self.store.set_position(id, None);
        }
        self.books.clear();
    }
}
