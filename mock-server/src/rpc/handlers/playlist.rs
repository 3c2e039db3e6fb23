use crate::models::{MediaItem, MediaKind, PlaylistId, PlaylistStore};
use crate::rpc::handler::{dispatch_method, ConnectionHandler, HandlerBookkeeping, MethodSet};
use crate::rpc::{parse_params, RpcError, RpcResult, CODE_NOT_FOUND};
use crate::transport::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use serde::Deserialize;
use serde_json::{json, Value};

/// Running time given to items added by library reference.
pub const REFERENCE_ITEM_DURATION: u64 = 180;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaylistMethod {
    GetPlaylists,
    GetItems,
    Add,
    Remove,
    Clear,
}

impl MethodSet for PlaylistMethod {
    const ALL: &'static [Self] = &[
        PlaylistMethod::GetPlaylists,
        PlaylistMethod::GetItems,
        PlaylistMethod::Add,
        PlaylistMethod::Remove,
        PlaylistMethod::Clear,
    ];

    fn name(self) -> &'static str {
        match self {
            PlaylistMethod::GetPlaylists => "Playlist.GetPlaylists",
            PlaylistMethod::GetItems => "Playlist.GetItems",
            PlaylistMethod::Add => "Playlist.Add",
            PlaylistMethod::Remove => "Playlist.Remove",
            PlaylistMethod::Clear => "Playlist.Clear",
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct Limits {
    #[serde(default)]
    start: usize,
    #[serde(default)]
    end: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct PlaylistParams {
    playlistid: i64,
}

#[derive(Debug, Deserialize)]
struct GetItemsParams {
    playlistid: i64,
    #[serde(default)]
    limits: Limits,
}

#[derive(Debug, Deserialize)]
struct AddParams {
    playlistid: i64,
    item: Value,
}

#[derive(Debug, Deserialize)]
struct RemoveParams {
    playlistid: i64,
    position: usize,
}

pub(crate) fn playlist_id(ordinal: i64) -> RpcResult<PlaylistId> {
    PlaylistId::from_ordinal(ordinal)
        .ok_or_else(|| RpcError::invalid_params(format!("unknown playlist id {ordinal}")))
}

/// Turn a `Playlist.Add` item into a media item. Library references
/// (`songid`, `movieid`, ...) get a synthetic title; anything else must be a
/// full item object.
fn item_from_param(item: &Value) -> RpcResult<MediaItem> {
    let Some(object) = item.as_object() else {
        return Err(RpcError::invalid_params("item must be an object"));
    };

    let references = [
        ("songid", MediaKind::Song),
        ("movieid", MediaKind::Movie),
        ("episodeid", MediaKind::Episode),
        ("musicvideoid", MediaKind::MusicVideo),
    ];
    for (key, kind) in references {
        if let Some(id) = object.get(key) {
            let id = id
                .as_i64()
                .ok_or_else(|| RpcError::invalid_params(format!("{key} must be an integer")))?;
            let title = format!("{} {id}", kind.as_str());
            return Ok(MediaItem::new(kind, Some(id), title, REFERENCE_ITEM_DURATION));
        }
    }

    if object.len() == 1 {
        if let Some(file) = object.get("file").and_then(Value::as_str) {
            return Ok(MediaItem {
                label: file.to_string(),
                title: file.to_string(),
                file: file.to_string(),
                ..Default::default()
            });
        }
    }

    serde_json::from_value(item.clone())
        .map_err(|err| RpcError::invalid_params(format!("invalid item: {err}")))
}

/// The `Playlist.*` namespace over the shared [`PlaylistStore`].
#[derive(Debug, Default)]
pub struct PlaylistHandler {
    books: HandlerBookkeeping,
    store: PlaylistStore,
}

impl PlaylistHandler {
    pub fn new(store: PlaylistStore) -> Self {
        Self {
            books: HandlerBookkeeping::new(),
            store,
        }
    }

    pub fn store(&self) -> &PlaylistStore {
        &self.store
    }

    /// Append `item` and return its index, optionally queueing `OnAdd`.
    pub fn add_item_to_playlist(&self, id: PlaylistId, item: MediaItem, notify: bool) -> usize {
        let item_ref = item.notification_ref();
        let position = self.store.add(id, item);
        if notify {
            self.books.add_notification(JsonRpcNotification::from_server(
                "Playlist.OnAdd",
                json!({ "item": item_ref, "playlistid": id.ordinal(), "position": position }),
            ));
        }
        position
    }

    pub fn clear_playlist(&self, id: PlaylistId, notify: bool) {
        self.store.clear(id);
        if notify {
            self.books.add_notification(JsonRpcNotification::from_server(
                "Playlist.OnClear",
                json!({ "playlistid": id.ordinal() }),
            ));
        }
    }

    pub fn get_playlist(&self, id: PlaylistId) -> Vec<MediaItem> {
        self.store.items(id)
    }

    fn run(&self, method: PlaylistMethod, params: &Value) -> Option<RpcResult<Value>> {
        let result = match method {
            PlaylistMethod::GetPlaylists => Ok(Self::get_playlists()),
            PlaylistMethod::GetItems => self.get_items(params),
            PlaylistMethod::Add => self.handle_add(params),
            PlaylistMethod::Remove => self.handle_remove(params),
            PlaylistMethod::Clear => self.handle_clear(params),
        };
        Some(result)
    }

    fn get_playlists() -> Value {
        let playlists: Vec<Value> = PlaylistId::ALL
            .iter()
            .map(|id| json!({ "playlistid": id.ordinal(), "type": id.as_str() }))
            .collect();
        Value::Array(playlists)
    }

    fn get_items(&self, params: &Value) -> RpcResult<Value> {
        let params: GetItemsParams = parse_params(params)?;
        let items = self.store.items(playlist_id(params.playlistid)?);
        let total = items.len();
        let start = params.limits.start.min(total);
        let end = params.limits.end.unwrap_or(total).clamp(start, total);

        let page: Vec<Value> = items[start..end].iter().map(MediaItem::to_value).collect();
        Ok(json!({
            "items": page,
            "limits": { "start": start, "end": end, "total": total },
        }))
    }

    fn handle_add(&self, params: &Value) -> RpcResult<Value> {
        let params: AddParams = parse_params(params)?;
        let id = playlist_id(params.playlistid)?;
        let item = item_from_param(&params.item)?;
        self.add_item_to_playlist(id, item, true);
        Ok(json!("OK"))
    }

    fn handle_remove(&self, params: &Value) -> RpcResult<Value> {
        let params: RemoveParams = parse_params(params)?;
        let id = playlist_id(params.playlistid)?;
        if self.store.remove(id, params.position).is_none() {
            return Err(RpcError::new(
                CODE_NOT_FOUND,
                format!("no item at position {} in playlist {}", params.position, id.as_str()),
            ));
        }
        self.books.add_notification(JsonRpcNotification::from_server(
            "Playlist.OnRemove",
            json!({ "playlistid": id.ordinal(), "position": params.position }),
        ));
        Ok(json!("OK"))
    }

    fn handle_clear(&self, params: &Value) -> RpcResult<Value> {
        let params: PlaylistParams = parse_params(params)?;
        self.clear_playlist(playlist_id(params.playlistid)?, true);
        Ok(json!("OK"))
    }
}

impl ConnectionHandler for PlaylistHandler {
    fn name(&self) -> &'static str {
        "playlist"
    }

    fn supported_methods(&self) -> Vec<&'static str> {
        PlaylistMethod::names()
    }

    fn handle(&self, method: &str, request: &JsonRpcRequest) -> Vec<JsonRpcResponse> {
        dispatch_method::<PlaylistMethod>(self.name(), &self.books, method, request, |m| {
            self.run(m, &request.params)
        })
    }

    fn bookkeeping(&self) -> &HandlerBookkeeping {
        &self.books
    }

    fn reset(&self) {
        self.store.reset();
        self.books.clear();
    }
}
