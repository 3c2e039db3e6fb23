//! Per-namespace handlers for the simulated media server.

pub mod addons;
pub mod application;
pub mod input;
pub mod jsonrpc;
pub mod player;
pub mod playlist;

pub use addons::AddonsHandler;
pub use application::ApplicationHandler;
pub use input::InputHandler;
pub use jsonrpc::JsonRpcHandler;
pub use player::PlayerHandler;
pub use playlist::PlaylistHandler;

use crate::models::PlaylistStore;
use crate::rpc::{ConnectionHandler, Dispatcher};
use std::sync::Arc;

/// The full handler set, with player and playlist sharing one store.
///
/// Tests keep the set to drive handler state directly (`player.start_play`,
/// `playlist.add_item_to_playlist`) while the server talks to the same
/// instances through the dispatcher.
#[derive(Clone)]
pub struct HandlerSet {
    pub jsonrpc: Arc<JsonRpcHandler>,
    pub application: Arc<ApplicationHandler>,
    pub player: Arc<PlayerHandler>,
    pub playlist: Arc<PlaylistHandler>,
    pub input: Arc<InputHandler>,
    pub addons: Arc<AddonsHandler>,
    pub playlists: PlaylistStore,
}

impl Default for HandlerSet {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerSet {
    pub fn new() -> Self {
        let playlists = PlaylistStore::new();
        Self {
            jsonrpc: Arc::new(JsonRpcHandler::new()),
            application: Arc::new(ApplicationHandler::new()),
            player: Arc::new(PlayerHandler::new(playlists.clone())),
            playlist: Arc::new(PlaylistHandler::new(playlists.clone())),
            input: Arc::new(InputHandler::new()),
            addons: Arc::new(AddonsHandler::new()),
            playlists,
        }
    }

    /// Every handler, in registration order.
    pub fn handlers(&self) -> Vec<Arc<dyn ConnectionHandler>> {
        vec![
            self.jsonrpc.clone() as Arc<dyn ConnectionHandler>,
            self.application.clone(),
            self.player.clone(),
            self.playlist.clone(),
            self.input.clone(),
            self.addons.clone(),
        ]
    }

    pub fn register_all(&self, dispatcher: &Dispatcher) {
        for handler in self.handlers() {
            dispatcher.register(handler);
        }
    }

    /// Restore every handler's simulated state.
    pub fn reset_all(&self) {
        for handler in self.handlers() {
            handler.reset();
        }
    }
}

/// A dispatcher with the full handler set registered.
pub fn default_handlers() -> (Dispatcher, HandlerSet) {
    let dispatcher = Dispatcher::new();
    let handlers = HandlerSet::new();
    handlers.register_all(&dispatcher);
    (dispatcher, handlers)
}
