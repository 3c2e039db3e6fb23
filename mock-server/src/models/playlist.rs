//! Playlists shared between the player and playlist handlers.

use crate::lock;
use crate::models::media::{MediaItem, PlaylistId};
use std::sync::{Arc, Mutex};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Playlist {
    pub items: Vec<MediaItem>,
    /// Index of the item the player is on, if this playlist is playing.
    pub position: Option<usize>,
}

/// One ordered list per [`PlaylistId`], behind a single lock.
///
/// Cloning shares the underlying lists.
#[derive(Clone, Debug, Default)]
pub struct PlaylistStore {
    inner: Arc<Mutex<[Playlist; 3]>>,
}

impl PlaylistStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self, id: PlaylistId) -> Vec<MediaItem> {
        lock(&self.inner)[id.ordinal()].items.clone()
    }

    pub fn len(&self, id: PlaylistId) -> usize {
        lock(&self.inner)[id.ordinal()].items.len()
    }

    pub fn is_empty(&self, id: PlaylistId) -> bool {
        self.len(id) == 0
    }

    pub fn item_at(&self, id: PlaylistId, index: usize) -> Option<MediaItem> {
        lock(&self.inner)[id.ordinal()].items.get(index).cloned()
    }

    /// Append an item, returning the index it landed at.
    pub fn add(&self, id: PlaylistId, item: MediaItem) -> usize {
        let mut lists = lock(&self.inner);
        let list = &mut lists[id.ordinal()];
        list.items.push(item);
        list.items.len() - 1
    }

    /// Remove the item at `index`, keeping the cursor on the same item.
    pub fn remove(&self, id: PlaylistId, index: usize) -> Option<MediaItem> {
        let mut lists = lock(&self.inner);
        let list = &mut lists[id.ordinal()];
        if index >= list.items.len() {
            return None;
        }
        let removed = list.items.remove(index);
        list.position = match list.position {
            Some(pos) if pos == index => None,
            Some(pos) if pos > index => Some(pos - 1),
            other => other,
        };
        Some(removed)
    }

    pub fn clear(&self, id: PlaylistId) {
        lock(&self.inner)[id.ordinal()] = Playlist::default();
    }

    pub fn position(&self, id: PlaylistId) -> Option<usize> {
        lock(&self.inner)[id.ordinal()].position
    }

    pub fn set_position(&self, id: PlaylistId, position: Option<usize>) {
        lock(&self.inner)[id.ordinal()].position = position;
    }

    pub fn snapshot(&self, id: PlaylistId) -> Playlist {
        lock(&self.inner)[id.ordinal()].clone()
    }

    /// Empty every playlist.
    pub fn reset(&self) {
        *lock(&self.inner) = Default::default();
    }
}
