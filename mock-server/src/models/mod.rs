pub mod media;
pub mod playlist;

pub use media::{MediaItem, MediaKind, PlaybackTime, PlaylistId};
pub use playlist::{Playlist, PlaylistStore};
