use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Library item type as the media server names it on the wire.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Song,
    Movie,
    Episode,
    MusicVideo,
    Picture,
    #[default]
    Unknown,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Song => "song",
            MediaKind::Movie => "movie",
            MediaKind::Episode => "episode",
            MediaKind::MusicVideo => "musicvideo",
            MediaKind::Picture => "picture",
            MediaKind::Unknown => "unknown",
        }
    }

    /// The playlist (and player) this kind of item plays on.
    pub fn playlist(&self) -> PlaylistId {
        match self {
            MediaKind::Song | MediaKind::Unknown => PlaylistId::Audio,
            MediaKind::Movie | MediaKind::Episode | MediaKind::MusicVideo => PlaylistId::Video,
            MediaKind::Picture => PlaylistId::Picture,
        }
    }
}

/// Playlist ordinal. Player ids use the same numbering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PlaylistId {
    Audio = 0,
    Video = 1,
    Picture = 2,
}

impl PlaylistId {
    pub const ALL: [PlaylistId; 3] = [PlaylistId::Audio, PlaylistId::Video, PlaylistId::Picture];

    pub fn from_ordinal(ordinal: i64) -> Option<Self> {
        match ordinal {
            0 => Some(PlaylistId::Audio),
            1 => Some(PlaylistId::Video),
            2 => Some(PlaylistId::Picture),
            _ => None,
        }
    }

    pub fn ordinal(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PlaylistId::Audio => "audio",
            PlaylistId::Video => "video",
            PlaylistId::Picture => "picture",
        }
    }
}

/// Wall-clock style time value used by `Player.GetProperties` and `Player.Seek`.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlaybackTime {
    #[serde(default)]
    pub hours: u64,
    #[serde(default)]
    pub minutes: u64,
    #[serde(default)]
    pub seconds: u64,
    #[serde(default)]
    pub milliseconds: u64,
}

impl PlaybackTime {
    pub fn from_secs(total: u64) -> Self {
        Self {
            hours: total / 3600,
            minutes: (total % 3600) / 60,
            seconds: total % 60,
            milliseconds: 0,
        }
    }

    /// Whole seconds, milliseconds truncated. `None` if the total overflows.
    pub fn as_secs(&self) -> Option<u64> {
        self.hours
            .checked_mul(3600)?
            .checked_add(self.minutes.checked_mul(60)?)?
            .checked_add(self.seconds)?
            .checked_add(self.milliseconds / 1000)
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct MediaItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(rename = "type", default)]
    pub kind: MediaKind,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub file: String,
    /// Running time in seconds.
    #[serde(default)]
    pub duration: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artist: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
}

impl MediaItem {
    pub fn new(kind: MediaKind, id: Option<i64>, title: impl Into<String>, duration: u64) -> Self {
        let title = title.into();
        let file = match id {
            Some(id) => format!("/media/{}/{id}", kind.as_str()),
            None => format!("/media/{}/{}", kind.as_str(), title),
        };
        Self {
            id,
            kind,
            label: title.clone(),
            title,
            file,
            duration,
            ..Default::default()
        }
    }

    pub fn song(id: i64, title: impl Into<String>, duration: u64) -> Self {
        Self::new(MediaKind::Song, Some(id), title, duration)
    }

    pub fn movie(id: i64, title: impl Into<String>, duration: u64) -> Self {
        Self::new(MediaKind::Movie, Some(id), title, duration)
    }

    pub fn picture(file: impl Into<String>) -> Self {
        let file = file.into();
        Self {
            kind: MediaKind::Picture,
            label: file.clone(),
            title: file.clone(),
            file,
            ..Default::default()
        }
    }

    pub fn with_artist(mut self, artist: impl Into<String>) -> Self {
        self.artist.push(artist.into());
        self
    }

    /// The short `item` reference carried by player and playlist notifications.
    pub fn notification_ref(&self) -> Value {
        match self.id {
            Some(id) => json!({ "id": id, "type": self.kind.as_str() }),
            None => json!({ "title": self.title, "type": self.kind.as_str() }),
        }
    }

    /// Full item payload for `Player.GetItem` and `Playlist.GetItems`.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
