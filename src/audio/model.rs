//! Lavalink v4 wire types.
//!
//! Only the fields the bot reads or writes are modelled; everything else
//! in the payloads is ignored by serde.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub encoded: String,
    pub info: TrackInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackInfo {
    pub identifier: String,
    pub is_seekable: bool,
    pub author: String,
    /// Length in milliseconds
    pub length: u64,
    pub is_stream: bool,
    #[serde(default)]
    pub position: u64,
    pub title: String,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub artwork_url: Option<String>,
    #[serde(default)]
    pub isrc: Option<String>,
    pub source_name: String,
}

impl Track {
    pub fn title(&self) -> &str {
        &self.info.title
    }

    pub fn length(&self) -> Duration {
        Duration::from_millis(self.info.length)
    }
}

/// Result of `GET /v4/loadtracks`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "loadType", content = "data", rename_all = "camelCase")]
pub enum LoadResult {
    Track(Track),
    Playlist(Playlist),
    Search(Vec<Track>),
    Empty {},
    Error(Exception),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Playlist {
    pub info: PlaylistInfo,
    pub tracks: Vec<Track>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistInfo {
    pub name: String,
    #[serde(default = "no_selection")]
    pub selected_track: i64,
}

fn no_selection() -> i64 {
    -1
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Exception {
    #[serde(default)]
    pub message: Option<String>,
    pub severity: String,
    #[serde(default)]
    pub cause: String,
}

/// Body of `PATCH /v4/sessions/{session}/players/{guild}`.
///
/// `None` fields are left out of the JSON so Lavalink keeps their current
/// value. `track` is special: `Some(UpdatePlayerTrack { encoded: None })`
/// serializes as `{"encoded": null}`, which stops playback.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePlayer {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track: Option<UpdatePlayerTrack>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paused: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<Filters>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<VoiceState>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePlayerTrack {
    pub encoded: Option<String>,
}

impl UpdatePlayer {
    pub fn play(track: &Track, volume: u16) -> Self {
        Self {
            track: Some(UpdatePlayerTrack {
                encoded: Some(track.encoded.clone()),
            }),
            volume: Some(volume),
            paused: Some(false),
            ..Default::default()
        }
    }

    pub fn stop() -> Self {
        Self {
            track: Some(UpdatePlayerTrack { encoded: None }),
            ..Default::default()
        }
    }

    pub fn paused(paused: bool) -> Self {
        Self {
            paused: Some(paused),
            ..Default::default()
        }
    }

    pub fn seek(position: u64) -> Self {
        Self {
            position: Some(position),
            ..Default::default()
        }
    }

    pub fn filters(filters: Filters) -> Self {
        Self {
            filters: Some(filters),
            ..Default::default()
        }
    }

    pub fn voice(voice: VoiceState) -> Self {
        Self {
            voice: Some(voice),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceState {
    pub token: String,
    pub endpoint: String,
    pub session_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Filters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timescale: Option<Timescale>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Timescale {
    pub speed: f64,
    pub pitch: f64,
    pub rate: f64,
}

impl Timescale {
    pub const NIGHTCORE: Timescale = Timescale {
        speed: 1.1,
        pitch: 1.2,
        rate: 1.0,
    };
}

impl Filters {
    pub fn nightcore() -> Self {
        Self {
            timescale: Some(Timescale::NIGHTCORE),
        }
    }

    pub fn is_nightcore(&self) -> bool {
        self.timescale == Some(Timescale::NIGHTCORE)
    }
}

/// Response of `GET /v4/info`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    pub version: NodeVersion,
    #[serde(default)]
    pub source_managers: Vec<String>,
    #[serde(default)]
    pub plugins: Vec<NodePlugin>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeVersion {
    pub semver: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodePlugin {
    pub name: String,
    pub version: String,
}

/// Messages received on the Lavalink websocket.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum IncomingMessage {
    #[serde(rename_all = "camelCase")]
    Ready { resumed: bool, session_id: String },
    #[serde(rename_all = "camelCase")]
    PlayerUpdate { guild_id: String, state: PlayerUpdateState },
    Stats(serde_json::Value),
    Event(TrackEvent),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerUpdateState {
    /// Unix time in milliseconds when the state was captured
    pub time: u64,
    #[serde(default)]
    pub position: u64,
    pub connected: bool,
    #[serde(default)]
    pub ping: i64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum TrackEvent {
    #[serde(rename_all = "camelCase")]
    TrackStartEvent { guild_id: String, track: Track },
    #[serde(rename_all = "camelCase")]
    TrackEndEvent {
        guild_id: String,
        track: Track,
        reason: TrackEndReason,
    },
    #[serde(rename_all = "camelCase")]
    TrackExceptionEvent {
        guild_id: String,
        track: Track,
        exception: Exception,
    },
    #[serde(rename_all = "camelCase")]
    TrackStuckEvent {
        guild_id: String,
        track: Track,
        threshold_ms: u64,
    },
    #[serde(rename_all = "camelCase")]
    WebSocketClosedEvent {
        guild_id: String,
        code: u16,
        reason: String,
        by_remote: bool,
    },
}

impl TrackEvent {
    pub fn guild_id(&self) -> &str {
        match self {
            TrackEvent::TrackStartEvent { guild_id, .. }
            | TrackEvent::TrackEndEvent { guild_id, .. }
            | TrackEvent::TrackExceptionEvent { guild_id, .. }
            | TrackEvent::TrackStuckEvent { guild_id, .. }
            | TrackEvent::WebSocketClosedEvent { guild_id, .. } => guild_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TrackEndReason {
    Finished,
    LoadFailed,
    Stopped,
    Replaced,
    Cleanup,
}

impl TrackEndReason {
    pub fn may_start_next(self) -> bool {
        matches!(self, TrackEndReason::Finished | TrackEndReason::LoadFailed)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn track(title: &str, length: u64) -> Track {
        Track {
            encoded: format!("enc:{}", title),
            info: TrackInfo {
                identifier: title.to_lowercase(),
                is_seekable: true,
                author: "Artist".into(),
                length,
                is_stream: false,
                position: 0,
                title: title.into(),
                uri: Some(format!("https://example.com/{}", title.to_lowercase())),
                artwork_url: None,
                isrc: None,
                source_name: "youtube".into(),
            },
        }
    }

    pub fn track_json(title: &str) -> serde_json::Value {
        serde_json::json!({
            "encoded": format!("enc:{}", title),
            "info": {
                "identifier": title.to_lowercase(),
                "isSeekable": true,
                "author": "Artist",
                "length": 180000,
                "isStream": false,
                "position": 0,
                "title": title,
                "uri": format!("https://example.com/{}", title.to_lowercase()),
                "artworkUrl": null,
                "isrc": null,
                "sourceName": "youtube"
            },
            "pluginInfo": {},
            "userData": {}
        })
    }
}
