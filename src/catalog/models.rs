//! Catalog API response models

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Bitrate level requested from the catalog
///
/// The level also decides the output container: the two lossy levels are
/// delivered as MP3, everything else as FLAC.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    Standard,
    Exhigh,
    #[default]
    Lossless,
    Hires,
    Jyeffect,
    Sky,
    Jymaster,
}

impl QualityTier {
    /// Value of the `level` parameter sent to the catalog
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityTier::Standard => "standard",
            QualityTier::Exhigh => "exhigh",
            QualityTier::Lossless => "lossless",
            QualityTier::Hires => "hires",
            QualityTier::Jyeffect => "jyeffect",
            QualityTier::Sky => "sky",
            QualityTier::Jymaster => "jymaster",
        }
    }

    /// Whether the catalog serves this level as MP3
    pub fn is_lossy(&self) -> bool {
        matches!(self, QualityTier::Standard | QualityTier::Exhigh)
    }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Song reference as listed in playlists and albums
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Song {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub artists: String,
    #[serde(default)]
    pub album: String,
    #[serde(default, rename = "picUrl")]
    pub pic_url: String,
}

impl Song {
    /// A bare reference when only the catalog id is known
    ///
    /// Display fields are filled in later from the song detail response.
    pub fn from_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            artists: String::new(),
            album: String::new(),
            pic_url: String::new(),
        }
    }
}

/// Response of the `Song_V1` endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct SongDetailResponse {
    pub status: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub ar_name: String,
    #[serde(default)]
    pub al_name: String,
    pub pic: Option<String>,
    pub url: Option<String>,
    pub lyric: Option<String>,
    pub tlyric: Option<String>,
    pub msg: Option<String>,
}

/// Response of the `Playlist` endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct PlaylistResponse {
    pub status: i64,
    pub playlist: Option<PlaylistWithTracks>,
    pub msg: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlaylistWithTracks {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub tracks: Vec<Song>,
}

/// Response of the `Album` endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct AlbumResponse {
    pub status: i64,
    pub album: Option<AlbumWithSongs>,
    pub msg: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlbumWithSongs {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub songs: Vec<Song>,
}

// The catalog returns ids as numbers in some listings and strings in others
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(de::Error::custom(format!("invalid song id: {}", other))),
    }
}
