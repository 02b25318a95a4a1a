//! Music catalog access
//!
//! The scheduler only talks to the catalog through the [`Catalog`] trait so
//! that the HTTP client can be swapped for an in-memory one in tests.

pub mod client;
pub mod models;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub use client::CatalogClient;
pub use models::*;

use crate::utils::merge_lyrics;

/// Network or catalog failure while fetching one song
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("catalog error: {0}")]
    Catalog(String),

    #[error("unexpected status {status} fetching {url}")]
    Status { status: u16, url: String },

    #[error("invalid catalog URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("song {0} has no downloadable audio at this quality")]
    NoAudio(String),
}

/// Everything needed to build one tagged file
#[derive(Debug, Clone, PartialEq)]
pub struct SongPackage {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub audio_url: String,
    pub lyric: Option<String>,
    pub translated_lyric: Option<String>,
    pub cover_url: Option<String>,
}

impl SongPackage {
    /// Lyrics ready to embed, with translations merged in when present
    pub fn lyrics(&self) -> Option<String> {
        let lyric = self.lyric.as_deref().filter(|l| !l.trim().is_empty())?;
        match self.translated_lyric.as_deref() {
            Some(translation) if !translation.trim().is_empty() => {
                Some(merge_lyrics(lyric, translation))
            }
            _ => Some(lyric.to_string()),
        }
    }
}

/// Bytes fetched for audio or cover art, with the MIME type the server declared
#[derive(Debug, Clone)]
pub struct RawAsset {
    pub data: Bytes,
    pub mime: Option<String>,
}

/// Source of song metadata and media bytes
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Resolve a song id into metadata plus media URLs at the given quality
    async fn song_package(&self, id: &str, quality: QualityTier)
        -> Result<SongPackage, FetchError>;

    /// Fetch audio or cover bytes from a URL returned in a [`SongPackage`]
    async fn fetch_asset(&self, url: &str) -> Result<RawAsset, FetchError>;
}
