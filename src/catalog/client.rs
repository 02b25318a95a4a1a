//! Catalog HTTP client

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;
use url::Url;

use super::models::*;
use super::{Catalog, FetchError, RawAsset, SongPackage};

/// Status code the catalog uses for successful JSON responses
const STATUS_OK: i64 = 200;

/// HTTP client for the catalog REST API
#[derive(Clone)]
pub struct CatalogClient {
    base_url: Url,
    http_client: Client,
}

impl CatalogClient {
    /// Create a new catalog client
    pub fn new(base_url: &str) -> Result<Self> {
        // Url::join drops the last path segment unless it ends with a slash
        let base_url = format!("{}/", base_url.trim_end_matches('/'));
        let base_url = Url::parse(&base_url)
            .with_context(|| format!("Invalid catalog URL: {}", base_url))?;

        let http_client = Client::builder()
            .user_agent(concat!("tunegrab/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            base_url,
            http_client,
        })
    }

    fn endpoint(&self, name: &str) -> Result<Url, FetchError> {
        Ok(self.base_url.join(name)?)
    }

    /// Get song detail (metadata, media URLs, lyrics) at a quality level
    pub async fn song_detail(
        &self,
        id: &str,
        quality: QualityTier,
    ) -> Result<SongDetailResponse, FetchError> {
        let url = self.endpoint("Song_V1")?;
        debug!("Fetching song {} ({}): {}", id, quality, url);

        let response: SongDetailResponse = self
            .http_client
            .post(url)
            .form(&[("ids", id), ("level", quality.as_str()), ("type", "json")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        check_status(response.status, response.msg.as_deref())?;
        Ok(response)
    }

    /// Get playlist details with tracks
    pub async fn playlist(&self, id: &str) -> Result<PlaylistWithTracks, FetchError> {
        let url = self.endpoint("Playlist")?;
        debug!("Fetching playlist {}: {}", id, url);

        let response: PlaylistResponse = self
            .http_client
            .get(url)
            .query(&[("id", id)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        check_status(response.status, response.msg.as_deref())?;

        let playlist = response
            .playlist
            .ok_or_else(|| FetchError::Catalog(format!("Playlist {} not found", id)))?;
        debug!("Playlist {} has {} tracks", playlist.name, playlist.tracks.len());
        Ok(playlist)
    }

    /// Get album details with songs
    pub async fn album(&self, id: &str) -> Result<AlbumWithSongs, FetchError> {
        let url = self.endpoint("Album")?;
        debug!("Fetching album {}: {}", id, url);

        let response: AlbumResponse = self
            .http_client
            .get(url)
            .query(&[("id", id)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        check_status(response.status, response.msg.as_deref())?;

        let album = response
            .album
            .ok_or_else(|| FetchError::Catalog(format!("Album {} not found", id)))?;
        debug!("Album {} has {} songs", album.name, album.songs.len());
        Ok(album)
    }
}

#[async_trait]
impl Catalog for CatalogClient {
    async fn song_package(
        &self,
        id: &str,
        quality: QualityTier,
    ) -> Result<SongPackage, FetchError> {
        let detail = self.song_detail(id, quality).await?;
        package_from_detail(id, detail)
    }

    async fn fetch_asset(&self, url: &str) -> Result<RawAsset, FetchError> {
        debug!("Downloading {}", url);

        let response = self.http_client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(FetchError::Status {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }

        let mime = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let data = response.bytes().await?;
        Ok(RawAsset { data, mime })
    }
}

fn check_status(status: i64, msg: Option<&str>) -> Result<(), FetchError> {
    if status == STATUS_OK {
        return Ok(());
    }
    Err(FetchError::Catalog(match msg {
        Some(msg) if !msg.is_empty() => msg.to_string(),
        _ => format!("status {}", status),
    }))
}

fn package_from_detail(id: &str, detail: SongDetailResponse) -> Result<SongPackage, FetchError> {
    let audio_url = detail
        .url
        .filter(|u| !u.is_empty())
        .ok_or_else(|| FetchError::NoAudio(id.to_string()))?;

    Ok(SongPackage {
        title: detail.name,
        artist: detail.ar_name,
        album: detail.al_name,
        audio_url,
        lyric: detail.lyric,
        translated_lyric: detail.tlyric,
        cover_url: detail.pic.filter(|p| !p.is_empty()),
    })
}
