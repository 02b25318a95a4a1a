//! Processing of a single song: fetch, normalize cover, tag, save

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use super::control::PauseGate;
use super::job::SongUnit;
use crate::catalog::{Catalog, FetchError, SongPackage};
use crate::storage::TrackSink;
use crate::tagging::{self, TagError, TagSet};
use crate::utils::normalize_cover;

/// Services a worker needs
#[derive(Clone)]
pub struct UnitContext {
    pub catalog: Arc<dyn Catalog>,
    pub sink: Arc<dyn TrackSink>,
}

/// Why a song was not saved
#[derive(Debug, Error)]
pub enum UnitError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Tag(#[from] TagError),

    #[error("failed to save track: {0:#}")]
    Sink(anyhow::Error),

    #[error("worker panicked: {0}")]
    Panicked(String),

    #[error("cancelled")]
    Cancelled,
}

/// Cover bytes with a best guess at their MIME type
struct FetchedCover {
    data: bytes::Bytes,
    mime: String,
}

/// Download, tag and save one song
pub async fn process_unit(
    ctx: &UnitContext,
    unit: &SongUnit,
    mut gate: PauseGate,
) -> Result<PathBuf, UnitError> {
    if !gate.wait_until_runnable().await {
        return Err(UnitError::Cancelled);
    }

    let package = cancellable(&gate, ctx.catalog.song_package(&unit.id, unit.quality)).await??;
    debug!("Resolved song {} to {}", unit.id, package.audio_url);

    let audio = cancellable(&gate, ctx.catalog.fetch_asset(&package.audio_url)).await??;
    if audio.data.is_empty() {
        return Err(TagError::Encoding("downloaded audio is empty".to_string()).into());
    }

    let cover = match package.cover_url.as_deref().or(unit.cover_url.as_deref()) {
        Some(url) => fetch_cover(ctx, &gate, url).await?,
        None => None,
    };

    let tags = tag_set(unit, &package);
    let quality = unit.quality;
    let encoded = tokio::task::spawn_blocking(move || {
        let picture = cover.map(|c| normalize_cover(&c.data, &c.mime));
        let tags = TagSet { picture, ..tags };
        tagging::encode(&audio.data, &tags, quality)
    })
    .await
    .map_err(|e| UnitError::Panicked(e.to_string()))??;

    // Nothing reaches the sink after cancellation
    if gate.is_cancelled() {
        return Err(UnitError::Cancelled);
    }

    ctx.sink.save(&encoded).await.map_err(UnitError::Sink)
}

/// Run `fut` unless the job is cancelled first
async fn cancellable<F: Future>(gate: &PauseGate, fut: F) -> Result<F::Output, UnitError> {
    tokio::select! {
        biased;
        _ = gate.cancelled() => Err(UnitError::Cancelled),
        out = fut => Ok(out),
    }
}

/// Cover art is optional: failures are logged and the song is tagged without it
async fn fetch_cover(
    ctx: &UnitContext,
    gate: &PauseGate,
    url: &str,
) -> Result<Option<FetchedCover>, UnitError> {
    match cancellable(gate, ctx.catalog.fetch_asset(url)).await? {
        Ok(asset) if !asset.data.is_empty() => {
            let mime = asset
                .mime
                .filter(|m| m.starts_with("image/"))
                .or_else(|| {
                    image::guess_format(&asset.data)
                        .ok()
                        .map(|f| f.to_mime_type().to_string())
                })
                .unwrap_or_else(|| "image/jpeg".to_string());
            Ok(Some(FetchedCover {
                data: asset.data,
                mime,
            }))
        }
        Ok(_) => {
            warn!("Cover art at {} is empty, skipping", url);
            Ok(None)
        }
        Err(e) => {
            warn!("Failed to fetch cover art from {}: {}", url, e);
            Ok(None)
        }
    }
}

/// Catalog detail wins; the listing's fields fill any gaps
fn tag_set(unit: &SongUnit, package: &SongPackage) -> TagSet {
    let pick = |detail: &str, listed: &str| {
        if detail.trim().is_empty() {
            listed.to_string()
        } else {
            detail.to_string()
        }
    };

    let mut title = pick(&package.title, &unit.title);
    if title.trim().is_empty() {
        title = unit.id.clone();
    }

    TagSet {
        title,
        artist: pick(&package.artist, &unit.artist),
        album: pick(&package.album, &unit.album),
        lyrics: package.lyrics(),
        picture: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{QualityTier, RawAsset};
    use crate::scheduler::control::JobControl;
    use crate::tagging::EncodedContainer;
    use async_trait::async_trait;
    use bytes::Bytes;
    use id3::TagLike;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;
    use std::sync::Mutex;
    use tokio_util::sync::CancellationToken;

    const MP3_FRAME: &[u8] = b"\xFF\xFB\x90\x00mp3 frame";

    struct StaticCatalog {
        cover: Option<Result<RawAsset, ()>>,
        lyric: Option<String>,
    }

    #[async_trait]
    impl Catalog for StaticCatalog {
        async fn song_package(
            &self,
            id: &str,
            _quality: QualityTier,
        ) -> Result<SongPackage, FetchError> {
            Ok(SongPackage {
                title: format!("Title {}", id),
                artist: String::new(),
                album: "Album".to_string(),
                audio_url: "mem://audio".to_string(),
                lyric: self.lyric.clone(),
                translated_lyric: None,
                cover_url: self.cover.as_ref().map(|_| "mem://cover".to_string()),
            })
        }

        async fn fetch_asset(&self, url: &str) -> Result<RawAsset, FetchError> {
            match url {
                "mem://audio" => Ok(RawAsset {
                    data: Bytes::from_static(MP3_FRAME),
                    mime: Some("audio/mpeg".to_string()),
                }),
                _ => match &self.cover {
                    Some(Ok(asset)) => Ok(asset.clone()),
                    _ => Err(FetchError::Status {
                        status: 404,
                        url: url.to_string(),
                    }),
                },
            }
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        saved: Mutex<Vec<EncodedContainer>>,
    }

    #[async_trait]
    impl TrackSink for RecordingSink {
        async fn save(&self, track: &EncodedContainer) -> anyhow::Result<PathBuf> {
            self.saved.lock().unwrap().push(track.clone());
            Ok(PathBuf::from(track.file_name()))
        }
    }

    fn unit() -> SongUnit {
        SongUnit {
            id: "42".to_string(),
            title: "Listed".to_string(),
            artist: "Listed Artist".to_string(),
            album: String::new(),
            cover_url: None,
            quality: QualityTier::Exhigh,
        }
    }

    fn context(catalog: StaticCatalog) -> (UnitContext, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let ctx = UnitContext {
            catalog: Arc::new(catalog),
            sink: sink.clone(),
        };
        (ctx, sink)
    }

    fn saved_tag(sink: &RecordingSink) -> id3::Tag {
        let saved = sink.saved.lock().unwrap();
        id3::Tag::read_from2(Cursor::new(saved[0].data.clone())).unwrap()
    }

    #[tokio::test]
    async fn test_process_unit_saves_tagged_track() {
        let (ctx, sink) = context(StaticCatalog {
            cover: None,
            lyric: Some("[00:01.00]hello".to_string()),
        });
        let gate = JobControl::new(&CancellationToken::new()).gate();

        let path = process_unit(&ctx, &unit(), gate).await.unwrap();
        assert_eq!(path, PathBuf::from("Title 42.mp3"));

        let tag = saved_tag(&sink);
        assert_eq!(tag.title(), Some("Title 42"));
        // Empty detail artist falls back to the listing
        assert_eq!(tag.artist(), Some("Listed Artist"));
        assert_eq!(tag.lyrics().count(), 1);
        assert_eq!(tag.pictures().count(), 0);
    }

    #[tokio::test]
    async fn test_cover_embedded_after_normalization() {
        let mut png = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb([9, 9, 9])))
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .unwrap();

        let (ctx, sink) = context(StaticCatalog {
            cover: Some(Ok(RawAsset {
                data: Bytes::from(png),
                mime: None,
            })),
            lyric: None,
        });
        let gate = JobControl::new(&CancellationToken::new()).gate();
        process_unit(&ctx, &unit(), gate).await.unwrap();

        let tag = saved_tag(&sink);
        let pictures: Vec<_> = tag.pictures().collect();
        assert_eq!(pictures.len(), 1);
        // Opaque PNG is re-encoded as JPEG
        assert_eq!(pictures[0].mime_type, "image/jpeg");
    }

    #[tokio::test]
    async fn test_failed_cover_fetch_is_not_fatal() {
        let (ctx, sink) = context(StaticCatalog {
            cover: Some(Err(())),
            lyric: None,
        });
        let gate = JobControl::new(&CancellationToken::new()).gate();
        process_unit(&ctx, &unit(), gate).await.unwrap();
        assert_eq!(sink.saved.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_unit_never_reaches_sink() {
        let (ctx, sink) = context(StaticCatalog {
            cover: None,
            lyric: None,
        });
        let control = JobControl::new(&CancellationToken::new());
        control.cancel();

        let err = process_unit(&ctx, &unit(), control.gate()).await.unwrap_err();
        assert!(matches!(err, UnitError::Cancelled));
        assert!(sink.saved.lock().unwrap().is_empty());
    }

    #[test]
    fn test_tag_set_falls_back_to_id() {
        let unit = SongUnit {
            title: String::new(),
            ..unit()
        };
        let package = SongPackage {
            title: " ".to_string(),
            artist: "A".to_string(),
            album: "B".to_string(),
            audio_url: String::new(),
            lyric: None,
            translated_lyric: None,
            cover_url: None,
        };
        assert_eq!(tag_set(&unit, &package).title, "42");
    }
}
