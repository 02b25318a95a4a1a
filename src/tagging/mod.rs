//! Embedding tags into downloaded audio
//!
//! The catalog delivers either MP3 or FLAC depending on the requested
//! quality tier. Tags are spliced into the container in memory so that a
//! half-written file never reaches the output directory.

mod flac;
mod mp3;

use thiserror::Error;
use tracing::warn;

use crate::catalog::QualityTier;
use crate::utils::{CoverImage, sanitize_filename};

/// Failure while embedding tags into one track
#[derive(Debug, Error)]
pub enum TagError {
    #[error("encoding failed: {0}")]
    Encoding(String),

    /// Input is not a FLAC stream at all; callers fall back to MP3
    #[error("not a FLAC stream")]
    InvalidContainer,

    #[error("FLAC stream has no STREAMINFO block")]
    MissingStreamInfo,

    #[error("corrupt FLAC metadata: {0}")]
    CorruptContainer(String),
}

/// Tags ready to embed
#[derive(Debug, Clone, Default)]
pub struct TagSet {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub lyrics: Option<String>,
    /// Normalized cover art
    pub picture: Option<CoverImage>,
}

/// Tagged audio ready to be written out
#[derive(Debug, Clone)]
pub struct EncodedContainer {
    pub data: Vec<u8>,
    /// Sanitized title, used as the file stem
    pub title_stem: String,
    /// Sanitized artist, used when the title alone collides
    pub artist_stem: String,
    pub extension: &'static str,
}

impl EncodedContainer {
    /// `<title>.<ext>`
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.title_stem, self.extension)
    }

    /// `<artist> - <title>.<ext>`
    pub fn qualified_file_name(&self) -> String {
        format!("{} - {}.{}", self.artist_stem, self.title_stem, self.extension)
    }
}

/// How tags are written for a given container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerStrategy {
    Mp3,
    Flac,
}

impl ContainerStrategy {
    /// Container the catalog serves at this tier
    pub fn for_tier(quality: QualityTier) -> Self {
        if quality.is_lossy() {
            ContainerStrategy::Mp3
        } else {
            ContainerStrategy::Flac
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ContainerStrategy::Mp3 => "mp3",
            ContainerStrategy::Flac => "flac",
        }
    }

    fn write_tags(&self, audio: &[u8], tags: &TagSet) -> Result<Vec<u8>, TagError> {
        match self {
            ContainerStrategy::Mp3 => mp3::write_tags(audio, tags),
            ContainerStrategy::Flac => flac::write_tags(audio, tags),
        }
    }
}

/// Embed `tags` into `audio`, choosing the container from the quality tier
///
/// Lossless tiers occasionally come back as MP3; when the FLAC magic is
/// missing the MP3 strategy is used instead and the extension follows.
pub fn encode(
    audio: &[u8],
    tags: &TagSet,
    quality: QualityTier,
) -> Result<EncodedContainer, TagError> {
    let mut strategy = ContainerStrategy::for_tier(quality);

    let data = match strategy.write_tags(audio, tags) {
        Err(TagError::InvalidContainer) if strategy == ContainerStrategy::Flac => {
            warn!(
                "\"{}\" requested as {} but is not FLAC, tagging as MP3",
                tags.title, quality
            );
            strategy = ContainerStrategy::Mp3;
            strategy.write_tags(audio, tags)?
        }
        result => result?,
    };

    Ok(EncodedContainer {
        data,
        title_stem: sanitize_filename(&tags.title),
        artist_stem: sanitize_filename(&tags.artist),
        extension: strategy.extension(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags() -> TagSet {
        TagSet {
            title: "Song: Live".to_string(),
            artist: "AC/DC".to_string(),
            album: "Album".to_string(),
            lyrics: None,
            picture: None,
        }
    }

    #[test]
    fn test_strategy_for_tier() {
        assert_eq!(ContainerStrategy::for_tier(QualityTier::Standard), ContainerStrategy::Mp3);
        assert_eq!(ContainerStrategy::for_tier(QualityTier::Exhigh), ContainerStrategy::Mp3);
        assert_eq!(ContainerStrategy::for_tier(QualityTier::Lossless), ContainerStrategy::Flac);
        assert_eq!(ContainerStrategy::for_tier(QualityTier::Jymaster), ContainerStrategy::Flac);
    }

    #[test]
    fn test_mp3_tier_produces_mp3() {
        let encoded = encode(b"\xFF\xFBaudio", &tags(), QualityTier::Exhigh).unwrap();
        assert_eq!(encoded.extension, "mp3");
        assert!(encoded.data.starts_with(b"ID3"));
        assert!(encoded.data.ends_with(b"\xFF\xFBaudio"));
    }

    #[test]
    fn test_lossless_without_flac_magic_falls_back_to_mp3() {
        let encoded = encode(b"\xFF\xFBnot flac", &tags(), QualityTier::Lossless).unwrap();
        assert_eq!(encoded.extension, "mp3");
        assert!(encoded.data.starts_with(b"ID3"));
    }

    #[test]
    fn test_corrupt_flac_is_an_error() {
        let err = encode(b"fLaC\x80\x00", &tags(), QualityTier::Hires).unwrap_err();
        assert!(matches!(err, TagError::CorruptContainer(_)));
    }

    #[test]
    fn test_file_names_are_sanitized() {
        let encoded = encode(b"\xFF\xFBaudio", &tags(), QualityTier::Standard).unwrap();
        assert_eq!(encoded.file_name(), "Song꞉ Live.mp3");
        assert_eq!(encoded.qualified_file_name(), "AC⧸DC - Song꞉ Live.mp3");
    }
}
