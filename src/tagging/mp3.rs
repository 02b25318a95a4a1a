//! ID3v2.4 tagging for MP3 streams

use id3::frame::{Lyrics, Picture, PictureType};
use id3::{Tag, TagLike, Version};

use super::{TagError, TagSet};

/// Size of an ID3v2 header
const ID3_HEADER_LEN: usize = 10;

/// Prepend an ID3v2.4 tag to `audio`, leaving the audio bytes untouched
pub(super) fn write_tags(audio: &[u8], tags: &TagSet) -> Result<Vec<u8>, TagError> {
    if audio.is_empty() {
        return Err(TagError::Encoding("audio stream is empty".to_string()));
    }
    check_existing_header(audio)?;

    let mut tag = Tag::new();
    tag.set_title(tags.title.as_str());
    tag.set_artist(tags.artist.as_str());
    tag.set_album(tags.album.as_str());

    if let Some(lyrics) = tags.lyrics.as_deref().filter(|l| !l.is_empty()) {
        tag.add_frame(Lyrics {
            lang: "und".to_string(),
            description: String::new(),
            text: lyrics.to_string(),
        });
    }

    if let Some(picture) = &tags.picture {
        tag.add_frame(Picture {
            mime_type: picture.mime.clone(),
            picture_type: PictureType::CoverFront,
            description: "Cover".to_string(),
            data: picture.data.clone(),
        });
    }

    let mut out = Vec::with_capacity(audio.len() + 64 * 1024);
    tag.write_to(&mut out, Version::Id3v24)
        .map_err(|e| TagError::Encoding(e.to_string()))?;
    out.extend_from_slice(audio);
    Ok(out)
}

/// Reject input whose own ID3 header claims more bytes than exist
fn check_existing_header(audio: &[u8]) -> Result<(), TagError> {
    if !audio.starts_with(b"ID3") {
        return Ok(());
    }
    if audio.len() < ID3_HEADER_LEN {
        return Err(TagError::Encoding("truncated ID3 header".to_string()));
    }
    let size = syncsafe_u32(&audio[6..10]) as usize;
    if ID3_HEADER_LEN + size > audio.len() {
        return Err(TagError::Encoding(format!(
            "existing ID3 tag claims {} bytes but only {} are present",
            size,
            audio.len() - ID3_HEADER_LEN
        )));
    }
    Ok(())
}

fn syncsafe_u32(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .fold(0u32, |acc, b| (acc << 7) | u32::from(b & 0x7F))
}
