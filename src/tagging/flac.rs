//! FLAC metadata block rewriting
//!
//! A FLAC stream is `fLaC` followed by a chain of metadata blocks, each with a
//! 4-byte header (last-block flag, 7-bit type, 24-bit big-endian length), and
//! then the audio frames. Tagging keeps every block except existing
//! VORBIS_COMMENT and PICTURE blocks, appends freshly built ones, and copies
//! the audio frames through unchanged.

use std::borrow::Cow;

use super::{TagError, TagSet};
use crate::utils::CoverImage;

const FLAC_MAGIC: &[u8; 4] = b"fLaC";
const BLOCK_HEADER_LEN: usize = 4;
const LAST_BLOCK_FLAG: u8 = 0x80;
const MAX_BLOCK_LEN: usize = 0x00FF_FFFF;

const BLOCK_STREAMINFO: u8 = 0;
const BLOCK_VORBIS_COMMENT: u8 = 4;
const BLOCK_PICTURE: u8 = 6;

/// Front cover in the ID3/FLAC picture type table
const PICTURE_TYPE_FRONT_COVER: u32 = 3;

const VENDOR: &str = "tunegrab";

#[derive(Debug, Clone, PartialEq, Eq)]
struct MetadataBlock<'a> {
    block_type: u8,
    is_last: bool,
    data: Cow<'a, [u8]>,
}

#[derive(Debug)]
struct BlockChain<'a> {
    blocks: Vec<MetadataBlock<'a>>,
    /// Offset of the first audio frame
    audio_offset: usize,
}

/// Replace the tags of a FLAC stream
pub(super) fn write_tags(audio: &[u8], tags: &TagSet) -> Result<Vec<u8>, TagError> {
    let chain = parse_blocks(audio)?;

    let mut blocks: Vec<MetadataBlock<'_>> = chain
        .blocks
        .into_iter()
        .filter(|b| b.block_type != BLOCK_VORBIS_COMMENT && b.block_type != BLOCK_PICTURE)
        .collect();

    blocks.push(MetadataBlock {
        block_type: BLOCK_VORBIS_COMMENT,
        is_last: false,
        data: Cow::Owned(vorbis_comment(tags)),
    });
    if let Some(picture) = &tags.picture {
        blocks.push(MetadataBlock {
            block_type: BLOCK_PICTURE,
            is_last: false,
            data: Cow::Owned(picture_block(picture)?),
        });
    }

    let tail = &audio[chain.audio_offset..];
    let metadata_len: usize = blocks
        .iter()
        .map(|b| BLOCK_HEADER_LEN + b.data.len())
        .sum();

    let mut out = Vec::with_capacity(FLAC_MAGIC.len() + metadata_len + tail.len());
    out.extend_from_slice(FLAC_MAGIC);

    let last = blocks.len() - 1;
    for (i, block) in blocks.iter().enumerate() {
        write_block(&mut out, block.block_type, i == last, &block.data)?;
    }

    out.extend_from_slice(tail);
    Ok(out)
}

fn parse_blocks(buf: &[u8]) -> Result<BlockChain<'_>, TagError> {
    if !buf.starts_with(FLAC_MAGIC) {
        return Err(TagError::InvalidContainer);
    }

    let mut blocks = Vec::new();
    let mut pos = FLAC_MAGIC.len();

    loop {
        if pos >= buf.len() {
            return Err(TagError::CorruptContainer(
                "metadata ended without a last block".to_string(),
            ));
        }
        let header = buf.get(pos..pos + BLOCK_HEADER_LEN).ok_or_else(|| {
            TagError::CorruptContainer(format!("truncated block header at offset {}", pos))
        })?;

        let is_last = header[0] & LAST_BLOCK_FLAG != 0;
        let block_type = header[0] & !LAST_BLOCK_FLAG;
        let len = u32::from_be_bytes([0, header[1], header[2], header[3]]) as usize;

        let start = pos + BLOCK_HEADER_LEN;
        let data = buf.get(start..start + len).ok_or_else(|| {
            TagError::CorruptContainer(format!(
                "block type {} at offset {} claims {} bytes, {} available",
                block_type,
                pos,
                len,
                buf.len() - start
            ))
        })?;

        blocks.push(MetadataBlock {
            block_type,
            is_last,
            data: Cow::Borrowed(data),
        });
        pos = start + len;

        if is_last {
            break;
        }
    }

    match blocks
        .iter()
        .filter(|b| b.block_type == BLOCK_STREAMINFO)
        .count()
    {
        0 => return Err(TagError::MissingStreamInfo),
        1 => {}
        n => {
            return Err(TagError::CorruptContainer(format!(
                "{} STREAMINFO blocks",
                n
            )));
        }
    }

    Ok(BlockChain {
        blocks,
        audio_offset: pos,
    })
}

fn write_block(
    out: &mut Vec<u8>,
    block_type: u8,
    is_last: bool,
    data: &[u8],
) -> Result<(), TagError> {
    if data.len() > MAX_BLOCK_LEN {
        return Err(TagError::Encoding(format!(
            "metadata block type {} is {} bytes, limit is {}",
            block_type,
            data.len(),
            MAX_BLOCK_LEN
        )));
    }

    let flag = if is_last { LAST_BLOCK_FLAG } else { 0 };
    out.push(flag | block_type);
    out.extend_from_slice(&(data.len() as u32).to_be_bytes()[1..]);
    out.extend_from_slice(data);
    Ok(())
}

/// VORBIS_COMMENT payload; lengths are little-endian unlike the rest of FLAC
fn vorbis_comment(tags: &TagSet) -> Vec<u8> {
    let fields = [
        ("TITLE", tags.title.as_str()),
        ("ARTIST", tags.artist.as_str()),
        ("ALBUM", tags.album.as_str()),
        ("LYRICS", tags.lyrics.as_deref().unwrap_or_default()),
    ];
    let comments: Vec<String> = fields
        .iter()
        .filter(|(_, value)| !value.is_empty())
        .map(|(key, value)| format!("{}={}", key, value))
        .collect();

    let mut out = Vec::new();
    out.extend_from_slice(&(VENDOR.len() as u32).to_le_bytes());
    out.extend_from_slice(VENDOR.as_bytes());
    out.extend_from_slice(&(comments.len() as u32).to_le_bytes());
    for comment in &comments {
        out.extend_from_slice(&(comment.len() as u32).to_le_bytes());
        out.extend_from_slice(comment.as_bytes());
    }
    out
}

/// PICTURE payload; dimensions and color depth are written as 0 (unknown)
fn picture_block(picture: &CoverImage) -> Result<Vec<u8>, TagError> {
    let description = "Cover";
    let data_len = u32::try_from(picture.data.len())
        .map_err(|_| TagError::Encoding("cover art too large".to_string()))?;

    let mut out =
        Vec::with_capacity(32 + picture.mime.len() + description.len() + picture.data.len());
    out.extend_from_slice(&PICTURE_TYPE_FRONT_COVER.to_be_bytes());
    out.extend_from_slice(&(picture.mime.len() as u32).to_be_bytes());
    out.extend_from_slice(picture.mime.as_bytes());
    out.extend_from_slice(&(description.len() as u32).to_be_bytes());
    out.extend_from_slice(description.as_bytes());
    // width, height, depth, indexed colors
    out.extend_from_slice(&[0u8; 16]);
    out.extend_from_slice(&data_len.to_be_bytes());
    out.extend_from_slice(&picture.data);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const STREAMINFO: [u8; 34] = [
        0x10, 0x00, 0x10, 0x00, 0x00, 0x00, 0x0E, 0x00, 0x3A, 0x1C, 0x0A, 0xC4, 0x42, 0xF0, 0x00,
        0x00, 0x10, 0x00, 0xAB, 0xCD, 0xEF, 0x01, 0x23, 0x45, 0x67, 0x89, 0xAB, 0xCD, 0xEF, 0x01,
        0x23, 0x45, 0x67, 0x89,
    ];
    const AUDIO: &[u8] = b"\xFF\xF8\x69\x08audio frames follow";

    fn block(block_type: u8, is_last: bool, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        write_block(&mut out, block_type, is_last, data).unwrap();
        out
    }

    /// `fLaC` + STREAMINFO (last) + audio
    fn minimal_flac() -> Vec<u8> {
        let mut buf = FLAC_MAGIC.to_vec();
        buf.extend(block(BLOCK_STREAMINFO, true, &STREAMINFO));
        buf.extend_from_slice(AUDIO);
        buf
    }

    fn tags(picture: Option<CoverImage>) -> TagSet {
        TagSet {
            title: "晴天".to_string(),
            artist: "周杰伦".to_string(),
            album: "叶惠美".to_string(),
            lyrics: None,
            picture,
        }
    }

    fn read_comments(data: &[u8]) -> (String, Vec<String>) {
        let u32_at =
            |pos: usize| u32::from_le_bytes(data[pos..pos + 4].try_into().unwrap()) as usize;
        let vendor_len = u32_at(0);
        let vendor = String::from_utf8(data[4..4 + vendor_len].to_vec()).unwrap();
        let mut pos = 4 + vendor_len;
        let count = u32_at(pos);
        pos += 4;
        let mut comments = Vec::new();
        for _ in 0..count {
            let len = u32_at(pos);
            pos += 4;
            comments.push(String::from_utf8(data[pos..pos + len].to_vec()).unwrap());
            pos += len;
        }
        assert_eq!(pos, data.len());
        (vendor, comments)
    }

    #[test]
    fn test_tags_minimal_stream() {
        let input = minimal_flac();
        let cover = CoverImage {
            data: vec![0x89, b'P', b'N', b'G', 1, 2, 3, 4],
            mime: "image/png".to_string(),
        };
        let output = write_tags(&input, &tags(Some(cover.clone()))).unwrap();

        let chain = parse_blocks(&output).unwrap();
        let types: Vec<u8> = chain.blocks.iter().map(|b| b.block_type).collect();
        assert_eq!(types, vec![BLOCK_STREAMINFO, BLOCK_VORBIS_COMMENT, BLOCK_PICTURE]);

        let flags: Vec<bool> = chain.blocks.iter().map(|b| b.is_last).collect();
        assert_eq!(flags, vec![false, false, true]);

        assert_eq!(chain.blocks[0].data.as_ref(), &STREAMINFO[..]);

        let (vendor, comments) = read_comments(&chain.blocks[1].data);
        assert_eq!(vendor, "tunegrab");
        assert_eq!(comments, vec!["TITLE=晴天", "ARTIST=周杰伦", "ALBUM=叶惠美"]);

        let picture = &chain.blocks[2].data;
        assert_eq!(&picture[0..4], &3u32.to_be_bytes());
        assert_eq!(&picture[4..8], &9u32.to_be_bytes());
        assert_eq!(&picture[8..17], b"image/png");
        assert_eq!(&picture[17..21], &5u32.to_be_bytes());
        assert_eq!(&picture[21..26], b"Cover");
        assert_eq!(&picture[26..42], &[0u8; 16]);
        assert_eq!(&picture[42..46], &(cover.data.len() as u32).to_be_bytes());
        assert_eq!(&picture[46..], cover.data.as_slice());

        assert_eq!(&output[chain.audio_offset..], AUDIO);
    }

    #[test]
    fn test_existing_tags_replaced_and_other_blocks_kept() {
        let mut input = FLAC_MAGIC.to_vec();
        input.extend(block(BLOCK_STREAMINFO, false, &STREAMINFO));
        input.extend(block(BLOCK_VORBIS_COMMENT, false, b"\x03\x00\x00\x00old\x00\x00\x00\x00"));
        input.extend(block(3, false, &[0xAA; 18])); // SEEKTABLE
        input.extend(block(BLOCK_PICTURE, false, &[0xBB; 12]));
        input.extend(block(1, true, &[0u8; 8])); // PADDING
        input.extend_from_slice(AUDIO);

        let with_lyrics = TagSet {
            lyrics: Some("[00:01.000]line".to_string()),
            ..tags(None)
        };
        let output = write_tags(&input, &with_lyrics).unwrap();
        let chain = parse_blocks(&output).unwrap();

        let types: Vec<u8> = chain.blocks.iter().map(|b| b.block_type).collect();
        assert_eq!(types, vec![BLOCK_STREAMINFO, 3, 1, BLOCK_VORBIS_COMMENT]);
        assert_eq!(chain.blocks[1].data.as_ref(), &[0xAA; 18][..]);
        assert!(chain.blocks[3].is_last);
        assert_eq!(chain.blocks.iter().filter(|b| b.is_last).count(), 1);

        let (_, comments) = read_comments(&chain.blocks[3].data);
        assert_eq!(comments.last().map(String::as_str), Some("LYRICS=[00:01.000]line"));
        assert_eq!(&output[chain.audio_offset..], AUDIO);
    }

    #[test]
    fn test_empty_fields_skipped() {
        let title_only = TagSet {
            title: "Only Title".to_string(),
            ..TagSet::default()
        };
        let (_, comments) = read_comments(&vorbis_comment(&title_only));
        assert_eq!(comments, vec!["TITLE=Only Title"]);
    }

    #[test]
    fn test_missing_magic_is_invalid_container() {
        let err = write_tags(b"ID3\x04rest", &tags(None)).unwrap_err();
        assert!(matches!(err, TagError::InvalidContainer));
    }

    #[test]
    fn test_missing_streaminfo() {
        let mut input = FLAC_MAGIC.to_vec();
        input.extend(block(1, true, &[0u8; 4]));
        let err = write_tags(&input, &tags(None)).unwrap_err();
        assert!(matches!(err, TagError::MissingStreamInfo));
    }

    #[test]
    fn test_block_overrun_is_corrupt() {
        let mut input = minimal_flac();
        input.truncate(FLAC_MAGIC.len() + BLOCK_HEADER_LEN + 10);
        let err = write_tags(&input, &tags(None)).unwrap_err();
        assert!(matches!(err, TagError::CorruptContainer(_)));
    }

    #[test]
    fn test_duplicate_streaminfo_is_corrupt() {
        let mut input = FLAC_MAGIC.to_vec();
        input.extend(block(BLOCK_STREAMINFO, false, &STREAMINFO));
        input.extend(block(BLOCK_STREAMINFO, true, &STREAMINFO));
        input.extend_from_slice(AUDIO);

        let err = write_tags(&input, &tags(None)).unwrap_err();
        match err {
            TagError::CorruptContainer(msg) => assert!(msg.contains("2 STREAMINFO"), "{}", msg),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_missing_last_block_is_corrupt() {
        let mut input = FLAC_MAGIC.to_vec();
        input.extend(block(BLOCK_STREAMINFO, false, &STREAMINFO));
        let err = write_tags(&input, &tags(None)).unwrap_err();
        assert!(matches!(err, TagError::CorruptContainer(_)));
    }

    #[test]
    fn test_oversized_block_rejected() {
        let mut out = Vec::new();
        let err = write_block(&mut out, BLOCK_PICTURE, true, &vec![0u8; MAX_BLOCK_LEN + 1])
            .unwrap_err();
        assert!(matches!(err, TagError::Encoding(_)));
    }
}
