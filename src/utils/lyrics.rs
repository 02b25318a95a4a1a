//! LRC lyric merging
//!
//! The catalog returns the original lyrics and their translation as two
//! separate LRC documents. Lines sharing a timestamp are merged so that a
//! single lyric string can be embedded.

/// A timed lyric line
#[derive(Debug, Clone, PartialEq)]
struct LyricLine {
    at_ms: u64,
    text: String,
}

/// Merge a translated LRC document into the original one
///
/// Every original line keeps its timestamp; when the translation has a line
/// at exactly the same time its text is appended as ` (翻译：...)`.
/// Untimed lines (metadata, blank lines) are dropped.
pub fn merge_lyrics(primary: &str, translation: &str) -> String {
    let mut lines = parse_lrc(primary);
    let translated = parse_lrc(translation);

    let mut j = 0;
    for line in lines.iter_mut() {
        if j >= translated.len() {
            break;
        }
        while line.at_ms > translated[j].at_ms && j + 1 < translated.len() {
            j += 1;
        }
        if line.at_ms == translated[j].at_ms {
            let text = translated[j].text.replacen('/', "", 1);
            if !text.is_empty() {
                line.text.push_str(&format!(" (翻译：{})", text));
            }
            j += 1;
        }
    }

    lines
        .iter()
        .map(|line| format!("{}{}\n", format_timestamp(line.at_ms), line.text))
        .collect()
}

fn parse_lrc(text: &str) -> Vec<LyricLine> {
    let mut lines: Vec<LyricLine> = text
        .lines()
        .filter_map(|raw| {
            let (at_ms, text) = split_timestamps(raw)?;
            Some(LyricLine { at_ms, text })
        })
        .collect();

    // Stable sort keeps source order for lines sharing a timestamp
    lines.sort_by_key(|line| line.at_ms);
    lines
}

/// Returns the first timestamp of a line and its text with every tag removed
fn split_timestamps(line: &str) -> Option<(u64, String)> {
    let mut first = None;
    let mut text = String::with_capacity(line.len());
    let mut rest = line;

    while let Some(open) = rest.find('[') {
        let Some(close) = rest[open..].find(']') else {
            break;
        };
        let tag = &rest[open + 1..open + close];
        match parse_timestamp(tag) {
            Some(at_ms) => {
                text.push_str(&rest[..open]);
                first.get_or_insert(at_ms);
            }
            None => text.push_str(&rest[..open + close + 1]),
        }
        rest = &rest[open + close + 1..];
    }
    text.push_str(rest);

    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    first.map(|at_ms| (at_ms, text))
}

/// Parse `mm:ss`, `mm:ss.xx`, `mm:ss.xxx` or `mm:ss:xx`
fn parse_timestamp(tag: &str) -> Option<u64> {
    let (minutes, rest) = tag.split_once(':')?;
    if minutes.len() < 2 || !minutes.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let (seconds, fraction) = match rest.find(['.', ':']) {
        Some(idx) => (&rest[..idx], &rest[idx + 1..]),
        None => (rest, ""),
    };
    if seconds.len() != 2 || !seconds.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let minutes: u64 = minutes.parse().ok()?;
    let seconds: u64 = seconds.parse().ok()?;
    let millis = fraction
        .chars()
        .chain(std::iter::repeat('0'))
        .take(3)
        .collect::<String>()
        .parse::<u64>()
        .ok()?;

    Some(minutes * 60_000 + seconds * 1_000 + millis)
}

fn format_timestamp(at_ms: u64) -> String {
    format!(
        "[{:02}:{:02}.{:03}]",
        at_ms / 60_000,
        (at_ms % 60_000) / 1_000,
        at_ms % 1_000
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timestamp_variants() {
        assert_eq!(parse_timestamp("00:01"), Some(1_000));
        assert_eq!(parse_timestamp("01:02.5"), Some(62_500));
        assert_eq!(parse_timestamp("01:02.50"), Some(62_500));
        assert_eq!(parse_timestamp("01:02.503"), Some(62_503));
        assert_eq!(parse_timestamp("01:02:25"), Some(62_250));
        assert_eq!(parse_timestamp("ar:周杰伦"), None);
        assert_eq!(parse_timestamp("by:"), None);
    }

    #[test]
    fn test_metadata_lines_dropped() {
        let merged = merge_lyrics("[ar:Someone]\n[00:01.00]first\n\n[00:02.00]second", "");
        assert_eq!(merged, "[00:01.000]first\n[00:02.000]second\n");
    }

    #[test]
    fn test_merge_matching_timestamps() {
        let primary = "[00:01.00]Hello\n[00:03.00]World\n[00:05.00]Again";
        let translation = "[00:01.00]你好\n[00:05.00]再一次";
        assert_eq!(
            merge_lyrics(primary, translation),
            concat!(
                "[00:01.000]Hello (翻译：你好)\n",
                "[00:03.000]World\n",
                "[00:05.000]Again (翻译：再一次)\n",
            )
        );
    }

    #[test]
    fn test_merge_skips_slash_only_translation() {
        let merged = merge_lyrics("[00:01.00]Intro", "[00:01.00]/");
        assert_eq!(merged, "[00:01.000]Intro\n");
    }

    #[test]
    fn test_merge_strips_only_first_slash() {
        let merged = merge_lyrics("[00:01.00]Line", "[00:01.00]/一/二");
        assert_eq!(merged, "[00:01.000]Line (翻译：一/二)\n");
    }

    #[test]
    fn test_lines_are_sorted_and_whitespace_collapsed() {
        let merged = merge_lyrics("[00:09.00]late   line\n[00:02.00]  early", "");
        assert_eq!(merged, "[00:02.000]early\n[00:09.000]late line\n");
    }

    #[test]
    fn test_repeated_timestamps_on_one_line() {
        let merged = merge_lyrics("[00:10.00][00:01.00]chorus", "");
        assert_eq!(merged, "[00:10.000]chorus\n");
    }
}
