//! Filename sanitization utilities

/// Longest file stem we produce, in bytes (leaves room for an extension)
const MAX_STEM_BYTES: usize = 200;

/// Stem used when a title sanitizes to nothing
const FALLBACK_STEM: &str = "untitled";

/// Sanitize a track title or artist name for use as a file stem
///
/// Replaces filesystem-unsafe characters with visually similar Unicode
/// alternatives, drops control characters, and caps the length so that
/// very long catalog titles still produce a valid filename.
///
/// # Examples
///
/// ```
/// use tunegrab::utils::sanitize_filename;
///
/// assert_eq!(sanitize_filename("AC/DC"), "AC⧸DC");
/// assert_eq!(sanitize_filename("Interlude: Reprise"), "Interlude꞉ Reprise");
/// assert_eq!(sanitize_filename("   "), "untitled");
/// ```
pub fn sanitize_filename(name: &str) -> String {
    let replaced: String = name
        .chars()
        .filter(|c| !c.is_control() || *c == '\0')
        .map(|c| match c {
            '/' => '⧸',
            '\\' => '⧹',
            ':' => '꞉',
            '*' => '⁎',
            '?' => '？',
            '"' => '″',
            '<' => '‹',
            '>' => '›',
            '|' => '｜',
            '\0' => '_',
            _ => c,
        })
        .collect();

    // Leading dots would hide the file on Unix, trailing dots are stripped by Windows
    let trimmed = replaced.trim().trim_matches('.').trim();
    let stem = truncate_on_char_boundary(trimmed, MAX_STEM_BYTES).trim_end();

    if stem.is_empty() {
        FALLBACK_STEM.to_string()
    } else {
        stem.to_string()
    }
}

fn truncate_on_char_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
