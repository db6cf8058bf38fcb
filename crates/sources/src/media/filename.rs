//! Filename helpers for output files.
//!
//! Output names are derived from item ids and usernames which come from
//! remote HTML, so they are sanitized for Windows, Linux and macOS alike.

/// Characters that are invalid in Windows filenames
const WINDOWS_INVALID_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Windows reserved filenames (case-insensitive)
const WINDOWS_RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Image extensions accepted verbatim from a source URL.
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif"];

/// Sanitize a string for use as a single path component.
///
/// Invalid characters become `_` (runs collapse), leading/trailing spaces
/// and dots are trimmed, reserved Windows names get a `_` prefix and an
/// empty result becomes `unnamed`.
pub fn sanitize_filename(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut last_was_replacement = false;

    for c in input.chars() {
        if c.is_control() || WINDOWS_INVALID_CHARS.contains(&c) {
            if !last_was_replacement {
                result.push('_');
                last_was_replacement = true;
            }
        } else {
            result.push(c);
            last_was_replacement = false;
        }
    }

    let trimmed = result.trim_matches(|c| c == ' ' || c == '.');
    if trimmed.is_empty() {
        return "unnamed".to_string();
    }

    let upper = trimmed.to_uppercase();
    let reserved = WINDOWS_RESERVED_NAMES
        .iter()
        .any(|r| upper == *r || upper.starts_with(&format!("{r}.")));
    if reserved {
        return format!("_{trimmed}");
    }

    trimmed.to_string()
}

/// Image extension of `url`, if its (percent-decoded) path names one.
///
/// Nitter proxies images as `/pic/orig/media%2FAbC.jpg`, so the path is
/// decoded before the last segment is inspected.
pub fn image_extension(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let decoded = urlencoding::decode(parsed.path()).ok()?;
    let last = decoded.rsplit('/').next()?;
    let last = last.split(['?', '&']).next()?;
    let (_, ext) = last.rsplit_once('.')?;
    let ext = ext.to_ascii_lowercase();
    IMAGE_EXTENSIONS
        .contains(&ext.as_str())
        .then(|| if ext == "jpeg" { "jpg".to_string() } else { ext })
}
