//! Title sanitization for output filenames.
//!
//! The sanitized title determines the output filename and therefore feeds
//! duplicate and collision detection, so the rule lives in exactly one place:
//! every character outside {alphanumeric, space, hyphen, underscore} becomes
//! an underscore. Unicode letters and digits (CJK titles included) pass
//! through unchanged.

/// Maximum length of a sanitized title, in characters.
const MAX_TITLE_CHARS: usize = 120;

/// Fallback when sanitization leaves nothing usable.
const DEFAULT_TITLE: &str = "unnamed";

/// Sanitize a title for use as an output filename stem.
///
/// # Examples
///
/// ```
/// use cachemux::filename::sanitize_title;
///
/// assert_eq!(sanitize_title("a/b: c?"), "a_b_ c_");
/// assert_eq!(sanitize_title("看完这期视频"), "看完这期视频");
/// assert_eq!(sanitize_title("..."), "unnamed");
/// ```
pub fn sanitize_title(input: &str) -> String {
    let mut result = String::with_capacity(input.len());

    for c in input.chars() {
        if c.is_alphanumeric() || c == ' ' || c == '-' || c == '_' {
            result.push(c);
        } else {
            result.push('_');
        }
    }

    // Leading/trailing spaces and dots are rejected by Windows; dots only
    // appear as underscores at this point but spaces survive the filter.
    let trimmed = result.trim_matches(|c| c == ' ' || c == '.');

    if trimmed.is_empty() || trimmed.chars().all(|c| c == '_') {
        return DEFAULT_TITLE.to_string();
    }

    if trimmed.chars().count() > MAX_TITLE_CHARS {
        trimmed.chars().take(MAX_TITLE_CHARS).collect()
    } else {
        trimmed.to_string()
    }
}
