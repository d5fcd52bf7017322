/// Fallback used when sanitizing leaves nothing behind.
pub const FALLBACK_FILENAME: &str = "file";

/// Makes `name` safe to use as a single path component on any platform.
///
/// Path separators, characters reserved on Windows and control characters
/// become `_`. Leading dots are dropped so the result is never `.`/`..`
/// or a hidden file.
pub fn sanitize_filename(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let cleaned = replaced.trim().trim_start_matches('.').trim();
    if cleaned.is_empty() {
        FALLBACK_FILENAME.to_string()
    } else {
        cleaned.to_string()
    }
}
