//! Cross-platform filesystem path sanitiser (§4.3).

const MAX_LEAF_BYTES: usize = 120;

const WINDOWS_RESERVED: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Sanitises a single path component (a feed title or episode title) into
/// a string safe to use as a filesystem leaf name on any supported
/// platform, per §4.3's path sanitiser rules.
pub fn sanitize_leaf(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if ch.is_control() {
            continue;
        }
        match ch {
            '/' | '\\' => out.push('_'),
            ':' | '*' | '?' | '"' | '<' | '>' | '|' => out.push('_'),
            _ => out.push(ch),
        }
    }

    let trimmed = out.trim().trim_end_matches(['.', ' ']);
    let mut result = if trimmed.is_empty() {
        "untitled".to_string()
    } else {
        trimmed.to_string()
    };

    if WINDOWS_RESERVED.contains(&result.to_uppercase().as_str()) {
        result = format!("_{result}");
    }

    truncate_utf8(&result, MAX_LEAF_BYTES)
}

/// Truncates `s` to at most `max_bytes` UTF-8 bytes, never splitting a
/// multi-byte codepoint.
fn truncate_utf8(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

/// Builds the sanitised on-disk path for a downloaded episode:
/// `<base_dir>/<feed>/<episode>.<ext>` (§4.3 Finalisation).
pub fn episode_download_path(
    base_dir: &std::path::Path,
    feed_title: &str,
    episode_title: &str,
    ext: &str,
) -> std::path::PathBuf {
    let feed = sanitize_leaf(feed_title);
    let episode = sanitize_leaf(episode_title);
    let ext = ext.trim_start_matches('.');
    let path = base_dir.join(feed).join(format!("{episode}.{ext}"));
    apply_long_path_prefix(path)
}

/// Applies the `\\?\` long-path prefix to a fully-qualified Windows path so
/// paths past MAX_PATH aren't rejected by the filesystem (§4.3 Finalisation).
/// No-op for relative paths, paths already prefixed, and non-Windows targets.
#[cfg(windows)]
fn apply_long_path_prefix(path: std::path::PathBuf) -> std::path::PathBuf {
    if !path.is_absolute() {
        return path;
    }
    let raw = path.as_os_str().to_string_lossy();
    if raw.starts_with(r"\\?\") {
        return path;
    }
    if let Some(unc) = raw.strip_prefix(r"\\") {
        std::path::PathBuf::from(format!(r"\\?\UNC\{unc}"))
    } else {
        std::path::PathBuf::from(format!(r"\\?\{raw}"))
    }
}

#[cfg(not(windows))]
fn apply_long_path_prefix(path: std::path::PathBuf) -> std::path::PathBuf {
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_path_separators_and_control_chars() {
        assert_eq!(sanitize_leaf("a/b\\c\u{0007}d"), "a_b_cd");
    }

    #[test]
    fn strips_windows_invalid_chars() {
        assert_eq!(sanitize_leaf("weird:name*?\"<>|"), "weird_name______");
    }

    #[test]
    fn rejects_reserved_windows_names() {
        assert_eq!(sanitize_leaf("CON"), "_CON");
        assert_eq!(sanitize_leaf("com3"), "_com3");
        assert_eq!(sanitize_leaf("NotReserved"), "NotReserved");
    }

    #[test]
    fn strips_trailing_dots_and_spaces() {
        assert_eq!(sanitize_leaf("trailing.dots..."), "trailing.dots");
        assert_eq!(sanitize_leaf("trailing space   "), "trailing space");
    }

    #[test]
    fn enforces_byte_ceiling_on_utf8_boundary() {
        let long = "é".repeat(200);
        let sanitized = sanitize_leaf(&long);
        assert!(sanitized.len() <= MAX_LEAF_BYTES);
        assert!(sanitized.is_char_boundary(sanitized.len()));
    }

    #[test]
    fn empty_input_becomes_untitled() {
        assert_eq!(sanitize_leaf("   "), "untitled");
    }

    #[test]
    fn builds_nested_download_path() {
        let base = std::path::Path::new("/downloads");
        let path = episode_download_path(base, "My Show", "Ep 1: Intro", ".mp3");
        assert_eq!(path, std::path::PathBuf::from("/downloads/My Show/Ep 1_ Intro.mp3"));
    }

    #[cfg(windows)]
    #[test]
    fn applies_long_path_prefix_to_absolute_windows_paths() {
        let base = std::path::Path::new(r"C:\Users\me\Podliner\downloads");
        let path = episode_download_path(base, "My Show", "Ep 1", ".mp3");
        assert!(path.to_string_lossy().starts_with(r"\\?\C:\"));
    }

    #[cfg(windows)]
    #[test]
    fn does_not_double_prefix_an_already_prefixed_path() {
        let base = std::path::Path::new(r"\\?\C:\Users\me\downloads");
        let path = episode_download_path(base, "Show", "Ep", ".mp3");
        assert_eq!(path.to_string_lossy().matches(r"\\?\").count(), 1);
    }
}
