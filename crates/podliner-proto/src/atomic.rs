//! Atomic JSON persistence primitives shared by `ConfigStore` and
//! `LibraryStore` (§4.5 Write protocol).

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::PersistError;

pub const TEMP_FILE_SUFFIX: &str = ".tmp";

/// Serialises `value` to pretty JSON and writes it to `path` via a
/// write-tmp + rename-into-place sequence, so a reader never observes a
/// partially-written file.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp_path = tmp_path_for(path);
    let content = serde_json::to_string_pretty(value)?;
    std::fs::write(&tmp_path, content.as_bytes())?;

    match std::fs::rename(&tmp_path, path) {
        Ok(()) => Ok(()),
        Err(_) => {
            // Fallback for platforms/filesystems without an atomic replace:
            // remove the destination first, then rename.
            let _ = std::fs::remove_file(path);
            std::fs::rename(&tmp_path, path)?;
            Ok(())
        }
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(TEMP_FILE_SUFFIX);
    PathBuf::from(s)
}

/// Deletes any orphan `.tmp` file left beside `path` from a prior crash,
/// before the first `Load()` of a session (§4.5).
pub fn clear_orphan_tmp(path: &Path) {
    let tmp = tmp_path_for(path);
    if tmp.exists() {
        let _ = std::fs::remove_file(tmp);
    }
}

/// Classifies an I/O error from a save attempt: `true` means the store
/// should flip to read-only (§4.5 Read-only detection, §7 `ReadOnlyStore`).
pub fn is_permission_error(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::PermissionDenied
}

/// Reads `path`, clearing any orphan `.tmp` left beside it from a prior
/// crash first, then parses it as relaxed JSON — tolerating `//`/`/* */`
/// comments and trailing commas (§4.5 Load contract).
pub fn read_relaxed_json<T: DeserializeOwned>(path: &Path) -> Result<T, PersistError> {
    clear_orphan_tmp(path);
    let content = std::fs::read_to_string(path)?;
    let relaxed = relax_json(&content);
    serde_json::from_str(&relaxed).map_err(PersistError::from)
}

/// Strips `//` line comments and `/* */` block comments from `input`,
/// outside string literals.
fn strip_json_comments(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut in_string = false;
    let mut escaped = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            i += 1;
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
                i += 1;
            }
            '/' if chars.get(i + 1) == Some(&'/') => {
                i += 2;
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                i += 2;
                while i + 1 < chars.len() && !(chars[i] == '*' && chars[i + 1] == '/') {
                    i += 1;
                }
                i = (i + 2).min(chars.len());
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }

    out
}

/// Removes a comma that precedes a closing `}` or `]` (ignoring whitespace
/// in between), outside string literals.
fn strip_trailing_commas(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut in_string = false;
    let mut escaped = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            i += 1;
            continue;
        }

        if c == '"' {
            in_string = true;
            out.push(c);
            i += 1;
            continue;
        }

        if c == ',' {
            let mut j = i + 1;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            if j < chars.len() && (chars[j] == '}' || chars[j] == ']') {
                i += 1;
                continue;
            }
        }

        out.push(c);
        i += 1;
    }

    out
}

/// Relaxes `input` into parser-strict JSON: strips comments, then trailing
/// commas (§4.5 Load: "tolerates JSON comments and trailing commas").
fn relax_json(input: &str) -> String {
    strip_trailing_commas(&strip_json_comments(input))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Sample {
        a: u32,
        b: String,
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.json");
        let value = Sample {
            a: 7,
            b: "hi".into(),
        };
        write_json_atomic(&path, &value).unwrap();
        assert!(path.exists());
        assert!(!tmp_path_for(&path).exists());

        let loaded: Sample = serde_json::from_str(&std::fs::read_to_string(&path).unwrap())
            .unwrap();
        assert_eq!(loaded, value);
    }

    #[test]
    fn clear_orphan_tmp_removes_stray_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.json");
        let tmp = tmp_path_for(&path);
        std::fs::write(&tmp, b"{}").unwrap();
        assert!(tmp.exists());
        clear_orphan_tmp(&path);
        assert!(!tmp.exists());
    }

    #[test]
    fn write_overwrites_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.json");
        write_json_atomic(&path, &Sample { a: 1, b: "x".into() }).unwrap();
        write_json_atomic(&path, &Sample { a: 2, b: "y".into() }).unwrap();
        let loaded: Sample = serde_json::from_str(&std::fs::read_to_string(&path).unwrap())
            .unwrap();
        assert_eq!(loaded, Sample { a: 2, b: "y".into() });
    }

    #[test]
    fn relax_json_strips_line_and_block_comments() {
        let input = "{\n  // a comment\n  \"a\": 1, /* inline */\n  \"b\": \"text\"\n}";
        let relaxed = relax_json(input);
        let parsed: Sample = serde_json::from_str(&relaxed).unwrap();
        assert_eq!(parsed, Sample { a: 1, b: "text".into() });
    }

    #[test]
    fn relax_json_strips_trailing_commas() {
        let input = r#"{"a": 1, "b": "x",}"#;
        let parsed: Sample = serde_json::from_str(&relax_json(input)).unwrap();
        assert_eq!(parsed, Sample { a: 1, b: "x".into() });
    }

    #[test]
    fn relax_json_leaves_slashes_and_commas_inside_strings_alone() {
        let input = r#"{"a": 1, "b": "http://example.com/a,b/"}"#;
        let parsed: Sample = serde_json::from_str(&relax_json(input)).unwrap();
        assert_eq!(parsed.b, "http://example.com/a,b/");
    }

    #[test]
    fn read_relaxed_json_clears_orphan_tmp_before_reading() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.json");
        write_json_atomic(&path, &Sample { a: 1, b: "x".into() }).unwrap();
        std::fs::write(tmp_path_for(&path), b"garbage").unwrap();

        let loaded: Sample = read_relaxed_json(&path).unwrap();
        assert_eq!(loaded, Sample { a: 1, b: "x".into() });
        assert!(!tmp_path_for(&path).exists());
    }
}
