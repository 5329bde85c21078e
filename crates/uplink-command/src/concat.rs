//! Concatenation lists in the transcoder's concat demuxer format.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use uplink_model::{InputSource, MediaItem};

use crate::error::ConcatError;

/// Render items as a concatenation list, one `file` directive per item.
pub fn render_concat_list(items: &[MediaItem]) -> String {
    let mut list = String::new();
    for item in items {
        let path = list_path(&item.locator).replace('\'', "'\\''");
        list.push_str("file '");
        list.push_str(&path);
        list.push_str("'\n");
    }
    list
}

#[cfg(windows)]
fn list_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

#[cfg(not(windows))]
fn list_path(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Parse a concatenation list. Relative paths resolve against `base`.
///
/// `duration` directives set the duration of the preceding file; other
/// directives are ignored.
pub fn parse_concat_list(text: &str, base: &Path) -> Result<Vec<MediaItem>, ConcatError> {
    let mut items: Vec<MediaItem> = Vec::new();

    for (index, raw) in text.lines().enumerate() {
        let line = index + 1;
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let (directive, rest) = trimmed
            .split_once(char::is_whitespace)
            .unwrap_or((trimmed, ""));

        match directive {
            "file" => {
                let path = token(rest, line)?;
                let path = PathBuf::from(path);
                let locator = if path.is_absolute() {
                    path
                } else {
                    base.join(path)
                };
                items.push(MediaItem::new(locator));
            }
            "duration" => {
                let last = items.last_mut().ok_or_else(|| ConcatError::Syntax {
                    line,
                    message: "duration before any file".to_string(),
                })?;
                let value = token(rest, line)?;
                let secs = parse_duration(&value).ok_or_else(|| ConcatError::Syntax {
                    line,
                    message: format!("invalid duration '{value}'"),
                })?;
                last.duration_secs = Some(secs);
            }
            other => debug!(line, directive = other, "Ignoring concat directive"),
        }
    }

    Ok(items)
}

/// Read and parse a list file, resolving paths against its directory.
pub fn read_concat_list(path: &Path) -> Result<Vec<MediaItem>, ConcatError> {
    let text = fs::read_to_string(path)?;
    let base = path.parent().unwrap_or_else(|| Path::new(""));
    parse_concat_list(&text, base)
}

/// Load the items of a concatenation-list input from its list file.
///
/// Durations already known for a path are kept when the list gives none.
/// Returns the number of items, or `None` for other input kinds.
pub fn refresh_concat_items(source: &mut InputSource) -> Result<Option<usize>, ConcatError> {
    let InputSource::ConcatList { list, items } = source else {
        return Ok(None);
    };
    let mut fresh = read_concat_list(list)?;
    for item in fresh.iter_mut().filter(|i| i.duration_secs.is_none()) {
        item.duration_secs = items
            .iter()
            .find(|known| known.locator == item.locator)
            .and_then(|known| known.duration_secs);
    }
    debug!(list = %list.display(), items = fresh.len(), "Concat list loaded");
    *items = fresh;
    Ok(Some(items.len()))
}

/// One argument token: single quotes are literal, a backslash escapes the next character.
fn token(text: &str, line: usize) -> Result<String, ConcatError> {
    let mut out = String::new();
    let mut quoted = false;
    let mut chars = text.trim().chars();

    while let Some(c) = chars.next() {
        match c {
            '\'' => quoted = !quoted,
            '\\' if !quoted => {
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            }
            c if c.is_whitespace() && !quoted => break,
            c => out.push(c),
        }
    }

    if quoted {
        return Err(ConcatError::Syntax {
            line,
            message: "unterminated quote".to_string(),
        });
    }
    if out.is_empty() {
        return Err(ConcatError::Syntax {
            line,
            message: "missing argument".to_string(),
        });
    }
    Ok(out)
}

/// Seconds, or `[HH:]MM:SS`, with an optional fraction that is dropped.
fn parse_duration(value: &str) -> Option<u64> {
    let whole = value.split('.').next()?;
    let mut secs = 0u64;
    for part in whole.split(':') {
        secs = secs.checked_mul(60)?.checked_add(part.parse().ok()?)?;
    }
    Some(secs)
}
