//! Filename sanitizing for stored object names.

use crate::errors::{StorageError, StorageResult};

const MAX_NAME_LEN: usize = 255;

/// Turn a client-supplied filename into the stored object name.
///
/// Keeps only the final path component, drops control and reserved
/// characters and trims surrounding whitespace and dots. Rejects names that
/// end up empty.
pub fn sanitize(raw: Option<&str>) -> StorageResult<String> {
    let raw = raw.ok_or_else(|| StorageError::InvalidName("file name must be present".into()))?;

    let last = raw
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(raw);

    let cleaned: String = last
        .chars()
        .filter(|c| !c.is_control() && !matches!(c, '<' | '>' | ':' | '"' | '|' | '?' | '*'))
        .collect();
    let cleaned = cleaned.trim().trim_matches('.').trim();

    if cleaned.is_empty() {
        return Err(StorageError::InvalidName(format!(
            "`{}` is not a usable file name",
            raw.escape_default()
        )));
    }

    Ok(truncate_to_boundary(cleaned, MAX_NAME_LEN).to_string())
}

fn truncate_to_boundary(value: &str, max: usize) -> &str {
    if value.len() <= max {
        return value;
    }
    let mut end = max;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}
