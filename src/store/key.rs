//! Slash-delimited hierarchical keys.

use crate::StoreError;
use crate::StoreResult;

pub const KEY_SEPARATOR: char = '/';

/// Accepts `/` and `/a/b`; rejects relative keys, empty segments and a
/// trailing separator.
pub fn validate_key(key: &str) -> StoreResult<()> {
    if !key.starts_with(KEY_SEPARATOR) {
        return Err(StoreError::InvalidPath(key.to_string()));
    }
    if key.len() == 1 {
        return Ok(());
    }
    if key[1..].split(KEY_SEPARATOR).any(|segment| segment.is_empty()) {
        return Err(StoreError::InvalidPath(key.to_string()));
    }
    Ok(())
}

pub fn join_key(
    base: &str,
    child: &str,
) -> String {
    if base.len() == 1 {
        format!("/{}", child)
    } else {
        format!("{}/{}", base, child)
    }
}

pub fn parent_key(key: &str) -> Option<&str> {
    if key.len() <= 1 {
        return None;
    }
    match key.rfind(KEY_SEPARATOR) {
        Some(0) => Some("/"),
        Some(idx) => Some(&key[..idx]),
        None => None,
    }
}

pub fn leaf_name(key: &str) -> &str {
    key.rsplit(KEY_SEPARATOR).next().unwrap_or(key)
}

/// Proper ancestors of `key`, outermost first, root excluded.
///
/// `/a/b/c` yields `["/a", "/a/b"]`.
pub fn ancestor_keys(key: &str) -> Vec<String> {
    let mut ancestors = Vec::new();
    let mut current = String::new();
    let segments: Vec<&str> = key.split(KEY_SEPARATOR).filter(|s| !s.is_empty()).collect();
    if segments.len() < 2 {
        return ancestors;
    }
    for segment in &segments[..segments.len() - 1] {
        current.push(KEY_SEPARATOR);
        current.push_str(segment);
        ancestors.push(current.clone());
    }
    ancestors
}
