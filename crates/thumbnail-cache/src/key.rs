//! Stable cache keys for thumbnails
//!
//! A key is derived purely from where an image lives, so a thumbnail written in
//! one run is found again in the next without touching the source file.

use crate::item::Item;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Longest sanitized directory prefix kept in a key (tail end is kept)
const MAX_DIR_PREFIX: usize = 64;

/// Characters that must not appear in the directory part of a key
const SEPARATORS: &[char] = &['/', '\\', ':'];

/// Build the cache key for `file_name` inside `collection_path`.
///
/// The directory is flattened (separators become `_`), then joined with a short
/// digest of the exact inputs and the file name. The digest keeps keys distinct
/// when two directories flatten to the same text, e.g. `a_b/c` and `a/b_c`.
pub fn cache_key(collection_path: &str, file_name: &str) -> String {
    let sanitized = sanitize_dir(collection_path);

    let mut hasher = Sha256::new();
    hasher.update(collection_path.as_bytes());
    hasher.update([0u8]);
    hasher.update(file_name.as_bytes());
    let digest = hasher.finalize();

    format!("{}_{}_{}", sanitized, hex::encode(&digest[..8]), file_name)
}

/// Cache key for a source file: its parent directory plus its base name
pub fn cache_key_for_path(source: &Path) -> String {
    let dir = source
        .parent()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();
    let file_name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    cache_key(&dir, &file_name)
}

/// Cache key of an item loaded from `collection_root`
pub fn cache_key_for_item(collection_root: &Path, item: &Item) -> String {
    cache_key_for_path(&item.source_path(collection_root))
}

fn sanitize_dir(dir: &str) -> String {
    let flattened: String = dir
        .trim_matches(SEPARATORS)
        .chars()
        .map(|c| if SEPARATORS.contains(&c) { '_' } else { c })
        .collect();

    let count = flattened.chars().count();
    if count <= MAX_DIR_PREFIX {
        return flattened;
    }
    flattened.chars().skip(count - MAX_DIR_PREFIX).collect()
}
