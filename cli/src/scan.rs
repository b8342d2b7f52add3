use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use thumbnail_cache::Item;
use walkdir::WalkDir;

/// Supported image file extensions
pub const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "webp", "tif", "tiff", "bmp", "cr3", "cr2", "nef", "arw", "raf",
    "dng", "rw2", "orf",
];

/// Recursively scan a folder for supported image files, sorted by path.
/// Symlinks are not followed, so link cycles cannot repeat files.
pub fn scan_folder(folder: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in WalkDir::new(folder).follow_links(false) {
        let entry =
            entry.with_context(|| format!("Failed to read directory: {}", folder.display()))?;
        if entry.file_type().is_file() && is_image(entry.path()) {
            paths.push(entry.into_path());
        }
    }
    paths.sort();
    Ok(paths)
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Turn scanned paths into items relative to `root`. Ids follow scan order;
/// the first file gets the highest `order` so it is displayed first.
pub fn items_for(root: &Path, paths: &[PathBuf]) -> Vec<Item> {
    let count = paths.len() as i64;
    paths
        .iter()
        .enumerate()
        .filter_map(|(index, path)| {
            let relative = path.strip_prefix(root).ok()?;
            let index = index as i64;
            Some(Item::new(index + 1, relative).with_order(count - index))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_scan_finds_images_recursively() -> Result<()> {
        let temp_dir = tempdir()?;
        let root = temp_dir.path();
        std::fs::create_dir_all(root.join("work1/nested"))?;
        std::fs::write(root.join("work1/a.JPG"), b"")?;
        std::fs::write(root.join("work1/nested/b.nef"), b"")?;
        std::fs::write(root.join("work1/readme.txt"), b"")?;

        let paths = scan_folder(root)?;
        assert_eq!(paths.len(), 2);

        let items = items_for(root, &paths);
        assert_eq!(items[0].relative_path, PathBuf::from("work1/a.JPG"));
        assert_eq!(items[0].order, 2);
        assert_eq!(items[1].relative_path, PathBuf::from("work1/nested/b.nef"));
        assert_eq!(items[1].id, 2);
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_scan_ignores_symlink_cycles() -> Result<()> {
        let temp_dir = tempdir()?;
        let root = temp_dir.path();
        std::fs::create_dir_all(root.join("a"))?;
        std::fs::write(root.join("a/x.jpg"), b"")?;
        std::os::unix::fs::symlink(root, root.join("a/loop"))?;

        let paths = scan_folder(root)?;
        assert_eq!(paths, vec![root.join("a/x.jpg")]);
        Ok(())
    }

    #[test]
    fn test_scan_missing_folder_fails() {
        assert!(scan_folder(Path::new("/definitely/not/here")).is_err());
    }
}
