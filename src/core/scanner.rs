use crate::core::fetch::CandidateRef;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "tif", "tiff", "webp"];

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Invalid path: {path}")]
    InvalidPath { path: String },
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

/// Recursively collect image files under `dir`, sorted so that the
/// resulting candidate order is stable between runs.
pub fn discover_images(dir: &Path) -> Result<Vec<PathBuf>, ScanError> {
    if !dir.is_dir() {
        return Err(ScanError::InvalidPath {
            path: format!("{} is not a directory", dir.display()),
        });
    }

    let mut images: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|entry| entry.file_type().is_file() && is_image(entry.path()))
        .map(|entry| entry.into_path())
        .collect();
    images.sort();

    log::debug!("Found {} reference images in {}", images.len(), dir.display());
    Ok(images)
}

/// Reference images under `dir` as local candidates.
pub fn discover_candidates(dir: &Path) -> Result<Vec<CandidateRef>, ScanError> {
    Ok(discover_images(dir)?
        .into_iter()
        .map(CandidateRef::Local)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_discovers_images_recursively_in_sorted_order() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("shelf/b")).unwrap();
        fs::write(root.join("z.JPG"), b"").unwrap();
        fs::write(root.join("a.png"), b"").unwrap();
        fs::write(root.join("notes.txt"), b"").unwrap();
        fs::write(root.join("shelf/b/cover.webp"), b"").unwrap();
        fs::write(root.join("shelf/README"), b"").unwrap();

        let found = discover_images(root).unwrap();
        let names: Vec<String> = found
            .iter()
            .map(|p| p.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/"))
            .collect();
        assert_eq!(names, vec!["a.png", "shelf/b/cover.webp", "z.JPG"]);
    }

    #[test]
    fn test_candidates_are_local() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("page.jpeg"), b"").unwrap();

        let candidates = discover_candidates(temp_dir.path()).unwrap();
        assert_eq!(candidates.len(), 1);
        assert!(!candidates[0].is_remote());
    }

    #[test]
    fn test_rejects_non_directory() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("single.png");
        fs::write(&file, b"").unwrap();

        assert!(discover_images(&file).is_err());
        assert!(discover_images(&temp_dir.path().join("missing")).is_err());
    }
}
