use anyhow::Result;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

pub struct Thumbnail {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
    pub source: PathBuf,
}

/// Newest `<prefix>_*.jpg` in `dir`, by modification time.
pub fn latest_frame(dir: &Path, prefix: &str) -> Result<Option<PathBuf>> {
    if !dir.is_dir() {
        return Ok(None);
    }

    let stem = format!("{}_", prefix);
    let mut newest: Option<(SystemTime, PathBuf)> = None;

    for entry in std::fs::read_dir(dir)?.filter_map(|e| e.ok()) {
        let path = entry.path();
        let name_matches = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(&stem));
        let is_jpeg = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("jpg"));
        if !name_matches || !is_jpeg {
            continue;
        }

        let modified = match entry.metadata().and_then(|m| m.modified()) {
            Ok(t) => t,
            Err(_) => continue,
        };
        if newest.as_ref().is_none_or(|(t, _)| modified > *t) {
            newest = Some((modified, path));
        }
    }

    Ok(newest.map(|(_, path)| path))
}

pub fn load_thumbnail(path: &Path, max_side: u32) -> Result<Thumbnail> {
    let img = image::open(path)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?
        .thumbnail(max_side, max_side)
        .to_rgba8();

    Ok(Thumbnail {
        width: img.width(),
        height: img.height(),
        rgba: img.into_raw(),
        source: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::fs::File;
    use std::time::Duration;

    fn touch(dir: &Path, name: &str, age_secs: u64) -> PathBuf {
        let path = dir.join(name);
        let file = File::create(&path).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(age_secs))
            .unwrap();
        path
    }

    #[test]
    fn picks_newest_matching_frame() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "image_0000.jpg", 30);
        let newest = touch(dir.path(), "image_0001.jpg", 10);
        touch(dir.path(), "other_0005.jpg", 1);
        touch(dir.path(), "image_0002.txt", 1);

        assert_eq!(latest_frame(dir.path(), "image").unwrap(), Some(newest));
    }

    #[test]
    fn empty_or_missing_dir_has_no_frame() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(latest_frame(dir.path(), "image").unwrap(), None);
        assert_eq!(
            latest_frame(&dir.path().join("missing"), "image").unwrap(),
            None
        );
    }

    #[test]
    fn thumbnail_keeps_aspect_ratio() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.png");
        RgbImage::from_pixel(64, 32, Rgb([200, 10, 10])).save(&path).unwrap();

        let thumb = load_thumbnail(&path, 16).unwrap();
        assert_eq!((thumb.width, thumb.height), (16, 8));
        assert_eq!(thumb.rgba.len(), 16 * 8 * 4);
        assert_eq!(thumb.rgba[3], 255);
    }

    #[test]
    fn unreadable_frame_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = touch(dir.path(), "image_0000.jpg", 0);
        assert!(load_thumbnail(&path, 16).is_err());
    }
}
