use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Local};

/// Destination for downloaded assets.
#[async_trait]
pub trait AssetSink: Send + Sync {
    /// Store `bytes` under `filename`, returning the final path. A failed
    /// write must not leave a readable file at that path.
    async fn persist(&self, filename: &str, bytes: &[u8]) -> std::io::Result<PathBuf>;
}

/// Deterministic per-job filename: 1-based job index plus a millisecond
/// timestamp, e.g. `video_3_20240501_142233_517.mp4`.
pub fn asset_filename(index: usize, at: DateTime<Local>) -> String {
    format!("video_{}_{}.mp4", index + 1, at.format("%Y%m%d_%H%M%S_%3f"))
}

/// Suffix of an asset that is still being written.
pub const PARTIAL_SUFFIX: &str = ".part";

/// Writes assets into a directory, via a temporary `.part` file renamed on
/// success.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl AssetSink for DirectorySink {
    async fn persist(&self, filename: &str, bytes: &[u8]) -> std::io::Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let final_path = self.dir.join(filename);
        let part_path = self.dir.join(format!("{}{}", filename, PARTIAL_SUFFIX));

        if let Err(e) = tokio::fs::write(&part_path, bytes).await {
            let _ = tokio::fs::remove_file(&part_path).await;
            return Err(e);
        }
        if let Err(e) = tokio::fs::rename(&part_path, &final_path).await {
            let _ = tokio::fs::remove_file(&part_path).await;
            return Err(e);
        }
        Ok(final_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    #[test]
    fn test_asset_filename_encodes_index_and_timestamp() {
        let at = Local.with_ymd_and_hms(2024, 5, 1, 14, 22, 33).unwrap();
        assert_eq!(asset_filename(0, at), "video_1_20240501_142233_000.mp4");
        assert_eq!(asset_filename(9, at), "video_10_20240501_142233_000.mp4");
    }

    #[test]
    fn test_asset_filenames_differ_by_index() {
        let at = Local::now();
        assert_ne!(asset_filename(0, at), asset_filename(1, at));
    }

    #[tokio::test]
    async fn test_directory_sink_writes_file() {
        let dir = tempdir().unwrap();
        let sink = DirectorySink::new(dir.path().join("downloads"));
        let path = sink.persist("video_1.mp4", b"data").await.unwrap();
        assert_eq!(path, dir.path().join("downloads").join("video_1.mp4"));
        assert_eq!(std::fs::read(&path).unwrap(), b"data");
        assert!(!dir.path().join("downloads").join("video_1.mp4.part").exists());
    }

    #[tokio::test]
    async fn test_directory_sink_failure_leaves_no_file() {
        let dir = tempdir().unwrap();
        // A regular file where the directory should be makes every write fail.
        let blocked = dir.path().join("blocked");
        std::fs::write(&blocked, b"").unwrap();
        let sink = DirectorySink::new(&blocked);
        assert!(sink.persist("video_1.mp4", b"data").await.is_err());
        assert!(!blocked.join("video_1.mp4").exists());
    }
}
