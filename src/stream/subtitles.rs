//! Subtitle staging
//!
//! Downloads each compressed subtitle to `subtitle_<n>_<id>.srt.gz` in the
//! staging directory, where `n` is the asset's position, inflates it to
//! `subtitle_<n>_<id>.srt` and always removes the compressed file. Failures are logged and the asset is skipped: a
//! missing subtitle never stops playback.

use crate::api::SubtitleError;
use crate::models::SubtitleAsset;
use flate2::read::GzDecoder;
use std::io::Read;
use std::path::{Path, PathBuf};

#[derive(Clone)]
pub struct SubtitleStager {
    client: reqwest::Client,
    dir: PathBuf,
}

impl SubtitleStager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_client(reqwest::Client::new(), dir)
    }

    pub fn with_client(client: reqwest::Client, dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            dir: dir.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Paths for the asset at `position`. The position keeps assets whose
    /// ids sanitize to the same text apart.
    fn paths(&self, position: usize, asset: &SubtitleAsset) -> (PathBuf, PathBuf) {
        let id: String = asset
            .id
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
            .collect();
        let srt = self.dir.join(format!("subtitle_{position}_{id}.srt"));
        let gz = self.dir.join(format!("subtitle_{position}_{id}.srt.gz"));
        (gz, srt)
    }

    /// Download and unpack one asset
    pub async fn stage(&self, asset: &SubtitleAsset) -> Result<PathBuf, SubtitleError> {
        self.stage_at(0, asset).await
    }

    async fn stage_at(&self, position: usize, asset: &SubtitleAsset) -> Result<PathBuf, SubtitleError> {
        let (gz, srt) = self.paths(position, asset);
        let result = self.fetch_and_unpack(asset, &gz, &srt).await;
        if let Err(e) = tokio::fs::remove_file(&gz).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %gz.display(), error = %e, "failed to remove compressed subtitle");
            }
        }
        if result.is_err() {
            let _ = tokio::fs::remove_file(&srt).await;
        }
        result.map(|_| srt)
    }

    async fn fetch_and_unpack(
        &self,
        asset: &SubtitleAsset,
        gz: &Path,
        srt: &Path,
    ) -> Result<(), SubtitleError> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let resp = self.client.get(&asset.download_url).send().await?;
        if !resp.status().is_success() {
            return Err(SubtitleError::Status(resp.status().as_u16()));
        }
        let compressed = resp.bytes().await?;
        tokio::fs::write(gz, &compressed).await?;

        let data = tokio::fs::read(gz).await?;
        let text = tokio::task::spawn_blocking(move || {
            let mut out = Vec::new();
            GzDecoder::new(data.as_slice()).read_to_end(&mut out).map(|_| out)
        })
        .await
        .map_err(|e| SubtitleError::Decompress(std::io::Error::other(e)))?
        .map_err(SubtitleError::Decompress)?;

        tokio::fs::write(srt, text).await?;
        Ok(())
    }

    /// Stage every asset. Returns the staged paths in input order; the
    /// first one is the subtitle handed to the player.
    pub async fn stage_all(&self, assets: &[SubtitleAsset]) -> Vec<PathBuf> {
        let results =
            futures_util::future::join_all(
            assets
                .iter()
                .enumerate()
                .map(|(position, asset)| self.stage_at(position, asset)),
        )
        .await;
        assets
            .iter()
            .zip(results)
            .filter_map(|(asset, result)| match result {
                Ok(path) => {
                    tracing::debug!(id = %asset.id, path = %path.display(), "subtitle staged");
                    Some(path)
                }
                Err(e) => {
                    tracing::warn!(id = %asset.id, error = %e, "subtitle unavailable");
                    None
                }
            })
            .collect()
    }

    /// Remove every staged `*.srt` in the staging directory and, if
    /// given, in the engine buffer. Returns how many files were removed.
    pub async fn cleanup(&self, buffer: Option<&Path>) -> usize {
        let mut removed = 0;
        for dir in std::iter::once(self.dir.as_path()).chain(buffer) {
            let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
                continue;
            };
            while let Ok(Some(entry)) = entries.next_entry().await {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("srt") {
                    continue;
                }
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => removed += 1,
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "failed to remove subtitle")
                    }
                }
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_are_sanitized() {
        let stager = SubtitleStager::new("/tmp/subs");
        let asset = SubtitleAsset {
            id: "../12/34".into(),
            download_url: String::new(),
            language: "eng".into(),
            file_name: None,
        };
        let (gz, srt) = stager.paths(0, &asset);
        assert_eq!(gz, PathBuf::from("/tmp/subs/subtitle_0_1234.srt.gz"));
        assert_eq!(srt, PathBuf::from("/tmp/subs/subtitle_0_1234.srt"));
    }

    #[test]
    fn test_colliding_ids_get_distinct_paths() {
        let stager = SubtitleStager::new("/tmp/subs");
        let asset = |id: &str| SubtitleAsset {
            id: id.into(),
            download_url: String::new(),
            language: "eng".into(),
            file_name: None,
        };
        let (gz_a, srt_a) = stager.paths(0, &asset("../"));
        let (gz_b, srt_b) = stager.paths(1, &asset(""));
        assert_ne!(gz_a, gz_b);
        assert_ne!(srt_a, srt_b);
    }

    #[tokio::test]
    async fn test_cleanup_removes_only_srt() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("subtitle_1.srt"), "1").unwrap();
        std::fs::write(dir.path().join("keep.txt"), "1").unwrap();
        let stager = SubtitleStager::new(dir.path());
        assert_eq!(stager.cleanup(None).await, 1);
        assert!(dir.path().join("keep.txt").exists());
    }
}
