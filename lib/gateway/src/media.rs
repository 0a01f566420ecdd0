// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Files produced or received by inference requests, named after the request id.

use std::path::{Path, PathBuf};

use anyhow::Context;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum UploadPathError {
    #[error("Audio file not found or path not provided")]
    NotFound,

    #[error("Audio file must be an upload stored under the media root")]
    OutsideMediaRoot,
}

#[derive(Debug, Clone)]
pub struct MediaStore {
    root: PathBuf,
}

impl MediaStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        MediaStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Generated 3D model
    pub fn model_path(&self, request_id: &str) -> PathBuf {
        self.root.join("models").join(format!("{request_id}.glb"))
    }

    /// Annotated OCR input
    pub fn ocr_visualization_path(&self, request_id: &str) -> PathBuf {
        self.root.join("paddleocr").join(request_id).join("0.png")
    }

    pub fn asr_upload_dir(&self) -> PathBuf {
        self.root.join("asr")
    }

    pub fn asr_upload_path(&self, request_id: &str) -> PathBuf {
        self.asr_upload_dir().join(format!("{request_id}.wav"))
    }

    pub fn studiovoice_input_dir(&self) -> PathBuf {
        self.root.join("studiovoice").join("input")
    }

    pub fn studiovoice_input_path(&self, request_id: &str) -> PathBuf {
        self.studiovoice_input_dir().join(format!("{request_id}.wav"))
    }

    pub fn studiovoice_output_path(&self, request_id: &str) -> PathBuf {
        self.root
            .join("studiovoice")
            .join("output")
            .join(format!("{request_id}.wav"))
    }

    /// Resolves `path` to a regular file inside `dir`.
    ///
    /// Both sides are canonicalized first, so `..` segments and symlinks
    /// cannot lead out of `dir`.
    pub async fn resolve_upload(&self, dir: &Path, path: &str) -> Result<PathBuf, UploadPathError> {
        let file = tokio::fs::canonicalize(path)
            .await
            .map_err(|_| UploadPathError::NotFound)?;
        let dir = tokio::fs::canonicalize(dir)
            .await
            .map_err(|_| UploadPathError::OutsideMediaRoot)?;
        if !file.starts_with(&dir) {
            return Err(UploadPathError::OutsideMediaRoot);
        }
        match tokio::fs::metadata(&file).await {
            Ok(meta) if meta.is_file() => Ok(file),
            _ => Err(UploadPathError::NotFound),
        }
    }

    /// Writes `data` to `path`, creating parent directories
    pub async fn write(&self, path: &Path, data: &[u8]) -> anyhow::Result<()> {
        ensure_parent(path).await?;
        tokio::fs::write(path, data)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        tracing::debug!(path = %path.display(), bytes = data.len(), "wrote media file");
        Ok(())
    }
}

pub(crate) async fn ensure_parent(path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let media = MediaStore::new("/srv/media");
        assert_eq!(media.model_path("abc"), PathBuf::from("/srv/media/models/abc.glb"));
        assert_eq!(
            media.ocr_visualization_path("abc"),
            PathBuf::from("/srv/media/paddleocr/abc/0.png")
        );
        assert_eq!(media.asr_upload_path("abc"), PathBuf::from("/srv/media/asr/abc.wav"));
        assert_eq!(
            media.studiovoice_input_path("abc"),
            PathBuf::from("/srv/media/studiovoice/input/abc.wav")
        );
        assert_eq!(
            media.studiovoice_output_path("abc"),
            PathBuf::from("/srv/media/studiovoice/output/abc.wav")
        );
    }

    #[tokio::test]
    async fn test_resolve_upload_stays_inside_dir() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let media = MediaStore::new(dir.path());
        let upload = media.asr_upload_path("req-1");
        media.write(&upload, b"RIFF").await?;
        let stray = dir.path().join("elsewhere.wav");
        tokio::fs::write(&stray, b"RIFF").await?;

        let asr = media.asr_upload_dir();
        let resolved = media
            .resolve_upload(&asr, &upload.display().to_string())
            .await?;
        assert_eq!(resolved, tokio::fs::canonicalize(&upload).await?);

        let escaping = asr.join("..").join("elsewhere.wav");
        assert_eq!(
            media.resolve_upload(&asr, &escaping.display().to_string()).await,
            Err(UploadPathError::OutsideMediaRoot)
        );
        assert_eq!(
            media
                .resolve_upload(&asr, &stray.display().to_string())
                .await,
            Err(UploadPathError::OutsideMediaRoot)
        );
        assert_eq!(
            media.resolve_upload(&asr, &asr.join("missing.wav").display().to_string()).await,
            Err(UploadPathError::NotFound)
        );
        // the directory itself is not an upload
        assert_eq!(
            media.resolve_upload(&asr, &asr.display().to_string()).await,
            Err(UploadPathError::NotFound)
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_write_creates_directories() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let media = MediaStore::new(dir.path());
        let path = media.model_path("req-1");
        media.write(&path, b"glTF").await?;
        assert_eq!(tokio::fs::read(&path).await?, b"glTF");
        Ok(())
    }
}
