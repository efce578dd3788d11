//! Local media host.
//!
//! Uploaded files land under `<data_root>/assets/{images,videos}` with a
//! generated name and are served back by the assets route. Callers only ever
//! see the public URL, which is also the handle used to delete a file later.

use std::{
    path::{Component, Path, PathBuf},
    process::Command,
};

use anyhow::Context;
use axum::body::Bytes;
use mime_guess::{MimeGuess, mime::Mime};
use thiserror::Error;
use tracing::{debug, info};

use crate::id::EntityId;

pub const ASSETS_DIR: &str = "assets";
pub const ASSET_ROUTE_PREFIX: &str = "/api/v1/assets";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Image,
    Video,
}

impl AssetKind {
    pub fn dir(self) -> &'static str {
        match self {
            Self::Image => "images",
            Self::Video => "videos",
        }
    }

    pub fn from_dir(value: &str) -> Option<Self> {
        match value {
            "images" => Some(Self::Image),
            "videos" => Some(Self::Video),
            _ => None,
        }
    }

    fn accepts(self, mime: &Mime) -> bool {
        match self {
            Self::Image => mime.type_() == mime_guess::mime::IMAGE,
            Self::Video => mime.type_() == mime_guess::mime::VIDEO,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
        }
    }
}

/// A file field read out of a multipart body.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredAsset {
    pub url: String,
    pub path: PathBuf,
    /// Seconds, only probed for videos.
    pub duration: Option<f64>,
}

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("uploaded file {0:?} is empty")]
    Empty(String),
    #[error("{file:?} is not a supported {expected} file")]
    UnsupportedType { file: String, expected: &'static str },
    #[error("asset url {0:?} does not belong to this host")]
    ForeignUrl(String),
    #[error("writing asset {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub struct LocalAssetHost {
    root: PathBuf,
    public_url: String,
}

impl LocalAssetHost {
    pub fn new(data_root: &Path, public_url: &str) -> Self {
        Self {
            root: data_root.join(ASSETS_DIR),
            public_url: public_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates the per-kind directories.
    pub async fn prepare(&self) -> anyhow::Result<()> {
        for kind in [AssetKind::Image, AssetKind::Video] {
            let dir = self.root.join(kind.dir());
            tokio::fs::create_dir_all(&dir)
                .await
                .with_context(|| format!("creating asset directory {}", dir.display()))?;
        }
        Ok(())
    }

    pub fn url_for(&self, kind: AssetKind, file: &str) -> String {
        format!("{}{ASSET_ROUTE_PREFIX}/{}/{file}", self.public_url, kind.dir())
    }

    /// Resolves a served file name, refusing anything but a single plain segment.
    pub fn path_for(&self, kind: AssetKind, file: &str) -> Option<PathBuf> {
        is_plain_segment(file).then(|| self.root.join(kind.dir()).join(file))
    }

    pub async fn upload(
        &self,
        kind: AssetKind,
        upload: &UploadedFile,
    ) -> Result<StoredAsset, AssetError> {
        if upload.bytes.is_empty() {
            return Err(AssetError::Empty(upload.file_name.clone()));
        }
        let mime = upload
            .content_type
            .as_deref()
            .and_then(|value| value.parse::<Mime>().ok())
            .filter(|mime| kind.accepts(mime))
            .or_else(|| {
                MimeGuess::from_path(&upload.file_name)
                    .first()
                    .filter(|mime| kind.accepts(mime))
            })
            .ok_or_else(|| AssetError::UnsupportedType {
                file: upload.file_name.clone(),
                expected: kind.label(),
            })?;

        let file_name = format!("{}.{}", EntityId::generate(), extension_for(&upload.file_name, &mime));
        let dir = self.root.join(kind.dir());
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| AssetError::Io {
                path: dir.clone(),
                source,
            })?;
        let path = dir.join(&file_name);
        tokio::fs::write(&path, &upload.bytes)
            .await
            .map_err(|source| AssetError::Io {
                path: path.clone(),
                source,
            })?;

        let duration = match kind {
            AssetKind::Video => probe_duration(path.clone()).await,
            AssetKind::Image => None,
        };
        info!(path = %path.display(), bytes = upload.bytes.len(), "stored uploaded asset");

        Ok(StoredAsset {
            url: self.url_for(kind, &file_name),
            path,
            duration,
        })
    }

    /// Removes the file behind a URL handed out by [`Self::upload`].
    /// Returns `false` when the file was already gone.
    pub async fn delete_by_url(&self, url: &str) -> Result<bool, AssetError> {
        let (kind, file) = self
            .locate(url)
            .ok_or_else(|| AssetError::ForeignUrl(url.to_string()))?;
        let Some(path) = self.path_for(kind, file) else {
            return Err(AssetError::ForeignUrl(url.to_string()));
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(path = %path.display(), "removed asset");
                Ok(true)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(AssetError::Io { path, source }),
        }
    }

    fn locate<'a>(&self, url: &'a str) -> Option<(AssetKind, &'a str)> {
        let rest = url
            .strip_prefix(self.public_url.as_str())?
            .strip_prefix(ASSET_ROUTE_PREFIX)?
            .strip_prefix('/')?;
        let (dir, file) = rest.split_once('/')?;
        Some((AssetKind::from_dir(dir)?, file))
    }
}

/// Single path component with no traversal.
pub fn is_plain_segment(value: &str) -> bool {
    !value.is_empty()
        && !value.contains('/')
        && !value.contains('\\')
        && Path::new(value)
            .components()
            .all(|component| matches!(component, Component::Normal(_)))
}

fn extension_for(file_name: &str, mime: &Mime) -> String {
    let from_name = Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .filter(|ext| !ext.is_empty() && ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric()));
    from_name
        .or_else(|| {
            mime_guess::get_mime_extensions(mime)
                .and_then(|exts| exts.first())
                .map(|ext| ext.to_string())
        })
        .unwrap_or_else(|| "bin".to_string())
}

/// Asks `ffprobe` for the container duration. Any failure yields `None`.
async fn probe_duration(path: PathBuf) -> Option<f64> {
    let probed = tokio::task::spawn_blocking(move || {
        Command::new("ffprobe")
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(&path)
            .output()
    })
    .await;

    match probed {
        Ok(Ok(output)) if output.status.success() => {
            let text = String::from_utf8_lossy(&output.stdout);
            text.trim().parse::<f64>().ok().filter(|value| value.is_finite() && *value >= 0.0)
        }
        Ok(Ok(output)) => {
            debug!(status = %output.status, "ffprobe could not read duration");
            None
        }
        Ok(Err(err)) => {
            debug!(error = %err, "ffprobe unavailable");
            None
        }
        Err(err) => {
            debug!(error = %err, "duration probe task failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn file(name: &str, content_type: Option<&str>, bytes: &'static [u8]) -> UploadedFile {
        UploadedFile {
            file_name: name.into(),
            content_type: content_type.map(Into::into),
            bytes: Bytes::from_static(bytes),
        }
    }

    #[tokio::test]
    async fn upload_then_delete_by_url() {
        let dir = tempdir().unwrap();
        let host = LocalAssetHost::new(dir.path(), "http://localhost:8000/");
        host.prepare().await.unwrap();

        let stored = host
            .upload(AssetKind::Image, &file("me.PNG", Some("image/png"), b"PNG"))
            .await
            .unwrap();
        assert!(stored.url.starts_with("http://localhost:8000/api/v1/assets/images/"));
        assert!(stored.url.ends_with(".png"));
        assert!(stored.duration.is_none());
        assert_eq!(std::fs::read(&stored.path).unwrap(), b"PNG");

        assert!(host.delete_by_url(&stored.url).await.unwrap());
        assert!(!stored.path.exists());
        assert!(!host.delete_by_url(&stored.url).await.unwrap());
    }

    #[tokio::test]
    async fn video_upload_without_probe_has_no_duration_error() {
        let dir = tempdir().unwrap();
        let host = LocalAssetHost::new(dir.path(), "http://localhost");
        let stored = host
            .upload(AssetKind::Video, &file("clip.mp4", None, b"not really mp4"))
            .await
            .unwrap();
        assert!(stored.path.starts_with(dir.path().join("assets").join("videos")));
        assert!(stored.duration.is_none_or(|value| value >= 0.0));
    }

    #[tokio::test]
    async fn upload_rejects_empty_and_mismatched_types() {
        let dir = tempdir().unwrap();
        let host = LocalAssetHost::new(dir.path(), "http://localhost");
        assert!(matches!(
            host.upload(AssetKind::Image, &file("a.png", None, b"")).await,
            Err(AssetError::Empty(_))
        ));
        assert!(matches!(
            host.upload(AssetKind::Image, &file("a.mp4", Some("video/mp4"), b"x"))
                .await,
            Err(AssetError::UnsupportedType { .. })
        ));
    }

    #[tokio::test]
    async fn delete_rejects_foreign_and_traversal_urls() {
        let dir = tempdir().unwrap();
        let host = LocalAssetHost::new(dir.path(), "http://localhost");
        assert!(matches!(
            host.delete_by_url("http://cdn.example/x.png").await,
            Err(AssetError::ForeignUrl(_))
        ));
        assert!(matches!(
            host.delete_by_url("http://localhost/api/v1/assets/images/../../db").await,
            Err(AssetError::ForeignUrl(_))
        ));
        assert!(matches!(
            host.delete_by_url("http://localhost/api/v1/assets/audio/x.mp3").await,
            Err(AssetError::ForeignUrl(_))
        ));
    }

    #[test]
    fn plain_segments_only() {
        assert!(is_plain_segment("abc.png"));
        assert!(!is_plain_segment(""));
        assert!(!is_plain_segment(".."));
        assert!(!is_plain_segment("a/b"));
        assert!(!is_plain_segment("/etc"));
    }
}
