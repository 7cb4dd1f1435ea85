use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::fs;
use tracing::info;
use uuid::Uuid;

use crate::media::{MediaArtifact, PartHandle, ProducedMedia};

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("delivered part {0} is no longer available")]
    NotFound(String),
    #[error("delivery rejected: {0}")]
    Rejected(String),
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
}

pub type DeliveryResult<T> = Result<T, DeliveryError>;

#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    async fn publish(
        &self,
        destination: &str,
        media: &ProducedMedia,
        caption: &str,
    ) -> DeliveryResult<Vec<PartHandle>>;

    async fn redeliver(
        &self,
        destination: &str,
        artifact: &MediaArtifact,
        caption: &str,
    ) -> DeliveryResult<()>;
}

#[derive(Debug, Clone)]
pub struct OutboxChannel {
    root: PathBuf,
}

impl OutboxChannel {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn destination_dir(&self, destination: &str) -> PathBuf {
        let safe: String = destination
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.root.join(safe)
    }

    async fn write_caption(&self, path: &Path, caption: &str) -> DeliveryResult<()> {
        fs::write(path, caption)
            .await
            .map_err(|source| DeliveryError::Io {
                path: path.to_path_buf(),
                source,
            })
    }
}

#[async_trait]
impl DeliveryChannel for OutboxChannel {
    async fn publish(
        &self,
        destination: &str,
        media: &ProducedMedia,
        caption: &str,
    ) -> DeliveryResult<Vec<PartHandle>> {
        if media.parts.is_empty() {
            return Err(DeliveryError::Rejected("nothing to publish".to_string()));
        }
        let dir = self.destination_dir(destination);
        fs::create_dir_all(&dir)
            .await
            .map_err(|source| DeliveryError::Io {
                path: dir.clone(),
                source,
            })?;
        let batch = Uuid::new_v4();
        let mut handles = Vec::with_capacity(media.parts.len());
        for (index, part) in media.parts.iter().enumerate() {
            let target = dir.join(format!("{batch}-{:02}.mp4", index + 1));
            fs::copy(part, &target)
                .await
                .map_err(|source| DeliveryError::Io {
                    path: target.clone(),
                    source,
                })?;
            handles.push(PartHandle::new(target.to_string_lossy()));
        }
        self.write_caption(&dir.join(format!("{batch}.txt")), caption)
            .await?;
        info!(destination, parts = handles.len(), "published to outbox");
        Ok(handles)
    }

    async fn redeliver(
        &self,
        destination: &str,
        artifact: &MediaArtifact,
        caption: &str,
    ) -> DeliveryResult<()> {
        for part in &artifact.parts {
            match fs::metadata(part.as_str()).await {
                Ok(meta) if meta.is_file() => {}
                _ => return Err(DeliveryError::NotFound(part.to_string())),
            }
        }
        let dir = self.destination_dir(destination);
        fs::create_dir_all(&dir)
            .await
            .map_err(|source| DeliveryError::Io {
                path: dir.clone(),
                source,
            })?;
        let listing: Vec<&str> = artifact.parts.iter().map(PartHandle::as_str).collect();
        let body = format!("{caption}\n\n{}\n", listing.join("\n"));
        self.write_caption(&dir.join(format!("{}.txt", Uuid::new_v4())), &body)
            .await?;
        info!(destination, parts = artifact.parts.len(), "redelivered from cache");
        Ok(())
    }
}
