mod ytdlp;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::fs;
use tracing::debug;

use crate::media::{Resolution, SourceError, SourceMetadata, StreamDescriptor, StreamKind};
use crate::process::ProcessError;

pub use ytdlp::YtDlpCatalog;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("unreadable catalog listing: {0}")]
    Listing(String),
    #[error("stream {format_id} has no direct url")]
    NoDirectUrl { format_id: String },
}

pub type CatalogResult<T> = Result<T, CatalogError>;

#[async_trait]
pub trait StreamCatalog: Send + Sync {
    async fn describe(&self, url: &str) -> CatalogResult<SourceMetadata>;

    async fn download(&self, stream: &StreamDescriptor, destination: &Path) -> CatalogResult<u64>;
}

pub async fn download_once(
    catalog: &dyn StreamCatalog,
    stream: &StreamDescriptor,
    destination: &Path,
) -> CatalogResult<u64> {
    if let Ok(metadata) = fs::metadata(destination).await {
        if metadata.is_file() && metadata.len() > 0 {
            debug!(path = %destination.display(), bytes = metadata.len(), "reusing downloaded stream");
            return Ok(metadata.len());
        }
    }
    catalog.download(stream, destination).await
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoPolicy {
    pub containers: Vec<String>,
    pub codec_prefix: String,
    pub min_height: u32,
}

pub fn select_video_candidates(
    streams: &[StreamDescriptor],
    policy: &VideoPolicy,
) -> Vec<StreamDescriptor> {
    let mut by_resolution: HashMap<Resolution, StreamDescriptor> = HashMap::new();
    for stream in streams {
        if stream.kind != StreamKind::Video {
            continue;
        }
        let Some(resolution) = stream.resolution else {
            continue;
        };
        if resolution.height < policy.min_height
            || !policy
                .containers
                .iter()
                .any(|c| c.eq_ignore_ascii_case(&stream.container))
            || !stream.codec.starts_with(&policy.codec_prefix)
        {
            continue;
        }
        // later listings of the same resolution replace earlier ones
        by_resolution.insert(resolution, stream.clone());
    }
    let mut candidates: Vec<StreamDescriptor> = by_resolution.into_values().collect();
    candidates.sort_by_key(|stream| {
        let res = stream.resolution.unwrap_or(Resolution::new(0, 0));
        std::cmp::Reverse((res.pixels(), res.height, res.width))
    });
    candidates
}

pub fn select_best_audio(
    streams: &[StreamDescriptor],
    containers: &[String],
) -> Option<StreamDescriptor> {
    streams
        .iter()
        .filter(|stream| stream.kind == StreamKind::Audio)
        .filter(|stream| {
            containers
                .iter()
                .any(|c| c.eq_ignore_ascii_case(&stream.container))
        })
        .max_by(|a, b| {
            a.bitrate_kbps
                .unwrap_or(0.0)
                .total_cmp(&b.bitrate_kbps.unwrap_or(0.0))
        })
        .cloned()
}
