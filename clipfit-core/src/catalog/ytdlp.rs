use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use url::Url;

use super::{CatalogError, CatalogResult, StreamCatalog};
use crate::config::CatalogSection;
use crate::media::{
    Resolution, SourceIdentifier, SourceMetadata, StreamDescriptor, StreamKind,
};
use crate::process::{run_checked, CommandExecutor, SystemCommandExecutor};

/// Catalog backed by `yt-dlp -J` listings and direct HTTP downloads.
pub struct YtDlpCatalog {
    program: PathBuf,
    timeout: Duration,
    http_client: Client,
    executor: Arc<dyn CommandExecutor>,
}

impl YtDlpCatalog {
    pub fn new(config: &CatalogSection) -> CatalogResult<Self> {
        let http_client = Client::builder().user_agent(&config.user_agent).build()?;
        Ok(Self {
            program: PathBuf::from(&config.yt_dlp),
            timeout: Duration::from_secs(config.describe_timeout_seconds),
            http_client,
            executor: Arc::new(SystemCommandExecutor),
        })
    }

    pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = executor;
        self
    }

    async fn copy_local(&self, source: &Path, destination: &Path) -> CatalogResult<u64> {
        let partial = partial_path(destination);
        let copied = fs::copy(source, &partial)
            .await
            .map_err(|source| CatalogError::Io {
                path: partial.clone(),
                source,
            })?;
        fs::rename(&partial, destination)
            .await
            .map_err(|source| CatalogError::Io {
                path: destination.to_path_buf(),
                source,
            })?;
        Ok(copied)
    }

    async fn fetch_to_file(&self, url: &str, destination: &Path) -> CatalogResult<u64> {
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| CatalogError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        if let Ok(parsed) = Url::parse(url) {
            if parsed.scheme() == "file" {
                let source_path = parsed
                    .to_file_path()
                    .map_err(|_| CatalogError::Listing(format!("invalid file url {url}")))?;
                return self.copy_local(&source_path, destination).await;
            }
        }

        let partial = partial_path(destination);
        let response = self.http_client.get(url).send().await?.error_for_status()?;
        let mut stream = response.bytes_stream();
        let mut file = fs::File::create(&partial)
            .await
            .map_err(|source| CatalogError::Io {
                path: partial.clone(),
                source,
            })?;
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let data = chunk?;
            file.write_all(&data)
                .await
                .map_err(|source| CatalogError::Io {
                    path: partial.clone(),
                    source,
                })?;
            written += data.len() as u64;
        }
        file.flush().await.map_err(|source| CatalogError::Io {
            path: partial.clone(),
            source,
        })?;
        drop(file);
        fs::rename(&partial, destination)
            .await
            .map_err(|source| CatalogError::Io {
                path: destination.to_path_buf(),
                source,
            })?;
        Ok(written)
    }
}

#[async_trait]
impl StreamCatalog for YtDlpCatalog {
    async fn describe(&self, url: &str) -> CatalogResult<SourceMetadata> {
        let id = SourceIdentifier::from_url(url)?;
        let args = vec![
            "-J".to_string(),
            "--no-warnings".to_string(),
            "--no-playlist".to_string(),
            url.to_string(),
        ];
        let output = run_checked(self.executor.as_ref(), &self.program, &args, self.timeout).await?;
        let metadata = parse_listing(id, url, &output.stdout)?;
        info!(
            source = %metadata.id,
            streams = metadata.streams.len(),
            duration = metadata.duration_secs,
            "described source"
        );
        Ok(metadata)
    }

    async fn download(&self, stream: &StreamDescriptor, destination: &Path) -> CatalogResult<u64> {
        let url = stream
            .url
            .as_deref()
            .ok_or_else(|| CatalogError::NoDirectUrl {
                format_id: stream.format_id.clone(),
            })?;
        debug!(format = %stream, path = %destination.display(), "downloading stream");
        self.fetch_to_file(url, destination).await
    }
}

fn partial_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    destination.with_file_name(name)
}

#[derive(Debug, Deserialize)]
struct Listing {
    title: Option<String>,
    duration: Option<f64>,
    #[serde(default)]
    formats: Vec<ListedFormat>,
}

#[derive(Debug, Deserialize)]
struct ListedFormat {
    format_id: Option<String>,
    ext: Option<String>,
    vcodec: Option<String>,
    acodec: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    filesize: Option<f64>,
    filesize_approx: Option<f64>,
    tbr: Option<f64>,
    abr: Option<f64>,
    vbr: Option<f64>,
    url: Option<String>,
}

impl ListedFormat {
    fn into_descriptor(self) -> Option<StreamDescriptor> {
        let has_video = codec_present(&self.vcodec);
        let has_audio = codec_present(&self.acodec);
        let (kind, codec, bitrate) = match (has_video, has_audio) {
            (true, false) => (StreamKind::Video, self.vcodec?, self.vbr.or(self.tbr)),
            (false, true) => (StreamKind::Audio, self.acodec?, self.abr.or(self.tbr)),
            // muxed and storyboard formats are never selected
            _ => return None,
        };
        let resolution = match (kind, self.width, self.height) {
            (StreamKind::Video, Some(w), Some(h)) => Some(Resolution::new(w, h)),
            _ => None,
        };
        let declared_size_bytes = self
            .filesize
            .or(self.filesize_approx)
            .filter(|size| *size > 0.0)
            .map(|size| size.round() as u64);
        Some(StreamDescriptor {
            format_id: self.format_id?,
            kind,
            container: self.ext.unwrap_or_default(),
            codec,
            resolution,
            declared_size_bytes,
            bitrate_kbps: bitrate,
            url: self.url,
        })
    }
}

fn codec_present(codec: &Option<String>) -> bool {
    matches!(codec.as_deref(), Some(value) if !value.is_empty() && value != "none")
}

fn parse_listing(id: SourceIdentifier, url: &str, stdout: &[u8]) -> CatalogResult<SourceMetadata> {
    let listing: Listing =
        serde_json::from_slice(stdout).map_err(|err| CatalogError::Listing(err.to_string()))?;
    let streams = listing
        .formats
        .into_iter()
        .filter_map(ListedFormat::into_descriptor)
        .collect();
    Ok(SourceMetadata {
        id,
        url: url.to_string(),
        title: listing.title,
        duration_secs: listing.duration.map(|d| d.ceil() as u64).unwrap_or(0),
        streams,
    })
}
