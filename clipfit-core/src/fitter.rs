use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::fs;
use tracing::{debug, info};

use crate::audio::ResolvedAudio;
use crate::catalog::{download_once, CatalogError, StreamCatalog};
use crate::config::LimitsSection;
use crate::media::{ArtifactPlan, SourceIdentifier, SourceMetadata, StreamDescriptor};
use crate::transcoder::{TranscodeError, Transcoder};

pub const DEFAULT_CEILING_BYTES: u64 = 50 * 1024 * 1024;
pub const DEFAULT_SAFETY_MARGIN: f64 = 0.98;
pub const DEFAULT_MAX_PARTS: usize = 10;

#[derive(Debug, Error)]
pub enum FitError {
    #[error("no stream of {source_id} fits {max_parts} parts ({candidates} candidates tried)")]
    NoSuitableStream {
        source_id: SourceIdentifier,
        candidates: usize,
        max_parts: usize,
    },
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Transcode(#[from] TranscodeError),
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
}

pub type FitResult<T> = Result<T, FitError>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizeBudget {
    pub ceiling_bytes: u64,
    pub safety_margin: f64,
    pub max_parts: usize,
}

impl Default for SizeBudget {
    fn default() -> Self {
        Self {
            ceiling_bytes: DEFAULT_CEILING_BYTES,
            safety_margin: DEFAULT_SAFETY_MARGIN,
            max_parts: DEFAULT_MAX_PARTS,
        }
    }
}

impl SizeBudget {
    pub fn from_limits(limits: &LimitsSection) -> Self {
        Self {
            ceiling_bytes: limits.ceiling_bytes,
            safety_margin: limits.safety_margin,
            max_parts: limits.max_parts,
        }
    }

    pub fn allowance(&self, parts: usize) -> u64 {
        (self.ceiling_bytes as f64 * self.safety_margin * parts as f64).floor() as u64
    }

    pub fn fits(&self, size_bytes: u64, parts: usize) -> bool {
        size_bytes <= self.allowance(parts)
    }
}

pub struct StreamFitter {
    catalog: Arc<dyn StreamCatalog>,
    transcoder: Arc<dyn Transcoder>,
    budget: SizeBudget,
}

impl StreamFitter {
    pub fn new(
        catalog: Arc<dyn StreamCatalog>,
        transcoder: Arc<dyn Transcoder>,
        budget: SizeBudget,
    ) -> Self {
        Self {
            catalog,
            transcoder,
            budget,
        }
    }

    pub fn budget(&self) -> SizeBudget {
        self.budget
    }

    pub async fn fit(
        &self,
        metadata: &SourceMetadata,
        audio: &ResolvedAudio,
        candidates: &[StreamDescriptor],
        workdir: &Path,
    ) -> FitResult<ArtifactPlan> {
        let audio_tag = audio
            .translated_to
            .map(|lang| lang.as_str())
            .unwrap_or("original");
        for part_count in 1..=self.budget.max_parts {
            let allowance = self.budget.allowance(part_count);
            for stream in candidates {
                if let Some(nominal) = stream.nominal_size(metadata.duration_secs) {
                    let estimate = audio.size_bytes.saturating_add(nominal);
                    if estimate > allowance {
                        debug!(
                            source = %metadata.id,
                            format = %stream,
                            part_count,
                            estimate,
                            allowance,
                            "skipping stream on nominal size"
                        );
                        continue;
                    }
                }

                let merged = self
                    .merged_file(metadata, audio, stream, audio_tag, workdir)
                    .await?;
                let measured = file_size(&merged).await?;
                if !self.budget.fits(measured, part_count) {
                    debug!(
                        source = %metadata.id,
                        format = %stream,
                        part_count,
                        measured,
                        allowance,
                        "merged file over budget"
                    );
                    continue;
                }
                info!(
                    source = %metadata.id,
                    format = %stream,
                    part_count,
                    measured,
                    "stream fits budget"
                );
                return Ok(ArtifactPlan {
                    stream: stream.clone(),
                    part_count,
                    merged_path: merged,
                    merged_size_bytes: measured,
                });
            }
        }
        Err(FitError::NoSuitableStream {
            source_id: metadata.id.clone(),
            candidates: candidates.len(),
            max_parts: self.budget.max_parts,
        })
    }

    async fn merged_file(
        &self,
        metadata: &SourceMetadata,
        audio: &ResolvedAudio,
        stream: &StreamDescriptor,
        audio_tag: &str,
        workdir: &Path,
    ) -> FitResult<PathBuf> {
        let stem = format!(
            "{}.{}.{}",
            metadata.id,
            stream.height_label(),
            stream.codec_label()
        );
        let merged = workdir.join(format!("{stem}.{audio_tag}.mp4"));
        if file_size(&merged).await.map(|size| size > 0).unwrap_or(false) {
            return Ok(merged);
        }

        let video = workdir.join(format!("{stem}.video.{}", stream.container));
        download_once(self.catalog.as_ref(), stream, &video).await?;

        // an interrupted mux must not be mistaken for a finished one
        let staging = workdir.join(format!("{stem}.{audio_tag}.partial.mp4"));
        self.transcoder.mux(&video, &audio.path, &staging).await?;
        fs::rename(&staging, &merged)
            .await
            .map_err(|source| FitError::Io {
                path: merged.clone(),
                source,
            })?;
        Ok(merged)
    }
}

async fn file_size(path: &Path) -> FitResult<u64> {
    fs::metadata(path)
        .await
        .map(|meta| meta.len())
        .map_err(|source| FitError::Io {
            path: path.to_path_buf(),
            source,
        })
}
