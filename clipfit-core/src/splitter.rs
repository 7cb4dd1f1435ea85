use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::fitter::SizeBudget;
use crate::media::ArtifactPlan;
use crate::transcoder::{TranscodeError, Transcoder};

#[derive(Debug, Error)]
pub enum SplitError {
    #[error("{path} still has a part over {ceiling_bytes} bytes at {max_parts} parts")]
    ArtifactTooLarge {
        path: PathBuf,
        ceiling_bytes: u64,
        max_parts: usize,
    },
    #[error("{path} was cut into {produced} parts, more than {max_parts}")]
    TooManyParts {
        path: PathBuf,
        produced: usize,
        max_parts: usize,
    },
    #[error("{path} has no known duration to segment by")]
    UnknownDuration { path: PathBuf },
    #[error(transparent)]
    Transcode(#[from] TranscodeError),
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
}

pub type SplitResult<T> = Result<T, SplitError>;

#[derive(Debug, Clone, PartialEq)]
pub struct SplitOutcome {
    pub parts: Vec<PathBuf>,
    pub part_count: usize,
    pub escalations: usize,
}

pub struct Splitter {
    transcoder: Arc<dyn Transcoder>,
    budget: SizeBudget,
}

impl Splitter {
    pub fn new(transcoder: Arc<dyn Transcoder>, budget: SizeBudget) -> Self {
        Self { transcoder, budget }
    }

    pub async fn split_and_verify(
        &self,
        plan: &ArtifactPlan,
        duration_secs: u64,
        output_dir: &Path,
    ) -> SplitResult<SplitOutcome> {
        let ceiling = self.budget.ceiling_bytes;
        let mut part_count = plan.part_count.max(1);
        let mut escalations = 0;

        while part_count <= self.budget.max_parts {
            if part_count == 1 {
                let size = file_size(&plan.merged_path).await?;
                if size <= ceiling {
                    debug!(path = %plan.merged_path.display(), size, "single part within ceiling");
                    return Ok(SplitOutcome {
                        parts: vec![plan.merged_path.clone()],
                        part_count,
                        escalations,
                    });
                }
                warn!(path = %plan.merged_path.display(), size, ceiling, "merged file over ceiling");
            } else {
                if duration_secs == 0 {
                    return Err(SplitError::UnknownDuration {
                        path: plan.merged_path.clone(),
                    });
                }
                let round_dir = output_dir.join(format!("{part_count}-parts"));
                reset_dir(&round_dir).await?;
                let segment_seconds = segment_length(duration_secs, part_count);
                let parts = self
                    .transcoder
                    .segment(&plan.merged_path, &round_dir, segment_seconds)
                    .await?;
                // more parts only shortens the slices, so this cannot be escalated away
                if parts.len() > self.budget.max_parts {
                    warn!(
                        path = %plan.merged_path.display(),
                        produced = parts.len(),
                        max_parts = self.budget.max_parts,
                        "segmentation produced too many parts"
                    );
                    discard_round(&round_dir).await;
                    return Err(SplitError::TooManyParts {
                        path: plan.merged_path.clone(),
                        produced: parts.len(),
                        max_parts: self.budget.max_parts,
                    });
                }
                match first_oversized(&parts, ceiling).await? {
                    None => {
                        info!(
                            path = %plan.merged_path.display(),
                            requested = part_count,
                            produced = parts.len(),
                            escalations,
                            "split verified"
                        );
                        return Ok(SplitOutcome {
                            parts,
                            part_count,
                            escalations,
                        });
                    }
                    Some((part, size)) => {
                        warn!(part = %part.display(), size, ceiling, part_count, "segment over ceiling, discarding split");
                        discard_round(&round_dir).await;
                    }
                }
            }
            part_count += 1;
            escalations += 1;
        }

        Err(SplitError::ArtifactTooLarge {
            path: plan.merged_path.clone(),
            ceiling_bytes: ceiling,
            max_parts: self.budget.max_parts,
        })
    }
}

pub fn segment_length(duration_secs: u64, part_count: usize) -> u64 {
    let parts = part_count.max(1) as u64;
    duration_secs.div_ceil(parts).max(1)
}

async fn first_oversized(parts: &[PathBuf], ceiling: u64) -> SplitResult<Option<(PathBuf, u64)>> {
    for part in parts {
        let size = file_size(part).await?;
        if size > ceiling {
            return Ok(Some((part.clone(), size)));
        }
    }
    Ok(None)
}

async fn discard_round(dir: &Path) {
    if let Err(err) = fs::remove_dir_all(dir).await {
        warn!(path = %dir.display(), error = %err, "failed to discard split");
    }
}

async fn reset_dir(dir: &Path) -> SplitResult<()> {
    if fs::metadata(dir).await.is_ok() {
        fs::remove_dir_all(dir)
            .await
            .map_err(|source| SplitError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
    }
    fs::create_dir_all(dir)
        .await
        .map_err(|source| SplitError::Io {
            path: dir.to_path_buf(),
            source,
        })
}

async fn file_size(path: &Path) -> SplitResult<u64> {
    fs::metadata(path)
        .await
        .map(|meta| meta.len())
        .map_err(|source| SplitError::Io {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_length_rounds_up() {
        assert_eq!(segment_length(600, 2), 300);
        assert_eq!(segment_length(601, 2), 301);
        assert_eq!(segment_length(10, 3), 4);
        assert_eq!(segment_length(0, 4), 1);
    }
}
