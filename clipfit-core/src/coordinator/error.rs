use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::audio::AudioError;
use crate::catalog::CatalogError;
use crate::delivery::DeliveryError;
use crate::fitter::FitError;
use crate::media::SourceError;
use crate::splitter::SplitError;
use crate::store::StoreError;
use crate::transcoder::TranscodeError;

/// Failure of one production attempt.
#[derive(Debug, Error)]
pub enum ProductionError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Audio(#[from] AudioError),
    #[error(transparent)]
    Fit(#[from] FitError),
    #[error(transparent)]
    Split(#[from] SplitError),
    #[error(transparent)]
    Transcode(#[from] TranscodeError),
}

impl ProductionError {
    /// Deterministic outcomes of the input are not worth another attempt.
    pub fn is_transient(&self) -> bool {
        !matches!(
            self,
            ProductionError::Fit(FitError::NoSuitableStream { .. })
                | ProductionError::Split(SplitError::ArtifactTooLarge { .. })
                | ProductionError::Split(SplitError::TooManyParts { .. })
                | ProductionError::Split(SplitError::UnknownDuration { .. })
                | ProductionError::Audio(AudioError::NoAudioStream { .. })
                | ProductionError::Catalog(CatalogError::Source(_))
                | ProductionError::Catalog(CatalogError::NoDirectUrl { .. })
        )
    }
}

#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("invalid source: {0}")]
    InvalidSource(#[from] SourceError),
    #[error("lock {key} not acquired within {waited:?}")]
    LockTimeout { key: String, waited: Duration },
    #[error("no suitable stream: {reason}")]
    NoSuitableStream { reason: String },
    #[error("artifact too large: {reason}")]
    ArtifactTooLarge { reason: String },
    #[error("production failed after {attempts} attempt(s): {last_error}")]
    ProductionFailed {
        attempts: u32,
        #[source]
        last_error: Box<ProductionError>,
    },
    #[error("delivery failed: {0}")]
    Delivery(#[from] DeliveryError),
    #[error("cache unavailable: {0}")]
    Store(StoreError),
    #[error("could not prepare workspace {path}: {source}")]
    Workspace {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl From<StoreError> for AcquisitionError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::LockTimeout { key, waited } => AcquisitionError::LockTimeout { key, waited },
            other => AcquisitionError::Store(other),
        }
    }
}

impl AcquisitionError {
    pub(crate) fn from_production(attempts: u32, err: ProductionError) -> Self {
        match err {
            ProductionError::Fit(err @ FitError::NoSuitableStream { .. }) => {
                AcquisitionError::NoSuitableStream {
                    reason: err.to_string(),
                }
            }
            ProductionError::Audio(err @ AudioError::NoAudioStream { .. }) => {
                AcquisitionError::NoSuitableStream {
                    reason: err.to_string(),
                }
            }
            ProductionError::Split(
                err @ (SplitError::ArtifactTooLarge { .. } | SplitError::TooManyParts { .. }),
            ) => {
                AcquisitionError::ArtifactTooLarge {
                    reason: err.to_string(),
                }
            }
            other => AcquisitionError::ProductionFailed {
                attempts,
                last_error: Box::new(other),
            },
        }
    }

    /// Lock timeouts are left to the caller; everything else is announced.
    pub fn is_announced(&self) -> bool {
        !matches!(
            self,
            AcquisitionError::LockTimeout { .. } | AcquisitionError::InvalidSource(_)
        )
    }
}

pub type AcquisitionResult<T> = Result<T, AcquisitionError>;
