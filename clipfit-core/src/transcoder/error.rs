use std::path::PathBuf;

use thiserror::Error;

use crate::process::ProcessError;

#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("could not read probe output for {path}: {reason}")]
    Probe { path: PathBuf, reason: String },
    #[error("segmenting {0} produced no parts")]
    NoSegments(PathBuf),
    #[error("transcoder is shutting down")]
    Unavailable,
}

pub type TranscodeResult<T> = Result<T, TranscodeError>;
