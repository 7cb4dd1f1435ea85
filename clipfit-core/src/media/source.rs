use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use url::Url;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SourceError {
    #[error("not a valid url: {0}")]
    InvalidUrl(String),
    #[error("unsupported url scheme {scheme} in {url}")]
    UnsupportedScheme { scheme: String, url: String },
}

/// Stable id of a remote video, derived from its URL.
///
/// YouTube links of any shape (`watch?v=`, `youtu.be`, `shorts`, `embed`)
/// collapse to the bare video id so every spelling of the same video shares
/// one cache entry. Other hosts fall back to a truncated SHA-256 of the URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceIdentifier(String);

impl SourceIdentifier {
    pub fn from_url(raw: &str) -> Result<Self, SourceError> {
        let trimmed = raw.trim();
        let url = Url::parse(trimmed).map_err(|_| SourceError::InvalidUrl(trimmed.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(SourceError::UnsupportedScheme {
                scheme: url.scheme().to_string(),
                url: trimmed.to_string(),
            });
        }
        if let Some(id) = youtube_video_id(&url) {
            return Ok(Self(id));
        }
        let digest = Sha256::digest(url.as_str().as_bytes());
        let hex = hex::encode(digest);
        Ok(Self(format!("url-{}", &hex[..16])))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn is_youtube_host(host: &str) -> bool {
    let host = host.to_ascii_lowercase();
    host == "youtube.com" || host == "youtu.be" || host.ends_with(".youtube.com")
}

pub fn youtube_video_id(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    if !is_youtube_host(host) {
        return None;
    }

    let mut segments = url.path_segments()?;
    let first = segments.next().unwrap_or("").trim();

    if host.eq_ignore_ascii_case("youtu.be") {
        return non_empty(first);
    }

    if first == "watch" {
        return url
            .query_pairs()
            .find(|(key, _)| key == "v")
            .and_then(|(_, value)| non_empty(value.trim()));
    }

    if matches!(first, "shorts" | "embed" | "live") {
        return segments.next().and_then(|id| non_empty(id.trim()));
    }

    None
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}
