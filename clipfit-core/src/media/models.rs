use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::language::{LanguageDetection, TargetLanguage};
use super::source::SourceIdentifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixels(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// One selectable encoding of a source as advertised by the catalog.
///
/// `declared_size_bytes` is advisory; variable-bitrate sources routinely
/// under- or overstate it by several percent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub format_id: String,
    pub kind: StreamKind,
    pub container: String,
    pub codec: String,
    pub resolution: Option<Resolution>,
    pub declared_size_bytes: Option<u64>,
    pub bitrate_kbps: Option<f64>,
    pub url: Option<String>,
}

impl StreamDescriptor {
    pub fn nominal_size(&self, duration_secs: u64) -> Option<u64> {
        self.declared_size_bytes.or_else(|| {
            self.bitrate_kbps
                .filter(|kbps| *kbps > 0.0)
                .map(|kbps| (kbps * 1000.0 / 8.0 * duration_secs as f64).round() as u64)
        })
    }

    pub fn height_label(&self) -> String {
        self.resolution
            .map(|res| format!("{}p", res.height))
            .unwrap_or_else(|| "audio".to_string())
    }

    pub fn codec_label(&self) -> String {
        self.codec
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' { c } else { '_' })
            .collect()
    }
}

impl fmt::Display for StreamDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}/{} {}",
            self.format_id,
            self.container,
            self.codec,
            self.height_label()
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceMetadata {
    pub id: SourceIdentifier,
    pub url: String,
    pub title: Option<String>,
    pub duration_secs: u64,
    pub streams: Vec<StreamDescriptor>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactPlan {
    pub stream: StreamDescriptor,
    pub part_count: usize,
    pub merged_path: PathBuf,
    pub merged_size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartHandle(pub String);

impl PartHandle {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PartHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct ProducedMedia {
    pub source: SourceIdentifier,
    pub url: String,
    pub title: Option<String>,
    pub target: TargetLanguage,
    pub parts: Vec<PathBuf>,
    pub width: u32,
    pub height: u32,
    pub detection: LanguageDetection,
    pub translated_to: Option<TargetLanguage>,
    pub stream: StreamDescriptor,
}

impl ProducedMedia {
    pub fn audio_label(&self) -> String {
        audio_label(self.translated_to, &self.detection, self.target)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaArtifact {
    pub source: SourceIdentifier,
    pub url: String,
    pub title: Option<String>,
    pub target: TargetLanguage,
    pub parts: Vec<PartHandle>,
    pub width: u32,
    pub height: u32,
    pub detection: LanguageDetection,
    pub translated_to: Option<TargetLanguage>,
    pub produced_at: DateTime<Utc>,
}

impl MediaArtifact {
    pub fn from_produced(produced: &ProducedMedia, parts: Vec<PartHandle>) -> Self {
        Self {
            source: produced.source.clone(),
            url: produced.url.clone(),
            title: produced.title.clone(),
            target: produced.target,
            parts,
            width: produced.width,
            height: produced.height,
            detection: produced.detection.clone(),
            translated_to: produced.translated_to,
            produced_at: Utc::now(),
        }
    }

    pub fn audio_label(&self) -> String {
        audio_label(self.translated_to, &self.detection, self.target)
    }
}

fn audio_label(
    translated_to: Option<TargetLanguage>,
    detection: &LanguageDetection,
    target: TargetLanguage,
) -> String {
    if let Some(translated) = translated_to {
        return translated.to_string();
    }
    if let Some(language) = detection.language() {
        return language.to_string();
    }
    target.to_string()
}

pub fn caption(title: Option<&str>, audio_label: &str, url: &str) -> String {
    format!(
        "{} [{} audio]\n\n{}",
        title.unwrap_or("video"),
        audio_label,
        url
    )
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompositeKey {
    pub source: SourceIdentifier,
    pub target: TargetLanguage,
}

impl CompositeKey {
    pub fn new(source: SourceIdentifier, target: TargetLanguage) -> Self {
        Self { source, target }
    }

    pub fn cache_key(&self) -> String {
        format!("clip:{}:{}", self.source, self.target)
    }

    pub fn lock_key(&self) -> String {
        format!("clip-lock:{}:{}", self.source, self.target)
    }
}

impl fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.target)
    }
}
