use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ClipfitConfig {
    pub paths: PathsSection,
    pub limits: LimitsSection,
    pub retry: RetrySection,
    pub lock: LockSection,
    pub transcoder: TranscoderSection,
    pub catalog: CatalogSection,
    pub detection: DetectionSection,
    pub translation: TranslationSection,
    pub store: StoreSection,
    pub liveness: LivenessSection,
}

impl ClipfitConfig {
    pub fn resolve_path<P: AsRef<Path>>(&self, candidate: P) -> PathBuf {
        let path = candidate.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.paths.base_dir).join(path)
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.limits.safety_margin > 0.0 && self.limits.safety_margin <= 1.0) {
            return Err(ConfigError::Invalid {
                field: "limits.safety_margin",
                reason: format!("{} is outside (0, 1]", self.limits.safety_margin),
            });
        }
        if self.limits.max_parts == 0 {
            return Err(ConfigError::Invalid {
                field: "limits.max_parts",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.limits.ceiling_bytes == 0 {
            return Err(ConfigError::Invalid {
                field: "limits.ceiling_bytes",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "retry.max_attempts",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.liveness.interval_seconds == 0 {
            return Err(ConfigError::Invalid {
                field: "liveness.interval_seconds",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsSection {
    pub base_dir: String,
    pub work_dir: String,
    pub outbox_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitsSection {
    pub ceiling_bytes: u64,
    pub safety_margin: f64,
    pub max_parts: usize,
    pub min_video_height: u32,
    pub max_concurrent_transcodes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrySection {
    pub max_attempts: u32,
    pub delay_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LockSection {
    pub hold_timeout_seconds: u64,
    pub wait_timeout_seconds: u64,
    pub poll_interval_ms: u64,
}

impl LockSection {
    pub fn hold_timeout(&self) -> Duration {
        Duration::from_secs(self.hold_timeout_seconds)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranscoderSection {
    pub ffmpeg: String,
    pub ffprobe: String,
    pub timeout_seconds: u64,
    pub log_level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogSection {
    pub yt_dlp: String,
    pub user_agent: String,
    pub describe_timeout_seconds: u64,
    pub video_containers: Vec<String>,
    pub video_codec_prefix: String,
    pub audio_containers: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectionSection {
    pub enabled: bool,
    pub program: String,
    pub args: Vec<String>,
    pub sample_seconds: u32,
    pub min_confidence: f64,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranslationSection {
    pub enabled: bool,
    pub program: String,
    pub timeout_seconds: u64,
    pub original_volume_db: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackendKind {
    Memory,
    Sqlite,
    Redis,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreSection {
    pub backend: StoreBackendKind,
    pub sqlite_path: String,
    pub redis_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LivenessSection {
    pub interval_seconds: u64,
}

pub fn load_clipfit_config<P: AsRef<Path>>(path: P) -> Result<ClipfitConfig> {
    let config: ClipfitConfig = load_toml(path)?;
    config.validate()?;
    Ok(config)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}
