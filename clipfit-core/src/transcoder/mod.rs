mod error;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::fs;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::config::TranscoderSection;
use crate::process::{run_checked, CommandExecutor, SystemCommandExecutor};

pub use error::{TranscodeError, TranscodeResult};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeReport {
    pub width: u32,
    pub height: u32,
    pub duration_secs: Option<f64>,
}

#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn probe(&self, path: &Path) -> TranscodeResult<ProbeReport>;

    async fn mux(&self, video: &Path, audio: &Path, output: &Path) -> TranscodeResult<()>;

    async fn segment(
        &self,
        input: &Path,
        output_dir: &Path,
        segment_seconds: u64,
    ) -> TranscodeResult<Vec<PathBuf>>;

    async fn extract_sample(&self, input: &Path, output: &Path, seconds: u32)
        -> TranscodeResult<()>;

    async fn mix(
        &self,
        original: &Path,
        overlay: &Path,
        output: &Path,
        original_volume_db: f64,
    ) -> TranscodeResult<()>;
}

pub struct FfmpegTranscoder {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    log_level: String,
    timeout: Duration,
    permits: Arc<Semaphore>,
    executor: Arc<dyn CommandExecutor>,
}

impl std::fmt::Debug for FfmpegTranscoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FfmpegTranscoder")
            .field("ffmpeg", &self.ffmpeg)
            .field("ffprobe", &self.ffprobe)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl FfmpegTranscoder {
    pub fn new(config: &TranscoderSection, max_concurrent: usize) -> Self {
        Self {
            ffmpeg: PathBuf::from(&config.ffmpeg),
            ffprobe: PathBuf::from(&config.ffprobe),
            log_level: config.log_level.clone(),
            timeout: Duration::from_secs(config.timeout_seconds),
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            executor: Arc::new(SystemCommandExecutor),
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = executor;
        self
    }

    fn base_args(&self) -> Vec<String> {
        vec![
            "-hide_banner".to_string(),
            "-nostdin".to_string(),
            "-loglevel".to_string(),
            self.log_level.clone(),
            "-y".to_string(),
        ]
    }

    fn mux_args(&self, video: &Path, audio: &Path, output: &Path) -> Vec<String> {
        let mut args = self.base_args();
        args.extend([
            "-i".to_string(),
            path_arg(video),
            "-i".to_string(),
            path_arg(audio),
            "-map".to_string(),
            "0:v:0".to_string(),
            "-map".to_string(),
            "1:a:0".to_string(),
            "-c".to_string(),
            "copy".to_string(),
            "-movflags".to_string(),
            "+faststart".to_string(),
            path_arg(output),
        ]);
        args
    }

    fn segment_args(&self, input: &Path, pattern: &Path, segment_seconds: u64) -> Vec<String> {
        let mut args = self.base_args();
        args.extend([
            "-i".to_string(),
            path_arg(input),
            "-map".to_string(),
            "0".to_string(),
            "-c".to_string(),
            "copy".to_string(),
            "-f".to_string(),
            "segment".to_string(),
            "-segment_time".to_string(),
            segment_seconds.to_string(),
            "-reset_timestamps".to_string(),
            "1".to_string(),
            path_arg(pattern),
        ]);
        args
    }

    fn sample_args(&self, input: &Path, output: &Path, seconds: u32) -> Vec<String> {
        let mut args = self.base_args();
        args.extend([
            "-i".to_string(),
            path_arg(input),
            "-t".to_string(),
            seconds.to_string(),
            "-vn".to_string(),
            "-ac".to_string(),
            "1".to_string(),
            "-ar".to_string(),
            "16000".to_string(),
            "-f".to_string(),
            "wav".to_string(),
            path_arg(output),
        ]);
        args
    }

    fn mix_args(
        &self,
        original: &Path,
        overlay: &Path,
        output: &Path,
        original_volume_db: f64,
    ) -> Vec<String> {
        let filter = format!(
            "[0:a]volume={original_volume_db:.1}dB[orig];\
             [orig][1:a]amix=inputs=2:duration=longest:dropout_transition=0:normalize=0[aout]"
        );
        let mut args = self.base_args();
        args.extend([
            "-i".to_string(),
            path_arg(original),
            "-i".to_string(),
            path_arg(overlay),
            "-filter_complex".to_string(),
            filter,
            "-map".to_string(),
            "[aout]".to_string(),
            "-c:a".to_string(),
            "aac".to_string(),
            "-b:a".to_string(),
            "192k".to_string(),
            path_arg(output),
        ]);
        args
    }

    fn probe_args(path: &Path) -> Vec<String> {
        vec![
            "-v".to_string(),
            "error".to_string(),
            "-select_streams".to_string(),
            "v:0".to_string(),
            "-show_entries".to_string(),
            "stream=width,height:format=duration".to_string(),
            "-of".to_string(),
            "json".to_string(),
            path_arg(path),
        ]
    }

    async fn run_ffmpeg(&self, args: &[String]) -> TranscodeResult<()> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| TranscodeError::Unavailable)?;
        run_checked(self.executor.as_ref(), &self.ffmpeg, args, self.timeout).await?;
        Ok(())
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn probe(&self, path: &Path) -> TranscodeResult<ProbeReport> {
        let args = Self::probe_args(path);
        let output = run_checked(self.executor.as_ref(), &self.ffprobe, &args, self.timeout).await?;
        parse_probe(path, &output.stdout)
    }

    async fn mux(&self, video: &Path, audio: &Path, output: &Path) -> TranscodeResult<()> {
        debug!(video = %video.display(), audio = %audio.display(), "muxing streams");
        self.run_ffmpeg(&self.mux_args(video, audio, output)).await
    }

    async fn segment(
        &self,
        input: &Path,
        output_dir: &Path,
        segment_seconds: u64,
    ) -> TranscodeResult<Vec<PathBuf>> {
        let stem = file_stem(input);
        let extension = input
            .extension()
            .map(|ext| ext.to_string_lossy().to_string())
            .unwrap_or_else(|| "mp4".to_string());
        let pattern = output_dir.join(format!("{stem}_part_%03d.{extension}"));
        self.run_ffmpeg(&self.segment_args(input, &pattern, segment_seconds.max(1)))
            .await?;
        let parts = list_parts(output_dir, &format!("{stem}_part_"), &extension).await?;
        if parts.is_empty() {
            return Err(TranscodeError::NoSegments(input.to_path_buf()));
        }
        Ok(parts)
    }

    async fn extract_sample(
        &self,
        input: &Path,
        output: &Path,
        seconds: u32,
    ) -> TranscodeResult<()> {
        self.run_ffmpeg(&self.sample_args(input, output, seconds))
            .await
    }

    async fn mix(
        &self,
        original: &Path,
        overlay: &Path,
        output: &Path,
        original_volume_db: f64,
    ) -> TranscodeResult<()> {
        self.run_ffmpeg(&self.mix_args(original, overlay, output, original_volume_db))
            .await
    }
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

fn parse_probe(path: &Path, stdout: &[u8]) -> TranscodeResult<ProbeReport> {
    let parsed: FfprobeOutput =
        serde_json::from_slice(stdout).map_err(|err| TranscodeError::Probe {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;
    let stream = parsed
        .streams
        .iter()
        .find(|stream| stream.width.is_some() && stream.height.is_some())
        .ok_or_else(|| TranscodeError::Probe {
            path: path.to_path_buf(),
            reason: "no video stream with dimensions".to_string(),
        })?;
    let duration_secs = parsed
        .format
        .and_then(|format| format.duration)
        .and_then(|raw| raw.parse::<f64>().ok());
    Ok(ProbeReport {
        width: stream.width.unwrap_or_default(),
        height: stream.height.unwrap_or_default(),
        duration_secs,
    })
}

pub async fn list_parts(dir: &Path, prefix: &str, extension: &str) -> TranscodeResult<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir).await.map_err(|source| TranscodeError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let suffix = format!(".{extension}");
    let mut parts = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|source| TranscodeError::Io {
            path: dir.to_path_buf(),
            source,
        })?
    {
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with(prefix) && name.ends_with(&suffix) {
            parts.push(entry.path());
        }
    }
    parts.sort();
    Ok(parts)
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| "media".to_string())
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().to_string()
}
