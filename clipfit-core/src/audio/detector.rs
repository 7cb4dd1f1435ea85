use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::config::DetectionSection;
use crate::process::{run_checked, CommandExecutor, ProcessError, SystemCommandExecutor};

#[derive(Debug, Error)]
pub enum DetectionError {
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error("unreadable detector output: {0}")]
    Output(String),
}

/// Raw answer of a spoken-language detector.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DetectorVerdict {
    pub language: String,
    pub probability: f64,
}

#[async_trait]
pub trait LanguageDetector: Send + Sync {
    async fn detect(&self, sample: &Path) -> Result<DetectorVerdict, DetectionError>;
}

/// Runs a local inference command on a decoded WAV sample. The command must
/// print `{"language": "<code>", "probability": <0..1>}` on stdout.
///
/// `{input}` inside the configured arguments is replaced with the sample
/// path; without a placeholder the path is appended.
pub struct CommandLanguageDetector {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
    executor: Arc<dyn CommandExecutor>,
}

impl CommandLanguageDetector {
    pub fn new(config: &DetectionSection) -> Self {
        Self {
            program: PathBuf::from(&config.program),
            args: config.args.clone(),
            timeout: Duration::from_secs(config.timeout_seconds),
            executor: Arc::new(SystemCommandExecutor),
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = executor;
        self
    }

    fn build_args(&self, sample: &Path) -> Vec<String> {
        let input = sample.to_string_lossy();
        let mut replaced = false;
        let mut args: Vec<String> = self
            .args
            .iter()
            .map(|arg| {
                if arg.contains("{input}") {
                    replaced = true;
                    arg.replace("{input}", &input)
                } else {
                    arg.clone()
                }
            })
            .collect();
        if !replaced {
            args.push(input.to_string());
        }
        args
    }
}

#[async_trait]
impl LanguageDetector for CommandLanguageDetector {
    async fn detect(&self, sample: &Path) -> Result<DetectorVerdict, DetectionError> {
        let args = self.build_args(sample);
        let output = run_checked(self.executor.as_ref(), &self.program, &args, self.timeout).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        // some models print progress before the verdict
        let line = stdout
            .lines()
            .rev()
            .find(|line| line.trim_start().starts_with('{'))
            .ok_or_else(|| DetectionError::Output(stdout.trim().to_string()))?;
        serde_json::from_str(line.trim()).map_err(|err| DetectionError::Output(err.to_string()))
    }
}
