use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::fs;

use crate::config::TranslationSection;
use crate::media::{SourceIdentifier, TargetLanguage};
use crate::process::{run_checked, CommandExecutor, ProcessError, SystemCommandExecutor};

/// Why a translated track could not be obtained. Never fatal to a request.
#[derive(Debug, Error)]
pub enum TranslationUnavailable {
    #[error("translator timed out after {0:?}")]
    TimedOut(Duration),
    #[error("translator exited with status {status:?}: {stderr}")]
    Exited { status: Option<i32>, stderr: String },
    #[error("translator reported success but {0} is missing")]
    MissingOutput(PathBuf),
    #[error("translator could not be started: {0}")]
    Spawn(String),
}

impl From<ProcessError> for TranslationUnavailable {
    fn from(err: ProcessError) -> Self {
        match err {
            ProcessError::TimedOut { limit, .. } => TranslationUnavailable::TimedOut(limit),
            ProcessError::Exited { status, stderr, .. } => {
                TranslationUnavailable::Exited { status, stderr }
            }
            ProcessError::Spawn { source, .. } => TranslationUnavailable::Spawn(source.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TranslationRequest<'a> {
    pub source: &'a SourceIdentifier,
    pub url: &'a str,
    pub target: TargetLanguage,
    pub output_dir: &'a Path,
}

impl TranslationRequest<'_> {
    /// Where the translator is told to write its track.
    pub fn output_path(&self) -> PathBuf {
        self.output_dir.join(format!(
            "{}.translated.{}.mp3",
            self.source, self.target
        ))
    }
}

#[async_trait]
pub trait Translator: Send + Sync {
    /// Produces a dubbed voice track for the request and returns its path.
    async fn translate(
        &self,
        request: &TranslationRequest<'_>,
    ) -> Result<PathBuf, TranslationUnavailable>;
}

pub struct VotCliTranslator {
    program: PathBuf,
    timeout: Duration,
    executor: Arc<dyn CommandExecutor>,
}

impl VotCliTranslator {
    pub fn new(config: &TranslationSection) -> Self {
        Self {
            program: PathBuf::from(&config.program),
            timeout: Duration::from_secs(config.timeout_seconds),
            executor: Arc::new(SystemCommandExecutor),
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = executor;
        self
    }

    fn build_args(request: &TranslationRequest<'_>, output: &Path) -> Vec<String> {
        let file_name = output
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        vec![
            format!("--output={}", request.output_dir.display()),
            format!("--output-file={file_name}"),
            format!("--reslang={}", request.target),
            request.url.to_string(),
        ]
    }
}

#[async_trait]
impl Translator for VotCliTranslator {
    async fn translate(
        &self,
        request: &TranslationRequest<'_>,
    ) -> Result<PathBuf, TranslationUnavailable> {
        let output = request.output_path();
        let args = Self::build_args(request, &output);
        run_checked(self.executor.as_ref(), &self.program, &args, self.timeout).await?;
        match fs::metadata(&output).await {
            Ok(meta) if meta.is_file() && meta.len() > 0 => Ok(output),
            _ => Err(TranslationUnavailable::MissingOutput(output)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::testing::RecordingExecutor;

    fn config() -> TranslationSection {
        TranslationSection {
            enabled: true,
            program: "vot-cli".into(),
            timeout_seconds: 120,
            original_volume_db: -10.0,
        }
    }

    #[tokio::test]
    async fn missing_output_after_clean_exit() {
        let dir = tempfile::tempdir().unwrap();
        let id = SourceIdentifier::from_url("https://youtu.be/abc").unwrap();
        let request = TranslationRequest {
            source: &id,
            url: "https://youtu.be/abc",
            target: TargetLanguage::Ru,
            output_dir: dir.path(),
        };
        let (executor, calls) = RecordingExecutor::succeeding(Vec::new());
        let translator = VotCliTranslator::new(&config()).with_executor(executor);
        let err = translator.translate(&request).await.unwrap_err();
        assert!(matches!(err, TranslationUnavailable::MissingOutput(_)));

        let args = &calls.lock().unwrap()[0].1;
        assert_eq!(args[1], "--output-file=abc.translated.ru.mp3");
        assert_eq!(args[2], "--reslang=ru");
        assert_eq!(args[3], "https://youtu.be/abc");
    }

    #[tokio::test]
    async fn existing_output_is_returned() {
        let dir = tempfile::tempdir().unwrap();
        let id = SourceIdentifier::from_url("https://youtu.be/abc").unwrap();
        let request = TranslationRequest {
            source: &id,
            url: "https://youtu.be/abc",
            target: TargetLanguage::En,
            output_dir: dir.path(),
        };
        std::fs::write(request.output_path(), b"mp3").unwrap();
        let (executor, _) = RecordingExecutor::succeeding(Vec::new());
        let translator = VotCliTranslator::new(&config()).with_executor(executor);
        let path = translator.translate(&request).await.unwrap();
        assert!(path.ends_with("abc.translated.en.mp3"));
    }

    #[test]
    fn process_failures_map_onto_reasons() {
        let timed_out = ProcessError::TimedOut {
            program: "vot-cli".into(),
            limit: Duration::from_secs(120),
        };
        assert!(matches!(
            TranslationUnavailable::from(timed_out),
            TranslationUnavailable::TimedOut(_)
        ));
        let exited = ProcessError::Exited {
            program: "vot-cli".into(),
            status: Some(2),
            stderr: "rate limited".into(),
        };
        assert!(matches!(
            TranslationUnavailable::from(exited),
            TranslationUnavailable::Exited { status: Some(2), .. }
        ));
    }
}
