mod detector;
mod translator;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::catalog::{download_once, select_best_audio, CatalogError, StreamCatalog};
use crate::config::{CatalogSection, DetectionSection, TranslationSection};
use crate::media::{
    classify_detection, LanguageDetection, SourceIdentifier, SourceMetadata, TargetLanguage,
};
use crate::transcoder::Transcoder;

pub use detector::{CommandLanguageDetector, DetectionError, DetectorVerdict, LanguageDetector};
pub use translator::{TranslationRequest, TranslationUnavailable, Translator, VotCliTranslator};

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("source {source_id} offers no usable audio-only stream")]
    NoAudioStream { source_id: SourceIdentifier },
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
}

pub type AudioResult<T> = Result<T, AudioError>;

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedAudio {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub detection: LanguageDetection,
    pub translated_to: Option<TargetLanguage>,
}

#[derive(Debug, Clone)]
pub struct AudioSettings {
    pub audio_containers: Vec<String>,
    pub sample_seconds: u32,
    pub min_confidence: f64,
    pub original_volume_db: f64,
}

impl AudioSettings {
    pub fn from_config(
        catalog: &CatalogSection,
        detection: &DetectionSection,
        translation: &TranslationSection,
    ) -> Self {
        Self {
            audio_containers: catalog.audio_containers.clone(),
            sample_seconds: detection.sample_seconds,
            min_confidence: detection.min_confidence,
            original_volume_db: translation.original_volume_db,
        }
    }
}

pub struct AudioTrackResolver {
    catalog: Arc<dyn StreamCatalog>,
    transcoder: Arc<dyn Transcoder>,
    detector: Option<Arc<dyn LanguageDetector>>,
    translator: Option<Arc<dyn Translator>>,
    settings: AudioSettings,
}

impl AudioTrackResolver {
    pub fn new(
        catalog: Arc<dyn StreamCatalog>,
        transcoder: Arc<dyn Transcoder>,
        settings: AudioSettings,
    ) -> Self {
        Self {
            catalog,
            transcoder,
            detector: None,
            translator: None,
            settings,
        }
    }

    pub fn with_detector(mut self, detector: Arc<dyn LanguageDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn with_translator(mut self, translator: Arc<dyn Translator>) -> Self {
        self.translator = Some(translator);
        self
    }

    pub async fn resolve(
        &self,
        metadata: &SourceMetadata,
        target: TargetLanguage,
        workdir: &Path,
    ) -> AudioResult<ResolvedAudio> {
        let stream = select_best_audio(&metadata.streams, &self.settings.audio_containers)
            .ok_or_else(|| AudioError::NoAudioStream {
                source_id: metadata.id.clone(),
            })?;
        let original = workdir.join(format!("{}.audio.{}", metadata.id, stream.container));
        download_once(self.catalog.as_ref(), &stream, &original).await?;
        let original_size = file_size(&original).await?;
        debug!(source = %metadata.id, format = %stream, bytes = original_size, "audio track ready");

        let untouched = |detection: LanguageDetection| ResolvedAudio {
            path: original.clone(),
            size_bytes: original_size,
            detection,
            translated_to: None,
        };

        if !target.wants_translation() {
            return Ok(untouched(LanguageDetection::NotRun));
        }

        let detection = self.detect(&metadata.id, &original, workdir).await;
        let spoken = match &detection {
            LanguageDetection::Detected { language, .. } => *language,
            other => {
                info!(source = %metadata.id, detection = other.label(), "keeping original audio");
                return Ok(untouched(detection));
            }
        };
        if target.matches(spoken) {
            debug!(source = %metadata.id, language = %spoken, "audio already in target language");
            return Ok(untouched(detection));
        }
        let Some(translator) = self.translator.as_ref() else {
            return Ok(untouched(detection));
        };

        let mixed = workdir.join(format!("{}.translated.{}.mixed.m4a", metadata.id, target));
        if let Ok(size) = file_size(&mixed).await {
            if size > 0 {
                return Ok(ResolvedAudio {
                    path: mixed,
                    size_bytes: size,
                    detection,
                    translated_to: Some(target),
                });
            }
        }

        let request = TranslationRequest {
            source: &metadata.id,
            url: &metadata.url,
            target,
            output_dir: workdir,
        };
        let dub = match translator.translate(&request).await {
            Ok(path) => path,
            Err(reason) => {
                warn!(source = %metadata.id, target = %target, error = %reason, "translation unavailable, using original audio");
                return Ok(untouched(detection));
            }
        };
        // only a finished mix may sit under the reusable name
        let staging = workdir.join(format!("{}.translated.{}.partial.m4a", metadata.id, target));
        if let Err(err) = self
            .transcoder
            .mix(&original, &dub, &staging, self.settings.original_volume_db)
            .await
        {
            warn!(source = %metadata.id, target = %target, error = %err, "mixing translated audio failed, using original audio");
            if let Err(err) = fs::remove_file(&staging).await {
                debug!(path = %staging.display(), error = %err, "no partial mix to remove");
            }
            return Ok(untouched(detection));
        }
        fs::rename(&staging, &mixed)
            .await
            .map_err(|source| AudioError::Io {
                path: mixed.clone(),
                source,
            })?;
        let size_bytes = file_size(&mixed).await?;
        info!(source = %metadata.id, from = %spoken, to = %target, bytes = size_bytes, "using translated audio");
        Ok(ResolvedAudio {
            path: mixed,
            size_bytes,
            detection,
            translated_to: Some(target),
        })
    }

    async fn detect(
        &self,
        source: &SourceIdentifier,
        track: &Path,
        workdir: &Path,
    ) -> LanguageDetection {
        let Some(detector) = self.detector.as_ref() else {
            return LanguageDetection::NotRun;
        };
        let sample = workdir.join(format!("{source}.sample.wav"));
        if let Err(err) = self
            .transcoder
            .extract_sample(track, &sample, self.settings.sample_seconds)
            .await
        {
            warn!(source = %source, error = %err, "could not decode audio sample for detection");
            return LanguageDetection::NotRun;
        }
        match detector.detect(&sample).await {
            Ok(verdict) => {
                let detection = classify_detection(
                    &verdict.language,
                    verdict.probability,
                    self.settings.min_confidence,
                );
                debug!(source = %source, code = %verdict.language, probability = verdict.probability, state = detection.label(), "language detected");
                detection
            }
            Err(err) => {
                warn!(source = %source, error = %err, "language detection failed");
                LanguageDetection::NotRun
            }
        }
    }
}

async fn file_size(path: &Path) -> AudioResult<u64> {
    fs::metadata(path)
        .await
        .map(|meta| meta.len())
        .map_err(|source| AudioError::Io {
            path: path.to_path_buf(),
            source,
        })
}
