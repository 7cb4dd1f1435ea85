mod error;
mod retry;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::audio::{AudioSettings, AudioTrackResolver, LanguageDetector, Translator};
use crate::catalog::{select_video_candidates, StreamCatalog, VideoPolicy};
use crate::config::ClipfitConfig;
use crate::delivery::{DeliveryChannel, DeliveryError};
use crate::events::{AcquisitionEvent, EventSink};
use crate::fitter::{SizeBudget, StreamFitter};
use crate::liveness::{ActivitySink, LivenessRegistry};
use crate::media::{
    caption, CompositeKey, MediaArtifact, ProducedMedia, SourceIdentifier, TargetLanguage,
};
use crate::splitter::Splitter;
use crate::store::{ArtifactCache, LockCacheBackend};
use crate::transcoder::Transcoder;
use crate::workspace::Workspace;

pub use error::{AcquisitionError, AcquisitionResult, ProductionError};
pub use retry::{RetryFailure, RetryPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionState {
    Idle,
    LockWait,
    CacheCheck,
    CacheHit,
    Producing,
    Persisting,
    Done,
    Failed,
}

impl fmt::Display for AcquisitionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AcquisitionState::Idle => "idle",
            AcquisitionState::LockWait => "lock_wait",
            AcquisitionState::CacheCheck => "cache_check",
            AcquisitionState::CacheHit => "cache_hit",
            AcquisitionState::Producing => "producing",
            AcquisitionState::Persisting => "persisting",
            AcquisitionState::Done => "done",
            AcquisitionState::Failed => "failed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquisitionRequest {
    pub url: String,
    pub target: TargetLanguage,
    pub destination: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionOutcome {
    pub key: CompositeKey,
    pub artifact: MediaArtifact,
    pub fresh: bool,
}

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub budget: SizeBudget,
    pub retry: RetryPolicy,
    pub lock_hold: Duration,
    pub lock_wait: Duration,
    pub lock_poll: Duration,
    pub work_root: PathBuf,
    pub video_policy: VideoPolicy,
    pub audio: AudioSettings,
    pub liveness_period: Duration,
}

impl CoordinatorSettings {
    pub fn from_config(config: &ClipfitConfig) -> Self {
        Self {
            budget: SizeBudget::from_limits(&config.limits),
            retry: RetryPolicy::from_config(&config.retry),
            lock_hold: config.lock.hold_timeout(),
            lock_wait: config.lock.wait_timeout(),
            lock_poll: config.lock.poll_interval(),
            work_root: config.resolve_path(&config.paths.work_dir),
            video_policy: VideoPolicy {
                containers: config.catalog.video_containers.clone(),
                codec_prefix: config.catalog.video_codec_prefix.clone(),
                min_height: config.limits.min_video_height,
            },
            audio: AudioSettings::from_config(
                &config.catalog,
                &config.detection,
                &config.translation,
            ),
            liveness_period: Duration::from_secs(config.liveness.interval_seconds),
        }
    }
}

pub struct Collaborators {
    pub catalog: Arc<dyn StreamCatalog>,
    pub transcoder: Arc<dyn Transcoder>,
    pub detector: Option<Arc<dyn LanguageDetector>>,
    pub translator: Option<Arc<dyn Translator>>,
    pub backend: Arc<dyn LockCacheBackend>,
    pub delivery: Arc<dyn DeliveryChannel>,
    pub events: Arc<dyn EventSink>,
    pub activity: Arc<dyn ActivitySink>,
}

pub struct AcquisitionCoordinator {
    catalog: Arc<dyn StreamCatalog>,
    transcoder: Arc<dyn Transcoder>,
    resolver: AudioTrackResolver,
    fitter: StreamFitter,
    splitter: Splitter,
    cache: ArtifactCache,
    delivery: Arc<dyn DeliveryChannel>,
    events: Arc<dyn EventSink>,
    activity: Arc<dyn ActivitySink>,
    liveness: LivenessRegistry,
    settings: CoordinatorSettings,
}

impl AcquisitionCoordinator {
    pub fn new(collaborators: Collaborators, settings: CoordinatorSettings) -> Self {
        let Collaborators {
            catalog,
            transcoder,
            detector,
            translator,
            backend,
            delivery,
            events,
            activity,
        } = collaborators;

        let mut resolver = AudioTrackResolver::new(
            Arc::clone(&catalog),
            Arc::clone(&transcoder),
            settings.audio.clone(),
        );
        if let Some(detector) = detector {
            resolver = resolver.with_detector(detector);
        }
        if let Some(translator) = translator {
            resolver = resolver.with_translator(translator);
        }
        let fitter = StreamFitter::new(
            Arc::clone(&catalog),
            Arc::clone(&transcoder),
            settings.budget,
        );
        let splitter = Splitter::new(Arc::clone(&transcoder), settings.budget);

        Self {
            catalog,
            transcoder,
            resolver,
            fitter,
            splitter,
            cache: ArtifactCache::new(backend, settings.lock_poll),
            delivery,
            events,
            activity,
            liveness: LivenessRegistry::new(settings.liveness_period),
            settings,
        }
    }

    pub fn cache(&self) -> &ArtifactCache {
        &self.cache
    }

    /// Serves `request` from cache or produces, publishes and caches it.
    ///
    /// Production for one composite key never runs twice at once: the key's
    /// lock is held from the cache check until the result is persisted.
    pub async fn acquire(
        &self,
        request: &AcquisitionRequest,
    ) -> AcquisitionResult<AcquisitionOutcome> {
        let source = SourceIdentifier::from_url(&request.url)?;
        let key = CompositeKey::new(source, request.target);
        enter(&key, AcquisitionState::Idle);

        let result = self.acquire_locked(&key, request).await;
        match &result {
            Ok(outcome) => {
                self.events
                    .emit(AcquisitionEvent::Delivered {
                        key: key.to_string(),
                        destination: request.destination.clone(),
                        url: request.url.clone(),
                        parts: outcome.artifact.parts.len(),
                        fresh: outcome.fresh,
                    })
                    .await;
            }
            Err(err) => {
                enter(&key, AcquisitionState::Failed);
                warn!(key = %key, error = %err, "acquisition failed");
                if err.is_announced() {
                    self.events
                        .emit(AcquisitionEvent::Failed {
                            key: key.to_string(),
                            destination: request.destination.clone(),
                            url: request.url.clone(),
                            reason: err.to_string(),
                        })
                        .await;
                }
            }
        }
        result
    }

    async fn acquire_locked(
        &self,
        key: &CompositeKey,
        request: &AcquisitionRequest,
    ) -> AcquisitionResult<AcquisitionOutcome> {
        enter(key, AcquisitionState::LockWait);
        let guard = self
            .cache
            .acquire(key, self.settings.lock_hold, self.settings.lock_wait)
            .await?;
        let result = self.serve(key, request).await;
        if let Err(err) = guard.release().await {
            warn!(key = %key, error = %err, "lock release failed, leaving it to expire");
        }
        result
    }

    async fn serve(
        &self,
        key: &CompositeKey,
        request: &AcquisitionRequest,
    ) -> AcquisitionResult<AcquisitionOutcome> {
        enter(key, AcquisitionState::CacheCheck);
        if let Some(artifact) = self.cache.load(key).await? {
            let text = caption(
                artifact.title.as_deref(),
                &artifact.audio_label(),
                &artifact.url,
            );
            match self
                .delivery
                .redeliver(&request.destination, &artifact, &text)
                .await
            {
                Ok(()) => {
                    enter(key, AcquisitionState::CacheHit);
                    return Ok(AcquisitionOutcome {
                        key: key.clone(),
                        artifact,
                        fresh: false,
                    });
                }
                Err(DeliveryError::NotFound(reference)) => {
                    warn!(key = %key, reference = %reference, "cached artifact is stale, producing again");
                    self.cache.invalidate(key).await?;
                }
                Err(err) => return Err(err.into()),
            }
        }

        enter(key, AcquisitionState::Producing);
        let workspace = Workspace::create(&self.settings.work_root)
            .await
            .map_err(|source| AcquisitionError::Workspace {
                path: self.settings.work_root.clone(),
                source,
            })?;
        let liveness = self
            .liveness
            .start(&request.destination, Arc::clone(&self.activity));
        let workspace_ref = &workspace;
        let produced = self
            .settings
            .retry
            .run("produce", move || self.produce(key, request, workspace_ref))
            .await;
        liveness.stop().await;
        let produced = produced
            .map_err(|failure| AcquisitionError::from_production(failure.attempts, failure.error))?;

        enter(key, AcquisitionState::Persisting);
        let text = caption(
            produced.title.as_deref(),
            &produced.audio_label(),
            &produced.url,
        );
        let handles = self
            .delivery
            .publish(&request.destination, &produced, &text)
            .await?;
        let artifact = MediaArtifact::from_produced(&produced, handles);
        self.cache.store(key, &artifact).await?;
        enter(key, AcquisitionState::Done);
        info!(
            key = %key,
            parts = artifact.parts.len(),
            width = artifact.width,
            height = artifact.height,
            audio = %artifact.audio_label(),
            "artifact produced"
        );
        Ok(AcquisitionOutcome {
            key: key.clone(),
            artifact,
            fresh: true,
        })
    }

    async fn produce(
        &self,
        key: &CompositeKey,
        request: &AcquisitionRequest,
        workspace: &Workspace,
    ) -> Result<ProducedMedia, ProductionError> {
        let metadata = self.catalog.describe(&request.url).await?;
        let audio = self
            .resolver
            .resolve(&metadata, key.target, workspace.path())
            .await?;
        let candidates = select_video_candidates(&metadata.streams, &self.settings.video_policy);
        let plan = self
            .fitter
            .fit(&metadata, &audio, &candidates, workspace.path())
            .await?;
        let probe = self.transcoder.probe(&plan.merged_path).await?;
        // a mixed dub can run longer than the catalog claims
        let duration_secs = probe
            .duration_secs
            .filter(|secs| *secs > 0.0)
            .map(|secs| secs.ceil() as u64)
            .unwrap_or(metadata.duration_secs);
        let split = self
            .splitter
            .split_and_verify(&plan, duration_secs, &workspace.parts_dir())
            .await?;
        info!(
            key = %key,
            format = %plan.stream,
            parts = split.parts.len(),
            escalations = split.escalations,
            "production attempt succeeded"
        );
        Ok(ProducedMedia {
            source: metadata.id,
            url: metadata.url,
            title: metadata.title,
            target: key.target,
            parts: split.parts,
            width: probe.width,
            height: probe.height,
            detection: audio.detection,
            translated_to: audio.translated_to,
            stream: plan.stream,
        })
    }
}

fn enter(key: &CompositeKey, state: AcquisitionState) {
    info!(key = %key, state = %state, "acquisition state");
}
