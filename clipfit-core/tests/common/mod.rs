#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use clipfit_core::audio::{
    AudioSettings, DetectionError, DetectorVerdict, LanguageDetector, TranslationRequest,
    TranslationUnavailable, Translator,
};
use clipfit_core::catalog::{CatalogResult, StreamCatalog, VideoPolicy};
use clipfit_core::coordinator::{
    AcquisitionCoordinator, Collaborators, CoordinatorSettings, RetryPolicy,
};
use clipfit_core::delivery::{DeliveryChannel, DeliveryError, DeliveryResult};
use clipfit_core::events::BroadcastEvents;
use clipfit_core::fitter::SizeBudget;
use clipfit_core::liveness::{ActivityError, ActivitySink};
use clipfit_core::media::{
    MediaArtifact, PartHandle, ProducedMedia, Resolution, SourceIdentifier, SourceMetadata,
    StreamDescriptor, StreamKind,
};
use clipfit_core::store::{LockCacheBackend, MemoryBackend};
use clipfit_core::transcoder::{ProbeReport, TranscodeError, TranscodeResult, Transcoder};
use tempfile::TempDir;

pub const MIB: u64 = 1024 * 1024;
pub const URL: &str = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";

/// Creates a sparse file of exactly `size` bytes.
pub fn sized_file(path: &Path, size: u64) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    let file = File::create(path).unwrap();
    file.set_len(size).unwrap();
}

pub fn file_len(path: &Path) -> u64 {
    std::fs::metadata(path).unwrap().len()
}

pub fn video(format_id: &str, height: u32, declared: Option<u64>) -> StreamDescriptor {
    StreamDescriptor {
        format_id: format_id.to_string(),
        kind: StreamKind::Video,
        container: "mp4".into(),
        codec: "avc1.640028".into(),
        resolution: Some(Resolution::new(height * 16 / 9, height)),
        declared_size_bytes: declared,
        bitrate_kbps: None,
        url: Some(format!("https://cdn.example/{format_id}")),
    }
}

pub fn audio(format_id: &str, kbps: f64, declared: Option<u64>) -> StreamDescriptor {
    StreamDescriptor {
        format_id: format_id.to_string(),
        kind: StreamKind::Audio,
        container: "m4a".into(),
        codec: "mp4a.40.2".into(),
        resolution: None,
        declared_size_bytes: declared,
        bitrate_kbps: Some(kbps),
        url: Some(format!("https://cdn.example/{format_id}")),
    }
}

pub struct FakeCatalog {
    pub duration_secs: u64,
    pub streams: Vec<StreamDescriptor>,
    /// Bytes actually written per format id; falls back to the declared size.
    pub real_sizes: HashMap<String, u64>,
    pub describe_delay: Duration,
    pub describes: AtomicUsize,
    pub downloads: Mutex<Vec<String>>,
}

impl FakeCatalog {
    pub fn new(duration_secs: u64, streams: Vec<StreamDescriptor>) -> Self {
        Self {
            duration_secs,
            streams,
            real_sizes: HashMap::new(),
            describe_delay: Duration::ZERO,
            describes: AtomicUsize::new(0),
            downloads: Mutex::new(Vec::new()),
        }
    }

    pub fn with_real_size(mut self, format_id: &str, size: u64) -> Self {
        self.real_sizes.insert(format_id.to_string(), size);
        self
    }

    pub fn with_describe_delay(mut self, delay: Duration) -> Self {
        self.describe_delay = delay;
        self
    }

    pub fn describe_count(&self) -> usize {
        self.describes.load(Ordering::SeqCst)
    }

    pub fn downloads_of(&self, format_id: &str) -> usize {
        self.downloads
            .lock()
            .unwrap()
            .iter()
            .filter(|id| id.as_str() == format_id)
            .count()
    }

    pub fn download_count(&self) -> usize {
        self.downloads.lock().unwrap().len()
    }
}

#[async_trait]
impl StreamCatalog for FakeCatalog {
    async fn describe(&self, url: &str) -> CatalogResult<SourceMetadata> {
        self.describes.fetch_add(1, Ordering::SeqCst);
        if !self.describe_delay.is_zero() {
            tokio::time::sleep(self.describe_delay).await;
        }
        Ok(SourceMetadata {
            id: SourceIdentifier::from_url(url)?,
            url: url.to_string(),
            title: Some("Never Gonna Give You Up".into()),
            duration_secs: self.duration_secs,
            streams: self.streams.clone(),
        })
    }

    async fn download(&self, stream: &StreamDescriptor, destination: &Path) -> CatalogResult<u64> {
        let size = self
            .real_sizes
            .get(&stream.format_id)
            .copied()
            .or(stream.declared_size_bytes)
            .unwrap_or(MIB);
        sized_file(destination, size);
        self.downloads
            .lock()
            .unwrap()
            .push(stream.format_id.clone());
        Ok(size)
    }
}

/// Simulates ffmpeg on sparse files: a mux weighs video plus audio, a
/// segmentation splits the bytes evenly over `ceil(duration / segment)`
/// parts.
pub struct FakeTranscoder {
    pub duration_secs: u64,
    pub mux_failures_left: AtomicUsize,
    pub mix_failures_left: AtomicUsize,
    pub skews: Mutex<VecDeque<u64>>,
    pub muxes: AtomicUsize,
    pub segments: Mutex<Vec<u64>>,
    pub probes: AtomicUsize,
    pub samples: AtomicUsize,
    pub mixes: AtomicUsize,
}

impl FakeTranscoder {
    pub fn new(duration_secs: u64) -> Self {
        Self {
            duration_secs,
            mux_failures_left: AtomicUsize::new(0),
            mix_failures_left: AtomicUsize::new(0),
            skews: Mutex::new(VecDeque::new()),
            muxes: AtomicUsize::new(0),
            segments: Mutex::new(Vec::new()),
            probes: AtomicUsize::new(0),
            samples: AtomicUsize::new(0),
            mixes: AtomicUsize::new(0),
        }
    }

    /// The next segmentation moves `extra` bytes from the second part into
    /// the first, as a badly placed keyframe would.
    pub fn skew_next_segmentation(&self, extra: u64) {
        self.skews.lock().unwrap().push_back(extra);
    }

    pub fn fail_next_muxes(&self, count: usize) {
        self.mux_failures_left.store(count, Ordering::SeqCst);
    }

    /// The next `count` mixes leave a truncated output behind and fail.
    pub fn fail_next_mixes(&self, count: usize) {
        self.mix_failures_left.store(count, Ordering::SeqCst);
    }

    pub fn mux_count(&self) -> usize {
        self.muxes.load(Ordering::SeqCst)
    }

    pub fn segment_count(&self) -> usize {
        self.segments.lock().unwrap().len()
    }

    pub fn mix_count(&self) -> usize {
        self.mixes.load(Ordering::SeqCst)
    }

    pub fn invocations(&self) -> usize {
        self.mux_count()
            + self.segment_count()
            + self.probes.load(Ordering::SeqCst)
            + self.samples.load(Ordering::SeqCst)
            + self.mix_count()
    }
}

fn height_from_name(path: &Path) -> u32 {
    path.file_name()
        .and_then(|name| name.to_str())
        .and_then(|name| {
            name.split('.').find_map(|token| {
                token
                    .strip_suffix('p')
                    .and_then(|digits| digits.parse::<u32>().ok())
            })
        })
        .unwrap_or(0)
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn probe(&self, path: &Path) -> TranscodeResult<ProbeReport> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        let height = height_from_name(path);
        Ok(ProbeReport {
            width: height * 16 / 9,
            height,
            duration_secs: Some(self.duration_secs as f64),
        })
    }

    async fn mux(&self, video: &Path, audio: &Path, output: &Path) -> TranscodeResult<()> {
        self.muxes.fetch_add(1, Ordering::SeqCst);
        let failures = self.mux_failures_left.load(Ordering::SeqCst);
        if failures > 0 {
            self.mux_failures_left.store(failures - 1, Ordering::SeqCst);
            return Err(TranscodeError::Unavailable);
        }
        sized_file(output, file_len(video) + file_len(audio));
        Ok(())
    }

    async fn segment(
        &self,
        input: &Path,
        output_dir: &Path,
        segment_seconds: u64,
    ) -> TranscodeResult<Vec<PathBuf>> {
        self.segments.lock().unwrap().push(segment_seconds);
        let count = self.duration_secs.div_ceil(segment_seconds).max(1);
        let total = file_len(input);
        let mut sizes = vec![total / count; count as usize];
        if let Some(last) = sizes.last_mut() {
            *last += total % count;
        }
        if let Some(extra) = self.skews.lock().unwrap().pop_front() {
            if sizes.len() > 1 {
                let moved = extra.min(sizes[1]);
                sizes[0] += moved;
                sizes[1] -= moved;
            }
        }
        let stem = input.file_stem().unwrap().to_string_lossy().to_string();
        let parts = sizes
            .iter()
            .enumerate()
            .map(|(index, size)| {
                let path = output_dir.join(format!("{stem}_part_{index:03}.mp4"));
                sized_file(&path, *size);
                path
            })
            .collect();
        Ok(parts)
    }

    async fn extract_sample(
        &self,
        _input: &Path,
        output: &Path,
        _seconds: u32,
    ) -> TranscodeResult<()> {
        self.samples.fetch_add(1, Ordering::SeqCst);
        sized_file(output, 1024);
        Ok(())
    }

    async fn mix(
        &self,
        original: &Path,
        overlay: &Path,
        output: &Path,
        _original_volume_db: f64,
    ) -> TranscodeResult<()> {
        self.mixes.fetch_add(1, Ordering::SeqCst);
        let failures = self.mix_failures_left.load(Ordering::SeqCst);
        if failures > 0 {
            self.mix_failures_left.store(failures - 1, Ordering::SeqCst);
            sized_file(output, 1234);
            return Err(TranscodeError::Unavailable);
        }
        sized_file(output, file_len(original).max(file_len(overlay)) + MIB);
        Ok(())
    }
}

pub struct FixedDetector {
    pub language: String,
    pub probability: f64,
}

#[async_trait]
impl LanguageDetector for FixedDetector {
    async fn detect(&self, _sample: &Path) -> Result<DetectorVerdict, DetectionError> {
        Ok(DetectorVerdict {
            language: self.language.clone(),
            probability: self.probability,
        })
    }
}

pub enum TranslatorBehavior {
    Succeed(u64),
    TimeOut,
}

pub struct FakeTranslator {
    pub behavior: TranslatorBehavior,
    pub calls: AtomicUsize,
}

impl FakeTranslator {
    pub fn new(behavior: TranslatorBehavior) -> Self {
        Self {
            behavior,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Translator for FakeTranslator {
    async fn translate(
        &self,
        request: &TranslationRequest<'_>,
    ) -> Result<PathBuf, TranslationUnavailable> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            TranslatorBehavior::Succeed(size) => {
                let path = request.output_path();
                sized_file(&path, size);
                Ok(path)
            }
            TranslatorBehavior::TimeOut => {
                Err(TranslationUnavailable::TimedOut(Duration::from_secs(120)))
            }
        }
    }
}

/// Hands out opaque handles and forgets them on demand to model an upstream
/// that expired previously uploaded files.
#[derive(Default)]
pub struct FakeDelivery {
    pub known: Mutex<HashSet<String>>,
    pub published: Mutex<Vec<(String, Vec<u64>, String)>>,
    pub redelivered: AtomicUsize,
    counter: AtomicUsize,
}

impl FakeDelivery {
    pub fn forget_all(&self) {
        self.known.lock().unwrap().clear();
    }

    pub fn publish_count(&self) -> usize {
        self.published.lock().unwrap().len()
    }
}

#[async_trait]
impl DeliveryChannel for FakeDelivery {
    async fn publish(
        &self,
        destination: &str,
        media: &ProducedMedia,
        caption: &str,
    ) -> DeliveryResult<Vec<PartHandle>> {
        let sizes: Vec<u64> = media.parts.iter().map(|part| file_len(part)).collect();
        let handles: Vec<PartHandle> = sizes
            .iter()
            .map(|_| {
                let n = self.counter.fetch_add(1, Ordering::SeqCst);
                PartHandle::new(format!("file-{n}"))
            })
            .collect();
        let mut known = self.known.lock().unwrap();
        for handle in &handles {
            known.insert(handle.to_string());
        }
        self.published
            .lock()
            .unwrap()
            .push((destination.to_string(), sizes, caption.to_string()));
        Ok(handles)
    }

    async fn redeliver(
        &self,
        _destination: &str,
        artifact: &MediaArtifact,
        _caption: &str,
    ) -> DeliveryResult<()> {
        let known = self.known.lock().unwrap();
        for part in &artifact.parts {
            if !known.contains(part.as_str()) {
                return Err(DeliveryError::NotFound(part.to_string()));
            }
        }
        self.redelivered.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct CountingActivity {
    pub signals: AtomicUsize,
}

#[async_trait]
impl ActivitySink for CountingActivity {
    async fn signal(&self, _destination: &str) -> Result<(), ActivityError> {
        self.signals.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn settings(work_root: &Path) -> CoordinatorSettings {
    CoordinatorSettings {
        budget: SizeBudget::default(),
        retry: RetryPolicy {
            attempts: 3,
            delay: Duration::from_millis(10),
        },
        lock_hold: Duration::from_secs(600),
        lock_wait: Duration::from_secs(5),
        lock_poll: Duration::from_millis(5),
        work_root: work_root.to_path_buf(),
        video_policy: VideoPolicy {
            containers: vec!["mp4".into()],
            codec_prefix: "avc1".into(),
            min_height: 360,
        },
        audio: AudioSettings {
            audio_containers: vec!["m4a".into(), "mp4".into()],
            sample_seconds: 30,
            min_confidence: 0.1,
            original_volume_db: -10.0,
        },
        liveness_period: Duration::from_millis(20),
    }
}

pub struct Harness {
    pub scratch: TempDir,
    pub catalog: Arc<FakeCatalog>,
    pub transcoder: Arc<FakeTranscoder>,
    pub translator: Arc<FakeTranslator>,
    pub delivery: Arc<FakeDelivery>,
    pub backend: Arc<MemoryBackend>,
    pub events: BroadcastEvents,
    pub activity: Arc<CountingActivity>,
    pub coordinator: Arc<AcquisitionCoordinator>,
}

pub struct HarnessBuilder {
    catalog: FakeCatalog,
    transcoder: FakeTranscoder,
    detector: Option<FixedDetector>,
    translator: TranslatorBehavior,
    tweak: Option<Box<dyn FnOnce(&mut CoordinatorSettings)>>,
}

impl HarnessBuilder {
    pub fn new(catalog: FakeCatalog) -> Self {
        let duration = catalog.duration_secs;
        Self {
            catalog,
            transcoder: FakeTranscoder::new(duration),
            detector: None,
            translator: TranslatorBehavior::Succeed(3 * MIB),
            tweak: None,
        }
    }

    pub fn detector(mut self, language: &str, probability: f64) -> Self {
        self.detector = Some(FixedDetector {
            language: language.to_string(),
            probability,
        });
        self
    }

    /// Length the transcoder reports and segments by, when it differs from
    /// what the catalog declares.
    pub fn transcoder_duration(mut self, duration_secs: u64) -> Self {
        self.transcoder = FakeTranscoder::new(duration_secs);
        self
    }

    pub fn translator(mut self, behavior: TranslatorBehavior) -> Self {
        self.translator = behavior;
        self
    }

    pub fn settings(mut self, tweak: impl FnOnce(&mut CoordinatorSettings) + 'static) -> Self {
        self.tweak = Some(Box::new(tweak));
        self
    }

    pub fn build(self) -> Harness {
        let scratch = tempfile::tempdir().unwrap();
        let catalog = Arc::new(self.catalog);
        let transcoder = Arc::new(self.transcoder);
        let translator = Arc::new(FakeTranslator::new(self.translator));
        let delivery = Arc::new(FakeDelivery::default());
        let backend = Arc::new(MemoryBackend::new());
        let events = BroadcastEvents::new(16);
        let activity = Arc::new(CountingActivity::default());
        let mut settings = settings(&scratch.path().join("work"));
        if let Some(tweak) = self.tweak {
            tweak(&mut settings);
        }
        let backend_dyn: Arc<dyn LockCacheBackend> = backend.clone();
        let coordinator = AcquisitionCoordinator::new(
            Collaborators {
                catalog: catalog.clone(),
                transcoder: transcoder.clone(),
                detector: self
                    .detector
                    .map(|d| Arc::new(d) as Arc<dyn LanguageDetector>),
                translator: Some(translator.clone()),
                backend: backend_dyn,
                delivery: delivery.clone(),
                events: Arc::new(events.clone()),
                activity: activity.clone(),
            },
            settings,
        );
        Harness {
            scratch,
            catalog,
            transcoder,
            translator,
            delivery,
            backend,
            events,
            activity,
            coordinator: Arc::new(coordinator),
        }
    }
}

impl Harness {
    pub fn work_root(&self) -> PathBuf {
        self.scratch.path().join("work")
    }

    pub fn leftover_workspaces(&self) -> usize {
        std::fs::read_dir(self.work_root())
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}

/// 40 MiB source: 4 MiB of audio and a 1080p stream of 36 MiB.
pub fn small_source() -> FakeCatalog {
    FakeCatalog::new(
        212,
        vec![
            audio("140", 129.0, Some(4 * MIB)),
            audio("139", 48.0, Some(MIB)),
            video("137", 1080, Some(36 * MIB)),
            video("136", 720, Some(20 * MIB)),
        ],
    )
}
