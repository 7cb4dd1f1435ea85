pub mod audio;
pub mod catalog;
pub mod config;
pub mod coordinator;
pub mod delivery;
pub mod error;
pub mod events;
pub mod fitter;
pub mod liveness;
pub mod media;
pub mod process;
pub mod splitter;
pub mod store;
pub mod transcoder;
pub mod workspace;

mod sqlite;

pub use audio::{
    AudioError, AudioSettings, AudioTrackResolver, CommandLanguageDetector, LanguageDetector,
    ResolvedAudio, TranslationUnavailable, Translator, VotCliTranslator,
};
pub use catalog::{CatalogError, StreamCatalog, VideoPolicy, YtDlpCatalog};
pub use config::{load_clipfit_config, ClipfitConfig, StoreBackendKind};
pub use coordinator::{
    AcquisitionCoordinator, AcquisitionError, AcquisitionOutcome, AcquisitionRequest,
    AcquisitionResult, AcquisitionState, Collaborators, CoordinatorSettings, RetryPolicy,
};
pub use delivery::{DeliveryChannel, DeliveryError, OutboxChannel};
pub use error::{ConfigError, Result};
pub use events::{AcquisitionEvent, BroadcastEvents, EventSink, TracingEvents};
pub use fitter::{FitError, SizeBudget, StreamFitter};
pub use liveness::{ActivityError, ActivitySink, LivenessHandle, LivenessRegistry};
pub use media::{
    ArtifactPlan, CompositeKey, LanguageDetection, MediaArtifact, PartHandle, ProducedMedia,
    SourceIdentifier, SourceLanguage, SourceMetadata, StreamDescriptor, TargetLanguage,
};
pub use splitter::{SplitError, SplitOutcome, Splitter};
pub use store::{
    open_backend, ArtifactCache, LockCacheBackend, LockGuard, MemoryBackend, RedisBackend,
    SqliteBackend, StoreError,
};
pub use transcoder::{FfmpegTranscoder, ProbeReport, TranscodeError, Transcoder};
pub use workspace::Workspace;
