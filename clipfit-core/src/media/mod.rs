pub mod language;
pub mod models;
pub mod source;

pub use language::{
    classify_detection, LanguageDetection, SourceLanguage, TargetLanguage, UnknownLanguage,
};
pub use models::{
    caption, ArtifactPlan, CompositeKey, MediaArtifact, PartHandle, ProducedMedia, Resolution,
    SourceMetadata, StreamDescriptor, StreamKind,
};
pub use source::{SourceError, SourceIdentifier};
