mod common;

use std::sync::Arc;

use clipfit_core::audio::{AudioError, AudioTrackResolver, LanguageDetector, Translator};
use clipfit_core::catalog::StreamCatalog;
use clipfit_core::media::{LanguageDetection, TargetLanguage};

use common::*;

fn resolver(
    catalog: &Arc<FakeCatalog>,
    transcoder: &Arc<FakeTranscoder>,
    detector: Option<FixedDetector>,
    translator: Option<Arc<FakeTranslator>>,
) -> AudioTrackResolver {
    let mut resolver = AudioTrackResolver::new(
        catalog.clone(),
        transcoder.clone(),
        settings(std::path::Path::new("work")).audio,
    );
    if let Some(detector) = detector {
        resolver = resolver.with_detector(Arc::new(detector) as Arc<dyn LanguageDetector>);
    }
    if let Some(translator) = translator {
        resolver = resolver.with_translator(translator as Arc<dyn Translator>);
    }
    resolver
}

fn english(probability: f64) -> FixedDetector {
    FixedDetector {
        language: "en".into(),
        probability,
    }
}

#[tokio::test]
async fn original_target_skips_detection() {
    let catalog = Arc::new(small_source());
    let transcoder = Arc::new(FakeTranscoder::new(212));
    let work = tempfile::tempdir().unwrap();
    let meta = catalog.describe(URL).await.unwrap();

    let audio = resolver(&catalog, &transcoder, Some(english(0.9)), None)
        .resolve(&meta, TargetLanguage::Original, work.path())
        .await
        .unwrap();
    assert_eq!(audio.detection, LanguageDetection::NotRun);
    assert_eq!(audio.size_bytes, 4 * MIB);
    assert!(audio.path.ends_with("dQw4w9WgXcQ.audio.m4a"));
    assert_eq!(catalog.downloads_of("140"), 1);
    assert_eq!(catalog.downloads_of("139"), 0);
    assert_eq!(transcoder.samples.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn missing_detector_keeps_original_track() {
    let catalog = Arc::new(small_source());
    let transcoder = Arc::new(FakeTranscoder::new(212));
    let translator = Arc::new(FakeTranslator::new(TranslatorBehavior::Succeed(MIB)));
    let work = tempfile::tempdir().unwrap();
    let meta = catalog.describe(URL).await.unwrap();

    let audio = resolver(&catalog, &transcoder, None, Some(translator.clone()))
        .resolve(&meta, TargetLanguage::Ru, work.path())
        .await
        .unwrap();
    assert_eq!(audio.detection, LanguageDetection::NotRun);
    assert_eq!(audio.translated_to, None);
    assert_eq!(translator.call_count(), 0);
}

#[tokio::test]
async fn unsupported_language_is_not_translated() {
    let catalog = Arc::new(small_source());
    let transcoder = Arc::new(FakeTranscoder::new(212));
    let translator = Arc::new(FakeTranslator::new(TranslatorBehavior::Succeed(MIB)));
    let work = tempfile::tempdir().unwrap();
    let meta = catalog.describe(URL).await.unwrap();
    let detector = FixedDetector {
        language: "pt".into(),
        probability: 0.95,
    };

    let audio = resolver(&catalog, &transcoder, Some(detector), Some(translator.clone()))
        .resolve(&meta, TargetLanguage::Ru, work.path())
        .await
        .unwrap();
    assert_eq!(audio.detection.label(), "unsupported");
    assert_eq!(translator.call_count(), 0);
}

#[tokio::test]
async fn mixed_track_is_reused_on_later_attempts() {
    let catalog = Arc::new(small_source());
    let transcoder = Arc::new(FakeTranscoder::new(212));
    let translator = Arc::new(FakeTranslator::new(TranslatorBehavior::Succeed(3 * MIB)));
    let work = tempfile::tempdir().unwrap();
    let meta = catalog.describe(URL).await.unwrap();
    let resolver = resolver(
        &catalog,
        &transcoder,
        Some(english(0.9)),
        Some(translator.clone()),
    );

    let first = resolver
        .resolve(&meta, TargetLanguage::Kk, work.path())
        .await
        .unwrap();
    let second = resolver
        .resolve(&meta, TargetLanguage::Kk, work.path())
        .await
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(first.translated_to, Some(TargetLanguage::Kk));
    // the fake mixer writes the larger input plus one MiB
    assert_eq!(first.size_bytes, 5 * MIB);
    assert!(first.path.ends_with("dQw4w9WgXcQ.translated.kk.mixed.m4a"));
    assert_eq!(translator.call_count(), 1);
    assert_eq!(transcoder.mix_count(), 1);
    assert_eq!(catalog.downloads_of("140"), 1);
}

#[tokio::test]
async fn interrupted_mix_is_not_reused_as_translation() {
    let catalog = Arc::new(small_source());
    let transcoder = Arc::new(FakeTranscoder::new(212));
    transcoder.fail_next_mixes(1);
    let translator = Arc::new(FakeTranslator::new(TranslatorBehavior::Succeed(3 * MIB)));
    let work = tempfile::tempdir().unwrap();
    let meta = catalog.describe(URL).await.unwrap();
    let resolver = resolver(
        &catalog,
        &transcoder,
        Some(english(0.9)),
        Some(translator.clone()),
    );

    let first = resolver
        .resolve(&meta, TargetLanguage::Ru, work.path())
        .await
        .unwrap();
    assert_eq!(first.translated_to, None);
    assert!(first.path.ends_with("dQw4w9WgXcQ.audio.m4a"));
    assert!(!work.path().join("dQw4w9WgXcQ.translated.ru.mixed.m4a").exists());
    assert!(!work.path().join("dQw4w9WgXcQ.translated.ru.partial.m4a").exists());

    let second = resolver
        .resolve(&meta, TargetLanguage::Ru, work.path())
        .await
        .unwrap();
    assert_eq!(second.translated_to, Some(TargetLanguage::Ru));
    assert_eq!(second.size_bytes, 5 * MIB);
    assert_eq!(transcoder.mix_count(), 2);
}

#[tokio::test]
async fn source_without_audio_only_stream_is_rejected() {
    let catalog = Arc::new(FakeCatalog::new(
        60,
        vec![video("137", 1080, Some(10 * MIB))],
    ));
    let transcoder = Arc::new(FakeTranscoder::new(60));
    let work = tempfile::tempdir().unwrap();
    let meta = catalog.describe(URL).await.unwrap();

    let err = resolver(&catalog, &transcoder, None, None)
        .resolve(&meta, TargetLanguage::Original, work.path())
        .await
        .unwrap_err();
    assert!(matches!(err, AudioError::NoAudioStream { .. }));
}
