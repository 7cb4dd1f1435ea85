use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TargetLanguage {
    #[default]
    Original,
    Ru,
    En,
    Kk,
}

impl TargetLanguage {
    pub const ALL: [TargetLanguage; 4] = [Self::Original, Self::Ru, Self::En, Self::Kk];

    pub fn as_str(&self) -> &'static str {
        match self {
            TargetLanguage::Original => "original",
            TargetLanguage::Ru => "ru",
            TargetLanguage::En => "en",
            TargetLanguage::Kk => "kk",
        }
    }

    pub fn wants_translation(&self) -> bool {
        !matches!(self, TargetLanguage::Original)
    }

    pub fn matches(&self, language: SourceLanguage) -> bool {
        self.as_str() == language.as_str()
    }
}

impl fmt::Display for TargetLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownLanguage(pub String);

impl fmt::Display for UnknownLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown language code: {}", self.0)
    }
}

impl std::error::Error for UnknownLanguage {}

impl FromStr for TargetLanguage {
    type Err = UnknownLanguage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "original" | "orig" | "" => Ok(Self::Original),
            "ru" => Ok(Self::Ru),
            "en" => Ok(Self::En),
            "kk" => Ok(Self::Kk),
            other => Err(UnknownLanguage(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceLanguage {
    Ru,
    En,
    Zh,
    Ko,
    Ar,
    Fr,
    It,
    Es,
    De,
    Ja,
}

impl SourceLanguage {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceLanguage::Ru => "ru",
            SourceLanguage::En => "en",
            SourceLanguage::Zh => "zh",
            SourceLanguage::Ko => "ko",
            SourceLanguage::Ar => "ar",
            SourceLanguage::Fr => "fr",
            SourceLanguage::It => "it",
            SourceLanguage::Es => "es",
            SourceLanguage::De => "de",
            SourceLanguage::Ja => "ja",
        }
    }
}

impl fmt::Display for SourceLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceLanguage {
    type Err = UnknownLanguage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ru" => Ok(Self::Ru),
            "en" => Ok(Self::En),
            "zh" => Ok(Self::Zh),
            "ko" => Ok(Self::Ko),
            "ar" => Ok(Self::Ar),
            "fr" => Ok(Self::Fr),
            "it" => Ok(Self::It),
            "es" => Ok(Self::Es),
            "de" => Ok(Self::De),
            "ja" => Ok(Self::Ja),
            other => Err(UnknownLanguage(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LanguageDetection {
    #[default]
    NotRun,
    NonSpeech {
        code: String,
        confidence: f64,
    },
    Unsupported {
        code: String,
        confidence: f64,
    },
    Detected {
        language: SourceLanguage,
        confidence: f64,
    },
}

impl LanguageDetection {
    pub fn language(&self) -> Option<SourceLanguage> {
        match self {
            LanguageDetection::Detected { language, .. } => Some(*language),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            LanguageDetection::NotRun => "not_run",
            LanguageDetection::NonSpeech { .. } => "non_speech",
            LanguageDetection::Unsupported { .. } => "unsupported",
            LanguageDetection::Detected { .. } => "detected",
        }
    }
}

/// Maps a raw detector answer onto [`LanguageDetection`].
///
/// Anything under `min_confidence` is treated as music or ambient sound, even
/// if the code would otherwise be supported.
pub fn classify_detection(code: &str, confidence: f64, min_confidence: f64) -> LanguageDetection {
    let code = code.trim().to_ascii_lowercase();
    if confidence < min_confidence {
        return LanguageDetection::NonSpeech { code, confidence };
    }
    match code.parse::<SourceLanguage>() {
        Ok(language) => LanguageDetection::Detected {
            language,
            confidence,
        },
        Err(_) => LanguageDetection::Unsupported { code, confidence },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_confidence_is_non_speech_even_for_supported_codes() {
        let detection = classify_detection("en", 0.05, 0.1);
        assert_eq!(detection.label(), "non_speech");
        assert_eq!(detection.language(), None);
    }

    #[test]
    fn unknown_codes_are_unsupported() {
        let detection = classify_detection("pt", 0.9, 0.1);
        assert_eq!(
            detection,
            LanguageDetection::Unsupported {
                code: "pt".into(),
                confidence: 0.9
            }
        );
    }

    #[test]
    fn supported_codes_are_detected() {
        let detection = classify_detection("DE", 0.71, 0.1);
        assert_eq!(detection.language(), Some(SourceLanguage::De));
    }

    #[test]
    fn target_matches_detected_language() {
        assert!(TargetLanguage::En.matches(SourceLanguage::En));
        assert!(!TargetLanguage::Kk.matches(SourceLanguage::Ru));
        assert!(!TargetLanguage::Original.wants_translation());
    }

    #[test]
    fn detection_state_survives_serialization() {
        let states = [
            LanguageDetection::NotRun,
            LanguageDetection::NonSpeech {
                code: "en".into(),
                confidence: 0.02,
            },
            LanguageDetection::Unsupported {
                code: "pt".into(),
                confidence: 0.8,
            },
        ];
        for state in states {
            let encoded = serde_json::to_string(&state).unwrap();
            let decoded: LanguageDetection = serde_json::from_str(&encoded).unwrap();
            assert_eq!(decoded, state);
        }
    }

    #[test]
    fn parses_target_language() {
        assert_eq!("KK".parse::<TargetLanguage>().unwrap(), TargetLanguage::Kk);
        assert_eq!(
            "original".parse::<TargetLanguage>().unwrap(),
            TargetLanguage::Original
        );
        assert!("xx".parse::<TargetLanguage>().is_err());
    }
}
