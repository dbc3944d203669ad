//! Supported language families.
//!
//! A voice identifier such as `af_sarah` or `bm_george` selects its language
//! family with the first character.  Every family is served by its own
//! synthesis pipeline; all pipelines share one loaded model.

use std::fmt;

use crate::error::ModelError;

/// One of the fixed set of languages the synthesis model is loaded for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Language {
    AmericanEnglish,
    BritishEnglish,
    Spanish,
    French,
    Hindi,
    Italian,
    Japanese,
    BrazilianPortuguese,
    Mandarin,
}

impl Language {
    /// Every supported language, in code order.
    pub const ALL: [Language; 9] = [
        Language::AmericanEnglish,
        Language::BritishEnglish,
        Language::Spanish,
        Language::French,
        Language::Hindi,
        Language::Italian,
        Language::Japanese,
        Language::BrazilianPortuguese,
        Language::Mandarin,
    ];

    /// Parse a single-character language code.
    pub fn from_code(code: char) -> Result<Self, ModelError> {
        match code {
            'a' => Ok(Self::AmericanEnglish),
            'b' => Ok(Self::BritishEnglish),
            'e' => Ok(Self::Spanish),
            'f' => Ok(Self::French),
            'h' => Ok(Self::Hindi),
            'i' => Ok(Self::Italian),
            'j' => Ok(Self::Japanese),
            'p' => Ok(Self::BrazilianPortuguese),
            'z' => Ok(Self::Mandarin),
            other => Err(ModelError::UnsupportedLanguage(other)),
        }
    }

    pub fn code(self) -> char {
        match self {
            Self::AmericanEnglish => 'a',
            Self::BritishEnglish => 'b',
            Self::Spanish => 'e',
            Self::French => 'f',
            Self::Hindi => 'h',
            Self::Italian => 'i',
            Self::Japanese => 'j',
            Self::BrazilianPortuguese => 'p',
            Self::Mandarin => 'z',
        }
    }

    /// espeak-ng voice used to phonemise text in this language.
    pub fn espeak_voice(self) -> &'static str {
        match self {
            Self::AmericanEnglish => "en-us",
            Self::BritishEnglish => "en-gb",
            Self::Spanish => "es",
            Self::French => "fr-fr",
            Self::Hindi => "hi",
            Self::Italian => "it",
            Self::Japanese => "ja",
            Self::BrazilianPortuguese => "pt-br",
            Self::Mandarin => "cmn",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}
