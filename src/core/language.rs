// Supported target languages

use serde::Serialize;

/// A target language offered to users
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Language {
    /// Code sent to translation providers
    pub code: &'static str,
    /// English display name used in prompts
    pub name: &'static str,
}

pub const LANGUAGES: &[Language] = &[
    Language { code: "es", name: "Spanish" },
    Language { code: "en", name: "English" },
    Language { code: "fr", name: "French" },
    Language { code: "pt", name: "Portuguese" },
    Language { code: "de", name: "German" },
    Language { code: "el", name: "Greek" },
    Language { code: "pl", name: "Polish" },
    Language { code: "ar", name: "Arabic" },
    Language { code: "ru", name: "Russian" },
    Language { code: "ja", name: "Japanese" },
    Language { code: "ko", name: "Korean" },
    Language { code: "zh", name: "Chinese" },
    Language { code: "vi", name: "Vietnamese" },
];

/// Look up a language by code, case-insensitively
pub fn find_language(code: &str) -> Option<&'static Language> {
    let code = code.trim();
    LANGUAGES.iter().find(|l| l.code.eq_ignore_ascii_case(code))
}

/// Display name for prompts; unknown codes are passed through as-is
pub fn language_name(code: &str) -> &str {
    find_language(code).map(|l| l.name).unwrap_or(code)
}
