//! Language token normalization.
//!
//! Callers may name a language by code (`"es"`) or by display name
//! (`"Spanish"`). Both resolve to the same canonical [`Language`]. Unknown
//! tokens pass through so a translation engine can still attempt them.

/// Canonical code / display-name pairs understood without pass-through.
const KNOWN_LANGUAGES: &[(&str, &str)] = &[
    ("en", "English"),
    ("es", "Spanish"),
    ("hi", "Hindi"),
    ("zh", "Chinese"),
    ("fr", "French"),
    ("de", "German"),
    ("pt", "Portuguese"),
    ("ja", "Japanese"),
    ("ko", "Korean"),
];

/// A normalized language: matching code plus a human-readable name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Language {
    /// Lower-case code used for comparisons.
    pub code: String,
    /// Name shown to the translation engine.
    pub display_name: String,
}

impl Language {
    /// Whether the token resolved against the canonical table.
    pub fn is_known(&self) -> bool {
        KNOWN_LANGUAGES.iter().any(|(code, _)| *code == self.code)
    }

    /// Whether two languages share a code, ignoring case.
    pub fn same_as(&self, other: &Language) -> bool {
        self.code.eq_ignore_ascii_case(&other.code)
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.display_name, self.code)
    }
}

/// Resolve a language token. Empty or whitespace-only tokens give `None`.
///
/// Matching trims and lower-cases the token. A known code or a known display
/// name resolves to the canonical pair. Anything else becomes its own code
/// (lower-cased) with the trimmed original as display name.
pub fn normalize(token: &str) -> Option<Language> {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return None;
    }
    let lowered = trimmed.to_lowercase();

    let known = KNOWN_LANGUAGES
        .iter()
        .find(|(code, _)| *code == lowered)
        .or_else(|| {
            KNOWN_LANGUAGES
                .iter()
                .find(|(_, name)| name.to_lowercase() == lowered)
        });

    Some(match known {
        Some((code, name)) => Language {
            code: (*code).to_owned(),
            display_name: (*name).to_owned(),
        },
        None => Language {
            code: lowered,
            display_name: trimmed.to_owned(),
        },
    })
}
