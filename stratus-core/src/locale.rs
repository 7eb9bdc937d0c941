/// UI languages the service accepts for localized error messages and
/// user-visible strings. Every request carries a `locale` parameter.
pub const SUPPORTED_LOCALES: &[&str] = &[
    "en", "de", "es", "fr", "it", "ja", "ko", "pt-BR", "ru", "zh-Hans", "zh-Hant",
];

pub const FALLBACK_LOCALE: &str = "en";

/// Picks the supported locale that best matches a caller-preferred language
/// tag. An exact match wins, then a match on the primary subtag
/// (`en-GB` -> `en`), then the fallback.
pub fn best_match(preferred: &str) -> &'static str {
    let preferred = preferred.trim();
    if preferred.is_empty() {
        return FALLBACK_LOCALE;
    }
    for candidate in SUPPORTED_LOCALES {
        if candidate.eq_ignore_ascii_case(preferred) {
            return candidate;
        }
    }
    let primary = preferred
        .split(['-', '_'])
        .next()
        .unwrap_or(preferred);
    for candidate in SUPPORTED_LOCALES {
        let candidate_primary = candidate.split('-').next().unwrap_or(candidate);
        if candidate_primary.eq_ignore_ascii_case(primary) {
            return candidate;
        }
    }
    FALLBACK_LOCALE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_wins() {
        assert_eq!(best_match("ja"), "ja");
        assert_eq!(best_match("zh-Hant"), "zh-Hant");
    }

    #[test]
    fn matches_on_primary_subtag() {
        assert_eq!(best_match("en-GB"), "en");
        assert_eq!(best_match("pt_PT"), "pt-BR");
        assert_eq!(best_match("DE"), "de");
    }

    #[test]
    fn unknown_language_falls_back_to_english() {
        assert_eq!(best_match("zz"), "en");
        assert_eq!(best_match(""), "en");
    }
}
