//! Stopword-based language detection. Deterministic and dependency-free;
//! good enough to tag pages for analytics, not a linguistics engine.

const LANGUAGES: &[(&str, &[&str])] = &[
    (
        "en",
        &[
            "the", "and", "of", "to", "in", "is", "that", "for", "with", "was", "this", "are",
        ],
    ),
    (
        "es",
        &[
            "el", "la", "de", "que", "y", "en", "los", "del", "las", "por", "con", "una",
        ],
    ),
    (
        "fr",
        &[
            "le", "la", "les", "de", "et", "des", "un", "une", "dans", "est", "pour", "qui",
        ],
    ),
    (
        "de",
        &[
            "der", "die", "und", "das", "nicht", "ist", "zu", "den", "von", "mit", "auf", "ein",
        ],
    ),
];

/// Detect the dominant language of `text`, or "unknown" when no stopword set
/// clears the evidence bar.
pub fn detect_language(text: &str) -> String {
    let tokens: Vec<String> = text
        .split_whitespace()
        .take(2000)
        .map(|t| {
            t.trim_matches(|c: char| !c.is_alphabetic())
                .to_lowercase()
        })
        .filter(|t| !t.is_empty())
        .collect();
    if tokens.len() < 10 {
        return "unknown".to_string();
    }

    let mut best = ("unknown", 0usize);
    for (lang, stopwords) in LANGUAGES {
        let hits = tokens
            .iter()
            .filter(|t| stopwords.contains(&t.as_str()))
            .count();
        if hits > best.1 {
            best = (lang, hits);
        }
    }

    // Require at least 2% stopword density before committing.
    if best.1 * 50 >= tokens.len() {
        best.0.to_string()
    } else {
        "unknown".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_english() {
        let text = "The quick brown fox jumps over the lazy dog and runs into the forest \
                    where the trees are tall and the light is soft for every creature that lives there.";
        assert_eq!(detect_language(text), "en");
    }

    #[test]
    fn detects_spanish() {
        let text = "La historia de los pueblos que viven en las montañas del norte es una \
                    historia de trabajo y de esfuerzo que pasa de una generación a la siguiente con el tiempo.";
        assert_eq!(detect_language(text), "es");
    }

    #[test]
    fn short_text_is_unknown() {
        assert_eq!(detect_language("hello"), "unknown");
    }

    #[test]
    fn gibberish_is_unknown() {
        let text = "zzz qqq xxx yyy www vvv uuu ttt sss rrr qqq ppp ooo nnn mmm lll kkk jjj";
        assert_eq!(detect_language(text), "unknown");
    }
}
