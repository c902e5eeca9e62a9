//! Text normalisation for keyword matching

/// Shorter stems below this length only match exactly.
const MIN_PREFIX_MATCH: usize = 4;

/// Lowercase `text` and split it on anything that isn't alphanumeric.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Light suffix stripping: `-ing`, `-ed`, plural `-s`.
pub fn stem(token: &str) -> String {
    let char_len = token.chars().count();
    let rules: [(&str, &str, usize); 5] = [
        ("ing", "", 6),
        ("ied", "y", 5),
        ("ed", "", 5),
        ("ies", "y", 5),
        ("s", "", 4),
    ];
    for (suffix, replacement, min_len) in rules {
        if char_len < min_len {
            continue;
        }
        if suffix == "s" && token.ends_with("ss") {
            continue;
        }
        if let Some(base) = token.strip_suffix(suffix) {
            return format!("{}{}", base, replacement);
        }
    }
    token.to_string()
}

pub fn stems(text: &str) -> Vec<String> {
    tokenize(text).iter().map(|t| stem(t)).collect()
}

/// Two stems match when equal, or when one is a prefix of the other and the
/// shorter one is long enough to be meaningful (`permit` / `permission`).
pub fn words_match(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    short.chars().count() >= MIN_PREFIX_MATCH && long.starts_with(short)
}

/// Issue text prepared once per classification.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzedText {
    raw: String,
    stems: Vec<String>,
}

impl AnalyzedText {
    pub fn new(text: &str) -> Self {
        Self {
            raw: text.to_string(),
            stems: stems(text),
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn stems(&self) -> &[String] {
        &self.stems
    }

    pub fn is_empty(&self) -> bool {
        self.stems.is_empty()
    }

    /// Whether the stemmed term (one word or a phrase) occurs in the text.
    /// Phrases must appear as a consecutive run of tokens.
    pub fn contains(&self, term_stems: &[String]) -> bool {
        if term_stems.is_empty() || term_stems.len() > self.stems.len() {
            return false;
        }
        self.stems.windows(term_stems.len()).any(|window| {
            window
                .iter()
                .zip(term_stems)
                .all(|(text_word, term_word)| words_match(text_word, term_word))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_strips_punctuation() {
        assert_eq!(
            tokenize("Blocked driveway, AGAIN!"),
            vec!["blocked", "driveway", "again"]
        );
    }

    #[test]
    fn test_stem_suffixes() {
        assert_eq!(stem("parking"), "park");
        assert_eq!(stem("blocked"), "block");
        assert_eq!(stem("permits"), "permit");
        assert_eq!(stem("parties"), "party");
        assert_eq!(stem("business"), "business");
        assert_eq!(stem("bus"), "bus");
        assert_eq!(stem("king"), "king");
    }

    #[test]
    fn test_prefix_match_requires_length() {
        assert!(words_match("permit", "permission"));
        assert!(words_match("park", "parked"));
        assert!(!words_match("car", "carpet"));
    }

    #[test]
    fn test_phrase_must_be_consecutive() {
        let text = AnalyzedText::new("Loud music all night next door");
        assert!(text.contains(&stems("loud music")));
        assert!(text.contains(&stems("all night")));
        assert!(!text.contains(&stems("music loud")));
        assert!(!text.contains(&stems("loud night")));
    }

    #[test]
    fn test_empty_text() {
        let text = AnalyzedText::new("   ");
        assert!(text.is_empty());
        assert!(!text.contains(&stems("noise")));
    }
}
