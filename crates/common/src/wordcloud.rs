// Wordcloud tokenization.
//
// Free-text answers are folded into a per-token frequency map. Tokens are
// case-folded, stripped to letters/numbers/spaces/hyphens, at least two
// characters long, and capped at 50 per submission to bound extreme input.

use unicode_normalization::UnicodeNormalization;

/// Minimum token length, in characters.
pub const MIN_TOKEN_CHARS: usize = 2;
/// Maximum tokens taken from one submission.
pub const MAX_TOKENS_PER_SUBMISSION: usize = 50;

/// Normalize free text for tokenization.
///
/// NFC-compose, lowercase, replace anything that is not a letter, number,
/// space, or hyphen with a space, collapse runs of whitespace, and trim.
/// Idempotent: normalizing normalized text is a no-op.
pub fn normalize_text(input: &str) -> String {
    let lowered: String = input.nfc().collect::<String>().to_lowercase();
    let mut out = String::with_capacity(lowered.len());
    let mut pending_space = false;
    for ch in lowered.chars() {
        let kept = if ch.is_alphanumeric() || ch == '-' { Some(ch) } else { None };
        match kept {
            Some(ch) => {
                if pending_space && !out.is_empty() {
                    out.push(' ');
                }
                pending_space = false;
                out.push(ch);
            }
            None => pending_space = true,
        }
    }
    out
}

/// Split normalized text into counted tokens.
pub fn tokenize(input: &str) -> Vec<String> {
    normalize_text(input)
        .split(' ')
        .filter(|token| token.chars().count() >= MIN_TOKEN_CHARS)
        .take(MAX_TOKENS_PER_SUBMISSION)
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_lowercases_and_strips_punctuation() {
        assert_eq!(normalize_text("Hello, World!"), "hello world");
        assert_eq!(normalize_text("  Spaced\t\nout  "), "spaced out");
    }

    #[test]
    fn hyphens_survive_normalization() {
        assert_eq!(normalize_text("well-known fact"), "well-known fact");
        assert_eq!(tokenize("state-of-the-art"), vec!["state-of-the-art"]);
    }

    #[test]
    fn unicode_letters_are_kept() {
        assert_eq!(normalize_text("Blåbærsyltetøy!"), "blåbærsyltetøy");
        assert_eq!(tokenize("Å nei"), vec!["nei"]);
    }

    #[test]
    fn short_tokens_are_dropped() {
        assert_eq!(tokenize("a be sea"), vec!["be", "sea"]);
    }

    #[test]
    fn submissions_are_capped_at_fifty_tokens() {
        let text = (0..80).map(|i| format!("word{i}")).collect::<Vec<_>>().join(" ");
        assert_eq!(tokenize(&text).len(), MAX_TOKENS_PER_SUBMISSION);
    }

    #[test]
    fn empty_and_symbol_only_input_yields_nothing() {
        assert_eq!(tokenize(""), Vec::<String>::new());
        assert_eq!(tokenize("!!! ??? ..."), Vec::<String>::new());
    }

    #[test]
    fn normalization_is_idempotent() {
        for sample in ["Hello, World!", "état CIVIL", "well-known\u{00a0}fact", "İstanbul"] {
            let once = normalize_text(sample);
            assert_eq!(normalize_text(&once), once, "sample `{sample}`");
        }
    }
}
