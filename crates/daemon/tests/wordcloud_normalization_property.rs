// Property tests for wordcloud text normalization.

use proptest::prelude::*;

use plenum_common::wordcloud::{normalize_text, tokenize, MAX_TOKENS_PER_SUBMISSION};

proptest! {
    #[test]
    fn normalization_is_idempotent(input in "\\PC{0,200}") {
        let once = normalize_text(&input);
        let twice = normalize_text(&once);
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn normalized_text_contains_only_allowed_characters(input in "\\PC{0,200}") {
        let normalized = normalize_text(&input);
        for ch in normalized.chars() {
            prop_assert!(
                ch.is_alphanumeric() || ch == '-' || ch == ' ',
                "unexpected character {ch:?} in {normalized:?}"
            );
        }
        prop_assert!(!normalized.starts_with(' '));
        prop_assert!(!normalized.ends_with(' '));
        prop_assert!(!normalized.contains("  "));
    }

    #[test]
    fn tokens_respect_length_and_cap(input in "\\PC{0,400}") {
        let tokens = tokenize(&input);
        prop_assert!(tokens.len() <= MAX_TOKENS_PER_SUBMISSION);
        for token in &tokens {
            prop_assert!(token.chars().count() >= 2, "short token {token:?}");
            prop_assert!(!token.contains(' '));
        }
    }

    #[test]
    fn tokenization_survives_renormalization(input in "\\PC{0,200}") {
        let tokens_direct = tokenize(&input);
        let tokens_after_normalize = tokenize(&normalize_text(&input));
        prop_assert_eq!(tokens_direct, tokens_after_normalize);
    }
}
