use crate::models::ScoreRecord;
use std::collections::HashSet;

pub const KEYWORD_OVERLAP: &str = "keyword_overlap";
pub const RESPONSE_LENGTH: &str = "response_length";

/// Words too common to count as keywords
const STOP_WORDS: [&str; 21] = [
    "is", "a", "an", "the", "of", "in", "to", "and", "or", "for", "with", "that", "it", "by",
    "from", "on", "are", "was", "be", "has", "its",
];

/// Output lengths (in characters) inside this band get a full score
const MIN_GOOD_LENGTH: usize = 50;
const MAX_GOOD_LENGTH: usize = 500;
/// Lowest score an overly long output can get
const LONG_OUTPUT_FLOOR: f64 = 0.2;

/// Lowercase, split on whitespace and drop stop words
pub fn normalize(text: &str) -> HashSet<String> {
    text.split_whitespace()
        .map(str::to_lowercase)
        .filter(|word| !STOP_WORDS.contains(&word.as_str()))
        .collect()
}

/// Fraction of the expected answer's keywords found in the output
pub fn keyword_overlap(output: &str, expected_output: &str) -> ScoreRecord {
    ScoreRecord {
        name: KEYWORD_OVERLAP.to_string(),
        value: keyword_overlap_value(output, expected_output),
    }
}

fn keyword_overlap_value(output: &str, expected_output: &str) -> f64 {
    if output.is_empty() || expected_output.is_empty() {
        return 0.0;
    }

    let expected_words = normalize(expected_output);
    if expected_words.is_empty() {
        return 0.0;
    }

    let output_words = normalize(output);
    let overlap = expected_words.intersection(&output_words).count();
    round_to(overlap as f64 / expected_words.len() as f64, 2)
}

/// Reward outputs of 50-500 characters, ramp up below, decay above
pub fn response_length(output: &str) -> ScoreRecord {
    ScoreRecord {
        name: RESPONSE_LENGTH.to_string(),
        value: response_length_value(output),
    }
}

fn response_length_value(output: &str) -> f64 {
    if output.is_empty() {
        return 0.0;
    }

    let length = output.chars().count();
    let score = if (MIN_GOOD_LENGTH..=MAX_GOOD_LENGTH).contains(&length) {
        1.0
    } else if length < MIN_GOOD_LENGTH {
        length as f64 / MIN_GOOD_LENGTH as f64
    } else {
        (MAX_GOOD_LENGTH as f64 / length as f64).max(LONG_OUTPUT_FLOOR)
    };

    round_to(score, 2)
}

/// Arithmetic mean, 0.0 for an empty slice
pub fn mean(scores: &[f64]) -> f64 {
    if scores.is_empty() {
        return 0.0;
    }
    let sum: f64 = scores.iter().sum();
    sum / scores.len() as f64
}

/// Round to `places` decimals, half to even on the exact binary value
pub fn round_to(value: f64, places: usize) -> f64 {
    format!("{:.*}", places, value).parse().unwrap_or(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_removes_stop_words_and_lowercases() {
        let words = normalize("The Cat sat on THE mat");
        let expected: HashSet<String> = ["cat", "sat", "mat"].iter().map(|w| w.to_string()).collect();
        assert_eq!(words, expected);
    }

    #[test]
    fn test_normalize_empty_and_whitespace() {
        assert!(normalize("").is_empty());
        assert!(normalize("   \n\t ").is_empty());
        assert!(normalize("the of and").is_empty());
    }

    #[test]
    fn test_normalize_keeps_punctuation_attached() {
        let words = normalize("Lists are mutable, tuples are immutable.");
        assert!(words.contains("mutable,"));
        assert!(words.contains("immutable."));
        assert!(!words.contains("are"));
    }

    #[test]
    fn test_normalize_is_idempotent() {
        for text in [
            "Recursion is when a function calls itself",
            "A REST API is an interface that follows REST principles",
            "  The THE the  ",
            "",
        ] {
            let once = normalize(text);
            let joined = once.iter().cloned().collect::<Vec<_>>().join(" ");
            assert_eq!(normalize(&joined), once);
        }
    }

    #[test]
    fn test_keyword_overlap_empty_inputs() {
        assert_eq!(keyword_overlap("", "anything").value, 0.0);
        assert_eq!(keyword_overlap("anything", "").value, 0.0);
        assert_eq!(keyword_overlap("", "").value, 0.0);
    }

    #[test]
    fn test_keyword_overlap_only_stop_words_expected() {
        let score = keyword_overlap("the answer is here", "it is the");
        assert_eq!(score.value, 0.0);
    }

    #[test]
    fn test_keyword_overlap_partial() {
        let score = keyword_overlap("the cat sat", "the cat sat on the mat");
        assert_eq!(score.name, "keyword_overlap");
        assert_eq!(score.value, 0.67);
    }

    #[test]
    fn test_keyword_overlap_exact_match_is_full() {
        let expected = "Docker is used to create containers that package an application with all its dependencies.";
        assert_eq!(keyword_overlap(expected, expected).value, 1.0);
    }

    #[test]
    fn test_keyword_overlap_ignores_extra_output_words() {
        let score = keyword_overlap(
            "Lists are mutable while tuples are immutable, so tuples can be hashed",
            "lists mutable tuples immutable",
        );
        assert_eq!(score.value, 0.75);
    }

    #[test]
    fn test_response_length_band_edges() {
        assert_eq!(response_length(&"x".repeat(50)).value, 1.0);
        assert_eq!(response_length(&"x".repeat(500)).value, 1.0);
        assert_eq!(response_length(&"x".repeat(250)).value, 1.0);
    }

    #[test]
    fn test_response_length_short_ramp() {
        assert_eq!(response_length(&"x".repeat(25)).value, 0.5);
        assert_eq!(response_length("x").value, 0.02);
        assert_eq!(response_length("").value, 0.0);
    }

    #[test]
    fn test_response_length_long_decay_and_floor() {
        let score = response_length(&"x".repeat(1000));
        assert_eq!(score.name, "response_length");
        assert_eq!(score.value, 0.5);
        assert_eq!(response_length(&"x".repeat(10_000)).value, 0.2);
        assert_eq!(response_length(&"x".repeat(2500)).value, 0.2);
    }

    #[test]
    fn test_response_length_counts_characters_not_bytes() {
        // 50 two-byte characters
        assert_eq!(response_length(&"é".repeat(50)).value, 1.0);
        assert_eq!(response_length(&"é".repeat(25)).value, 0.5);
    }

    #[test]
    fn test_scores_stay_in_unit_range() {
        for len in [1, 7, 49, 50, 51, 499, 501, 777, 5000, 100_000] {
            let value = response_length(&"y".repeat(len)).value;
            assert!((0.0..=1.0).contains(&value), "length {} scored {}", len, value);
        }
        let value = keyword_overlap("alpha beta gamma delta", "alpha gamma epsilon").value;
        assert!((0.0..=1.0).contains(&value));
    }

    #[test]
    fn test_mean() {
        assert_eq!(mean(&[]), 0.0);
        assert_eq!(mean(&[0.5]), 0.5);
        assert!((mean(&[0.8, 0.6, 0.8]) - 0.7333333333333333).abs() < 1e-9);
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(2.0 / 3.0, 2), 0.67);
        assert_eq!(round_to(0.125, 2), 0.12);
        assert_eq!(round_to(0.7333333, 3), 0.733);
        assert_eq!(round_to(1.0, 2), 1.0);
    }

    #[test]
    fn test_round_to_uses_exact_binary_value() {
        // 0.5475 is stored just below the tie, scaling by 1000 pushes it above
        assert_eq!(round_to(mean(&[0.69, 0.7, 0.29, 0.51]), 3), 0.547);
        assert_eq!(round_to(2.675, 2), 2.67);
        assert_eq!(round_to(0.375, 2), 0.38);
        assert_eq!(round_to(0.0625, 3), 0.062);
    }

    #[test]
    fn test_keyword_overlap_rounds_one_in_forty_up() {
        let expected = (0..40).map(|i| format!("word{}", i)).collect::<Vec<_>>().join(" ");
        // 1/40 is stored just above 0.025
        assert_eq!(keyword_overlap("word0", &expected).value, 0.03);
    }
}
