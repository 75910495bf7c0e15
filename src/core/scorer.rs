//! Keyword heuristic that scores evidence content.
//!
//! Pure and deterministic: the result depends only on `source` and `excerpt`.

use crate::domain::EvidenceStatus;

/// Lowest possible score
pub const SCORE_MIN: i32 = -5;

/// Highest possible score
pub const SCORE_MAX: i32 = 10;

/// Scores at or above this are verified
pub const VERIFY_THRESHOLD: i32 = 2;

/// Reason recorded with a verified verdict
pub const REASON_VERIFIED: &str = "consistency ok";

/// Reason recorded with a rejected verdict
pub const REASON_REJECTED: &str = "weak or ambiguous";

const SCHOLARLY: &[&str] = &["doi", "journal", "paper"];
const BOOK: &[&str] = &["livro", "book"];
const ENCYCLOPEDIA: &[&str] = &["wikipedia"];

const LONG_EXCERPT_CHARS: usize = 250;
const SHORT_EXCERPT_CHARS: usize = 40;

/// Compute the confidence score for a piece of evidence.
///
/// Keywords are matched case-insensitively against `source` and `excerpt`
/// joined by a space, so a keyword never straddles the two fields. Each
/// keyword group counts once. Excerpt length is measured in Unicode scalar
/// values, so a character outside the BMP counts once, not as two UTF-16 units.
pub fn score_evidence(source: &str, excerpt: &str) -> i32 {
    let haystack = format!("{} {}", source, excerpt).to_lowercase();
    let mentions = |words: &[&str]| words.iter().any(|w| haystack.contains(w));

    let mut score = 0;

    if mentions(SCHOLARLY) {
        score += 4;
    }
    if mentions(BOOK) {
        score += 3;
    }
    if mentions(ENCYCLOPEDIA) {
        score -= 2;
    }

    let excerpt_len = excerpt.chars().count();
    if excerpt_len > LONG_EXCERPT_CHARS {
        score += 2;
    }
    if excerpt_len < SHORT_EXCERPT_CHARS {
        score -= 2;
    }

    score.clamp(SCORE_MIN, SCORE_MAX)
}

/// Outcome of scoring one evidence record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub score: i32,
    pub status: EvidenceStatus,
    pub reason: &'static str,
}

impl Verdict {
    /// Map a score to its terminal status and fixed reason
    pub fn from_score(score: i32) -> Self {
        if score >= VERIFY_THRESHOLD {
            Self {
                score,
                status: EvidenceStatus::Verified,
                reason: REASON_VERIFIED,
            }
        } else {
            Self {
                score,
                status: EvidenceStatus::Rejected,
                reason: REASON_REJECTED,
            }
        }
    }

    /// Score and judge in one step
    pub fn evaluate(source: &str, excerpt: &str) -> Self {
        Self::from_score(score_evidence(source, excerpt))
    }

    pub fn is_verified(&self) -> bool {
        self.status == EvidenceStatus::Verified
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doi_with_long_excerpt() {
        let excerpt = "a".repeat(300);
        assert_eq!(score_evidence("doi:10.1000/182", &excerpt), 6);
    }

    #[test]
    fn test_scholarly_keywords_count_once() {
        let excerpt = "x".repeat(100);
        assert_eq!(score_evidence("doi journal paper", &excerpt), 4);
    }

    #[test]
    fn test_case_insensitive() {
        let excerpt = "x".repeat(100);
        assert_eq!(score_evidence("JOURNAL", &excerpt), 4);
        assert_eq!(score_evidence("Livro", &excerpt), 3);
        assert_eq!(score_evidence("WikiPedia", &excerpt), -2);
    }

    #[test]
    fn test_keyword_in_excerpt() {
        let excerpt = format!("as seen in this book {}", "y".repeat(60));
        assert_eq!(score_evidence("somewhere", &excerpt), 3);
    }

    #[test]
    fn test_short_wikipedia() {
        assert_eq!(score_evidence("wikipedia", "short"), -4);
    }

    #[test]
    fn test_length_boundaries() {
        // Exactly 40 and 250 characters are neutral
        assert_eq!(score_evidence("x", &"a".repeat(40)), 0);
        assert_eq!(score_evidence("x", &"a".repeat(39)), -2);
        assert_eq!(score_evidence("x", &"a".repeat(250)), 0);
        assert_eq!(score_evidence("x", &"a".repeat(251)), 2);
    }

    #[test]
    fn test_length_counts_characters_not_bytes() {
        // 30 two-byte characters: 60 bytes but still short
        let excerpt = "é".repeat(30);
        assert_eq!(score_evidence("x", &excerpt), -2);
    }

    #[test]
    fn test_every_trigger_stays_in_range() {
        let long = format!("doi journal paper livro book {}", "z".repeat(400));
        let top = score_evidence("paper book", &long);
        assert_eq!(top, 9);
        assert!((SCORE_MIN..=SCORE_MAX).contains(&top));

        let low = score_evidence("wikipedia wikipedia", "");
        assert_eq!(low, -4);
        assert!((SCORE_MIN..=SCORE_MAX).contains(&low));
    }

    #[test]
    fn test_verdict_threshold() {
        assert_eq!(Verdict::from_score(2).status, EvidenceStatus::Verified);
        assert_eq!(Verdict::from_score(1).status, EvidenceStatus::Rejected);
        assert_eq!(Verdict::from_score(-5).reason, REASON_REJECTED);
        assert!(Verdict::evaluate("Journal of X", &"A".repeat(300)).is_verified());
    }
}
