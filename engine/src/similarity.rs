//! Lightweight text similarity
//!
//! Token-set similarity used wherever the loop needs approximate matching:
//! source relevance, plan alignment, memory ranking and lesson grouping all
//! go through these functions so they agree on what "similar" means.

use std::collections::HashSet;

const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "of", "to", "in", "on", "for", "with", "is", "are", "be", "by",
    "at", "it", "this", "that", "from", "as", "into", "then", "than", "was", "were",
];

/// Lowercase alphanumeric tokens, stop words and single characters removed
pub fn tokenize(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() > 1)
        .map(|t| t.to_lowercase())
        .filter(|t| !STOP_WORDS.contains(&t.as_str()))
        .collect()
}

/// Jaccard similarity of two token sets, `[0, 1]`
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    intersection as f64 / union as f64
}

/// Fraction of `query` tokens that appear in `doc`, `[0, 1]`
pub fn coverage(query: &HashSet<String>, doc: &HashSet<String>) -> f64 {
    if query.is_empty() {
        return 0.0;
    }
    query.intersection(doc).count() as f64 / query.len() as f64
}

/// Jaccard similarity of two texts
pub fn text_similarity(a: &str, b: &str) -> f64 {
    jaccard(&tokenize(a), &tokenize(b))
}

/// Relevance of `doc` to `query`: mostly coverage, with a Jaccard term so
/// shorter, tighter matches win ties
pub fn relevance(query: &str, doc: &str) -> f64 {
    let q = tokenize(query);
    let d = tokenize(doc);
    (0.7 * coverage(&q, &d) + 0.3 * jaccard(&q, &d)).clamp(0.0, 1.0)
}
