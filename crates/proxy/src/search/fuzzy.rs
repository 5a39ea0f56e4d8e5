//! Approximate matching by Levenshtein similarity.
//!
//! A window of pattern length slides across the text. A cheap character
//! frequency pre-filter rejects windows that cannot be close enough; the
//! final decision is always the Levenshtein similarity itself. On a hit the
//! scan skips past the window to avoid overlapping matches.

use std::collections::HashMap;

use crate::content::Item;
use crate::search::SearchSpec;

/// Characters of surrounding context captured on each side of a match.
const CONTEXT_CHARS: usize = 50;

pub(super) fn apply(items: &[Item], spec: &SearchSpec) -> Vec<Item> {
    if spec.pattern.is_empty() {
        return vec![Item::text("Error: Fuzzy search requires 'pattern' parameter")];
    }

    let max_matches = spec.max_matches.unwrap_or(10);
    let mut results = Vec::new();

    for item in items {
        let Some(text) = item.as_text() else { continue };

        let matches = fuzzy_search(text, &spec.pattern, spec.threshold, max_matches);
        if matches.is_empty() {
            continue;
        }

        let mut out = format!(
            "Fuzzy Search Results (pattern: '{}', threshold: {}):\n\n",
            spec.pattern, spec.threshold
        );
        for (i, m) in matches.iter().enumerate() {
            out.push_str(&format!(
                "=== Match {} (Similarity: {:.2}%) ===\n",
                i + 1,
                m.similarity * 100.0
            ));
            out.push_str(&format!("Found: \"{}\"\n", m.text));
            out.push_str(&format!("Context: ...{}...\n\n", m.context));
        }
        results.push(Item::Text(out));
    }

    if results.is_empty() {
        vec![Item::text("No fuzzy matches found.")]
    } else {
        results
    }
}

/// One approximate match.
#[derive(Debug)]
pub struct FuzzyMatch {
    /// The matched window.
    pub text: String,
    /// Similarity in 0..1, always >= the requested threshold.
    pub similarity: f64,
    /// Character offset of the window.
    pub position: usize,
    /// Window text with surrounding context.
    pub context: String,
}

/// Scans `text` for windows similar to `pattern`, sorted by similarity
/// descending and capped at `max_matches`.
pub fn fuzzy_search(text: &str, pattern: &str, threshold: f64, max_matches: usize) -> Vec<FuzzyMatch> {
    let text_chars: Vec<char> = text.chars().collect();
    let pattern_chars: Vec<char> = pattern.chars().collect();
    let pattern_len = pattern_chars.len();

    if pattern_len == 0 || text_chars.len() < pattern_len {
        return Vec::new();
    }

    let pattern_lower: Vec<char> = pattern.to_lowercase().chars().collect();
    let max_allowed_distance = ((1.0 - threshold) * pattern_len.max(1) as f64) as usize;

    let mut matches = Vec::new();
    let mut skip_until = 0usize;

    for i in 0..=(text_chars.len() - pattern_len) {
        if i < skip_until {
            continue;
        }

        let window = &text_chars[i..i + pattern_len];
        let window_lower: Vec<char> = window
            .iter()
            .flat_map(|c| c.to_lowercase())
            .collect();

        if !frequency_check(&pattern_lower, &window_lower, max_allowed_distance) {
            continue;
        }

        let similarity = similarity(&pattern_lower, &window_lower);
        if similarity >= threshold {
            let context_start = i.saturating_sub(CONTEXT_CHARS);
            let context_end = (i + pattern_len + CONTEXT_CHARS).min(text_chars.len());

            matches.push(FuzzyMatch {
                text: window.iter().collect(),
                similarity,
                position: i,
                context: text_chars[context_start..context_end].iter().collect(),
            });

            skip_until = i + pattern_len;
            if matches.len() >= max_matches {
                break;
            }
        }
    }

    matches.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    matches
}

/// Character-frequency pre-filter: rejects windows whose multiset distance
/// from the pattern already exceeds what the threshold allows. A heuristic
/// lower bound only; survivors still go through Levenshtein.
fn frequency_check(pattern: &[char], window: &[char], max_distance: usize) -> bool {
    let mut counts: HashMap<char, i64> = HashMap::new();
    for &c in pattern {
        *counts.entry(c).or_default() += 1;
    }
    for &c in window {
        *counts.entry(c).or_default() -= 1;
    }

    let diff: i64 = counts.values().map(|v| v.abs()).sum();
    diff as usize <= max_distance * 2
}

fn similarity(a: &[char], b: &[char]) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let distance = levenshtein(a, b);
    let max_len = a.len().max(b.len());
    1.0 - (distance as f64 / max_len as f64)
}

/// Two-row Levenshtein distance.
fn levenshtein(a: &[char], b: &[char]) -> usize {
    let (a, b) = if a.len() < b.len() { (b, a) } else { (a, b) };
    if b.is_empty() {
        return a.len();
    }

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];

    for (i, &ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let insertions = previous[j + 1] + 1;
            let deletions = current[j] + 1;
            let substitutions = previous[j] + usize::from(ca != cb);
            current[j + 1] = insertions.min(deletions).min(substitutions);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[b.len()]
}
