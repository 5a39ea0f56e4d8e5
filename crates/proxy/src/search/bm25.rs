//! Okapi BM25 ranking over fixed-size overlapping chunks.
//!
//! Ranks chunks by relevance to the query instead of mere term presence and
//! returns the top-k with score annotations. The IDF term uses the `+1`
//! floor so rare-but-present terms never go negative.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::content::Item;
use crate::search::SearchSpec;

const K1: f64 = 1.5;
const B: f64 = 0.75;

static WORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\w+").unwrap_or_else(|_| unreachable!("static pattern"))
});

pub(super) fn apply(items: &[Item], spec: &SearchSpec) -> Vec<Item> {
    if spec.pattern.is_empty() {
        return vec![Item::text("Error: BM25 search requires 'query' parameter")];
    }

    let mut results = Vec::new();

    for item in items {
        let Some(text) = item.as_text() else { continue };

        // Pretty-print parseable JSON so chunk boundaries fall on readable
        // lines instead of one long serialized blob.
        let text = match serde_json::from_str::<Value>(text) {
            Ok(data) => serde_json::to_string_pretty(&data).unwrap_or_else(|_| text.to_string()),
            Err(_) => text.to_string(),
        };

        let ranked = rank_chunks(&text, &spec.pattern, spec.chunk_size, spec.top_k);
        if ranked.is_empty() {
            continue;
        }

        let mut out = format!(
            "BM25 Search Results (query: '{}', top {} of {}):\n\n",
            spec.pattern,
            ranked.len(),
            spec.top_k
        );
        for (i, chunk) in ranked.iter().enumerate() {
            out.push_str(&format!("=== Result {} (Score: {:.4}) ===\n", i + 1, chunk.score));
            out.push_str(&chunk.text);
            out.push_str("\n\n");
        }
        results.push(Item::Text(out));
    }

    if results.is_empty() {
        vec![Item::text("No relevant results found.")]
    } else {
        results
    }
}

/// One scored chunk, ordered by score descending then chunk index ascending.
#[derive(Debug)]
pub struct ScoredChunk {
    /// The chunk text.
    pub text: String,
    /// BM25 score, always > 0 for returned chunks.
    pub score: f64,
    /// Position of the chunk in document order.
    pub index: usize,
}

/// Ranks overlapping chunks of `text` against `query`.
pub fn rank_chunks(text: &str, query: &str, chunk_size: usize, top_k: usize) -> Vec<ScoredChunk> {
    let chunks = create_chunks(text, chunk_size);
    if chunks.is_empty() {
        return Vec::new();
    }

    let query_terms = tokenize(query);
    let doc_count = chunks.len();
    let avg_len = chunks.iter().map(String::len).sum::<usize>() as f64 / doc_count as f64;

    let chunk_tokens: Vec<Vec<String>> = chunks.iter().map(|c| tokenize(c)).collect();

    // Document frequency per query term.
    let mut doc_freq: HashMap<&str, usize> = HashMap::new();
    for term in &query_terms {
        let df = chunk_tokens
            .iter()
            .filter(|tokens| tokens.iter().any(|t| t == term))
            .count();
        doc_freq.insert(term, df);
    }

    let mut scored: Vec<ScoredChunk> = chunks
        .iter()
        .zip(&chunk_tokens)
        .enumerate()
        .filter_map(|(index, (chunk, tokens))| {
            let score = score_chunk(tokens, &query_terms, &doc_freq, doc_count, avg_len);
            (score > 0.0).then(|| ScoredChunk {
                text: chunk.clone(),
                score,
                index,
            })
        })
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.index.cmp(&b.index))
    });
    scored.truncate(top_k);
    scored
}

/// Splits text into chunks of `chunk_size` characters overlapping by a
/// quarter of the chunk size. Whitespace-only chunks are dropped.
fn create_chunks(text: &str, chunk_size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let overlap = chunk_size / 4;
    let step = chunk_size.saturating_sub(overlap).max(1);

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + chunk_size).min(chars.len());
        let chunk: String = chars[start..end].iter().collect();
        if !chunk.trim().is_empty() {
            chunks.push(chunk);
        }
        start += step;
    }
    chunks
}

fn tokenize(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    WORD.find_iter(&lower).map(|m| m.as_str().to_string()).collect()
}

fn score_chunk(
    chunk_tokens: &[String],
    query_terms: &[String],
    doc_freq: &HashMap<&str, usize>,
    doc_count: usize,
    avg_doc_len: f64,
) -> f64 {
    let chunk_len = chunk_tokens.len() as f64;

    let mut term_freq: HashMap<&str, usize> = HashMap::new();
    for token in chunk_tokens {
        *term_freq.entry(token).or_default() += 1;
    }

    let mut score = 0.0;
    for term in query_terms {
        let tf = term_freq.get(term.as_str()).copied().unwrap_or(0) as f64;
        if tf == 0.0 {
            continue;
        }
        let df = doc_freq.get(term.as_str()).copied().unwrap_or(0) as f64;
        if df == 0.0 {
            continue;
        }

        let idf = ((doc_count as f64 - df + 0.5) / (df + 0.5) + 1.0).ln();
        score += idf * (tf * (K1 + 1.0)) / (tf + K1 * (1.0 - B + B * chunk_len / avg_doc_len));
    }
    score
}

#[cfg(test)]
mod tests {
    use super::{apply, create_chunks, rank_chunks};
    use crate::content::Item;
    use crate::search::{SearchMode, SearchSpec};

    fn spec(query: &str, top_k: usize) -> SearchSpec {
        SearchSpec {
            mode: SearchMode::Bm25,
            pattern: query.to_string(),
            top_k,
            ..SearchSpec::default()
        }
    }

    #[test]
    fn chunks_overlap_by_a_quarter() {
        let text = "x".repeat(1000);
        let chunks = create_chunks(&text, 400);

        // Step is 300, so chunks start at 0, 300, 600, 900.
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[0].len(), 400);
        assert_eq!(chunks[3].len(), 100);
    }

    #[test]
    fn relevant_chunk_ranks_first() {
        let filler = "the quick brown fox jumps over the lazy dog. ".repeat(30);
        let text = format!(
            "{filler}\n\nA database timeout occurred while committing the \
             transaction, and the database timeout was retried twice.\n\n{filler}"
        );

        let ranked = rank_chunks(&text, "database timeout", 200, 3);
        assert!(!ranked.is_empty());
        assert!(ranked[0].score > 0.0);
        assert!(ranked[0].text.contains("database timeout"));
    }

    #[test]
    fn top_k_bounds_results_in_score_order() {
        let text = "apple banana. ".repeat(100);
        let ranked = rank_chunks(&text, "apple", 50, 4);

        assert!(ranked.len() <= 4);
        for pair in ranked.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn ties_prefer_lower_chunk_index() {
        let text = "same words here. ".repeat(40);
        let ranked = rank_chunks(&text, "same words", 80, 10);

        for pair in ranked.windows(2) {
            if (pair[0].score - pair[1].score).abs() < f64::EPSILON {
                assert!(pair[0].index < pair[1].index);
            }
        }
    }

    #[test]
    fn no_match_reports_in_band() {
        let items = vec![Item::text("nothing relevant whatsoever")];
        let result = apply(&items, &spec("zebra", 5));

        assert_eq!(result[0].as_text().unwrap(), "No relevant results found.");
    }

    #[test]
    fn result_header_echoes_query() {
        let items = vec![Item::text("the zebra ran far away ".repeat(20))];
        let result = apply(&items, &spec("zebra", 2));

        let text = result[0].as_text().unwrap();
        assert!(text.starts_with("BM25 Search Results (query: 'zebra'"));
        assert!(text.contains("=== Result 1 (Score:"));
    }

    #[test]
    fn missing_query_is_an_error_item() {
        let items = vec![Item::text("data")];
        let result = apply(&items, &spec("", 5));

        assert_eq!(
            result[0].as_text().unwrap(),
            "Error: BM25 search requires 'query' parameter"
        );
    }
}
