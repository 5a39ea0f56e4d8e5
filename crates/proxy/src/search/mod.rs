//! Search over cached or fresh tool responses.
//!
//! Five modes: line/multiline regex, BM25 chunk ranking, fuzzy matching,
//! contextual-unit extraction and structure summarizing. Each mode skips
//! non-text items and reports "no matches" in band rather than failing.

pub mod bm25;
pub mod context;
pub mod fuzzy;
mod regex_search;
pub mod structure;

pub use context::ContextType;

use crate::content::Item;

/// Search mode selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    /// Line-oriented (or multiline) regular-expression search.
    Regex,
    /// Okapi BM25 relevance ranking over overlapping chunks.
    Bm25,
    /// Approximate matching by Levenshtein similarity.
    Fuzzy,
    /// Whole-unit (paragraph/section/sentence/line) extraction.
    Context,
    /// Structural summary of parseable data.
    Structure,
}

impl SearchMode {
    /// Parses a mode name. Unknown names yield `None`; the caller reports
    /// the supported set in band.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "regex" => Some(Self::Regex),
            "bm25" => Some(Self::Bm25),
            "fuzzy" => Some(Self::Fuzzy),
            "context" => Some(Self::Context),
            "structure" => Some(Self::Structure),
            _ => None,
        }
    }

    /// The supported mode names, for error messages.
    pub const SUPPORTED: &'static str = "regex, bm25, fuzzy, context, structure";
}

/// What the regex engine scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchTarget {
    /// The raw text of each item.
    #[default]
    Content,
    /// Keys and string values of items that parse as structured data;
    /// matching subtrees are re-emitted as JSON.
    StructuredContent,
}

/// A fully-resolved search request.
#[derive(Debug, Clone)]
pub struct SearchSpec {
    /// Which engine runs.
    pub mode: SearchMode,
    /// Regex pattern or ranking query, depending on the mode.
    pub pattern: String,
    /// What the regex engine scans.
    pub target: SearchTarget,
    /// Cap on matches (regex/fuzzy/context).
    pub max_matches: Option<usize>,
    /// Context lines before each regex match.
    pub context_before: usize,
    /// Context lines after each regex match.
    pub context_after: usize,
    /// Case-insensitive regex matching.
    pub case_insensitive: bool,
    /// Whole-match regex mode: dot matches newlines, anchors per line.
    pub multiline: bool,
    /// Similarity threshold for fuzzy matching, 0..1.
    pub threshold: f64,
    /// Number of chunks returned by BM25.
    pub top_k: usize,
    /// BM25 chunk size in characters.
    pub chunk_size: usize,
    /// Unit used by context extraction.
    pub context_type: ContextType,
    /// Depth limit for structure summaries.
    pub max_depth: usize,
}

impl Default for SearchSpec {
    fn default() -> Self {
        Self {
            mode: SearchMode::Regex,
            pattern: String::new(),
            target: SearchTarget::default(),
            max_matches: None,
            context_before: 0,
            context_after: 0,
            case_insensitive: false,
            multiline: false,
            threshold: 0.7,
            top_k: 5,
            chunk_size: 500,
            context_type: ContextType::Paragraph,
            max_depth: 3,
        }
    }
}

/// Runs the requested search over the content list.
pub fn search_items(items: &[Item], spec: &SearchSpec) -> Vec<Item> {
    match spec.mode {
        SearchMode::Regex => regex_search::apply(items, spec),
        SearchMode::Bm25 => bm25::apply(items, spec),
        SearchMode::Fuzzy => fuzzy::apply(items, spec),
        SearchMode::Context => context::apply(items, spec),
        SearchMode::Structure => structure::apply(items, spec),
    }
}

#[cfg(test)]
mod tests {
    use super::{SearchMode, SearchSpec, search_items};
    use crate::content::Item;

    #[test]
    fn mode_parsing() {
        assert_eq!(SearchMode::parse("regex"), Some(SearchMode::Regex));
        assert_eq!(SearchMode::parse("bm25"), Some(SearchMode::Bm25));
        assert_eq!(SearchMode::parse("grep"), None);
    }

    #[test]
    fn empty_content_reports_no_matches() {
        let spec = SearchSpec {
            pattern: "x".to_string(),
            ..SearchSpec::default()
        };
        let result = search_items(&[], &spec);

        assert_eq!(result.len(), 1);
        assert_eq!(result[0].as_text().unwrap(), "No matches found.");
    }

    #[test]
    fn search_runs_per_mode() {
        let items = vec![Item::text("alpha\nbeta\ngamma")];

        for (mode, needle) in [
            (SearchMode::Regex, "beta"),
            (SearchMode::Fuzzy, "Fuzzy Search Results"),
            (SearchMode::Context, "Context Search Results"),
        ] {
            let spec = SearchSpec {
                mode,
                pattern: "beta".to_string(),
                ..SearchSpec::default()
            };
            let result = search_items(&items, &spec);
            assert!(
                result[0].as_text().unwrap().contains(needle),
                "mode {mode:?} output: {:?}",
                result[0]
            );
        }
    }
}
