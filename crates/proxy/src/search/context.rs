//! Whole-unit extraction around matches.
//!
//! Instead of single lines, this mode returns the paragraph, section,
//! sentence or line containing each match, with a per-unit hit count.

use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};

use crate::content::Item;
use crate::error::ProxyError;
use crate::search::SearchSpec;

/// The unit of text a contextual match expands to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContextType {
    /// Blocks separated by blank lines.
    #[default]
    Paragraph,
    /// Runs of lines opened by a heading-like line.
    Section,
    /// Sentences split on `.!?` followed by whitespace.
    Sentence,
    /// Individual lines.
    Lines,
}

impl ContextType {
    /// Parses a unit name, defaulting unknown names to line granularity,
    /// mirroring the permissive behavior of the tool surface.
    pub fn parse(name: &str) -> Self {
        match name {
            "paragraph" => Self::Paragraph,
            "section" => Self::Section,
            "sentence" => Self::Sentence,
            _ => Self::Lines,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Paragraph => "paragraph",
            Self::Section => "section",
            Self::Sentence => "sentence",
            Self::Lines => "lines",
        }
    }

    fn capitalized(self) -> &'static str {
        match self {
            Self::Paragraph => "Paragraph",
            Self::Section => "Section",
            Self::Sentence => "Sentence",
            Self::Lines => "Lines",
        }
    }
}

static SENTENCE_SPLIT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[.!?]+\s+").unwrap_or_else(|_| unreachable!("static pattern"))
});

/// Heading-like lines open a new section when they fit on a short line.
const SECTION_HEADING_MAX: usize = 100;

pub(super) fn apply(items: &[Item], spec: &SearchSpec) -> Vec<Item> {
    if spec.pattern.is_empty() {
        return vec![Item::text("Error: Context search requires 'pattern' parameter")];
    }

    let regex = match RegexBuilder::new(&spec.pattern).case_insensitive(true).build() {
        Ok(regex) => regex,
        Err(err) => {
            return ProxyError::Pattern {
                pattern: spec.pattern.clone(),
                message: err.to_string(),
            }
            .into_items();
        }
    };

    let max_matches = spec.max_matches.unwrap_or(5);
    let mut results = Vec::new();

    for item in items {
        let Some(text) = item.as_text() else { continue };

        let units = split_units(text, spec.context_type);
        let mut matched = Vec::new();

        for (unit, _id) in units {
            if regex.is_match(&unit) {
                let hits = regex.find_iter(&unit).count();
                matched.push((unit, hits));
                if matched.len() >= max_matches {
                    break;
                }
            }
        }

        if matched.is_empty() {
            continue;
        }

        let mut out = format!(
            "Context Search Results (pattern: '{}', context: {}):\n\n",
            spec.pattern,
            spec.context_type.label()
        );
        for (i, (unit, hits)) in matched.iter().enumerate() {
            out.push_str(&format!(
                "=== {} {} ({} match(es)) ===\n",
                spec.context_type.capitalized(),
                i + 1,
                hits
            ));
            out.push_str(unit);
            out.push_str("\n\n");
        }
        results.push(Item::Text(out));
    }

    if results.is_empty() {
        vec![Item::text("No contextual matches found.")]
    } else {
        results
    }
}

/// Splits text into `(unit, index)` pairs for the requested granularity.
pub fn split_units(text: &str, context_type: ContextType) -> Vec<(String, usize)> {
    match context_type {
        ContextType::Paragraph => text
            .split("\n\n")
            .enumerate()
            .filter(|(_, p)| !p.trim().is_empty())
            .map(|(i, p)| (p.trim().to_string(), i))
            .collect(),
        ContextType::Section => split_sections(text),
        ContextType::Sentence => SENTENCE_SPLIT
            .split(text)
            .enumerate()
            .filter(|(_, s)| !s.trim().is_empty())
            .map(|(i, s)| (s.trim().to_string(), i))
            .collect(),
        ContextType::Lines => text
            .split('\n')
            .enumerate()
            .map(|(i, line)| (line.to_string(), i))
            .collect(),
    }
}

fn split_sections(text: &str) -> Vec<(String, usize)> {
    let mut sections = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut section_id = 0usize;

    for line in text.split('\n') {
        let is_heading = line.starts_with('#')
            || (line
                .chars()
                .next()
                .is_some_and(char::is_uppercase)
                && line.chars().count() < SECTION_HEADING_MAX);

        if is_heading {
            if !current.is_empty() {
                sections.push((current.join("\n"), section_id));
                section_id += 1;
            }
            current = vec![line];
        } else {
            current.push(line);
        }
    }

    if !current.is_empty() {
        sections.push((current.join("\n"), section_id));
    }

    sections
}

#[cfg(test)]
mod tests {
    use super::{ContextType, apply, split_units};
    use crate::content::Item;
    use crate::search::{SearchMode, SearchSpec};

    fn spec(pattern: &str, context_type: ContextType) -> SearchSpec {
        SearchSpec {
            mode: SearchMode::Context,
            pattern: pattern.to_string(),
            context_type,
            ..SearchSpec::default()
        }
    }

    #[test]
    fn paragraphs_split_on_blank_lines() {
        let units = split_units("first block\nstill first\n\nsecond block", ContextType::Paragraph);

        assert_eq!(units.len(), 2);
        assert_eq!(units[0].0, "first block\nstill first");
        assert_eq!(units[1].0, "second block");
    }

    #[test]
    fn sentences_split_on_terminators() {
        let units = split_units("One here. Two there! Three? Done", ContextType::Sentence);
        assert_eq!(units.len(), 4);
        assert_eq!(units[2].0, "Three");
    }

    #[test]
    fn sections_open_on_headings() {
        let text = "# Intro\nbody a\nDetails\nbody b";
        let units = split_units(text, ContextType::Section);

        assert_eq!(units.len(), 2);
        assert!(units[0].0.starts_with("# Intro"));
        assert!(units[1].0.starts_with("Details"));
    }

    #[test]
    fn matching_paragraph_is_returned_whole() {
        let text = "irrelevant intro\n\nthe ERROR lives here\nwith a second line\n\ntail";
        let items = vec![Item::Text(text.to_string())];

        let result = apply(&items, &spec("ERROR", ContextType::Paragraph));
        let out = result[0].as_text().unwrap();

        assert!(out.contains("=== Paragraph 1 (1 match(es)) ==="));
        assert!(out.contains("the ERROR lives here\nwith a second line"));
        assert!(!out.contains("irrelevant intro"));
    }

    #[test]
    fn hit_count_per_unit() {
        let items = vec![Item::text("ERROR one ERROR two ERROR three")];
        let result = apply(&items, &spec("ERROR", ContextType::Paragraph));

        assert!(result[0].as_text().unwrap().contains("(3 match(es))"));
    }

    #[test]
    fn max_matches_caps_units() {
        let text = (0..10)
            .map(|i| format!("hit {i}"))
            .collect::<Vec<_>>()
            .join("\n\n");
        let items = vec![Item::Text(text)];

        let mut s = spec("hit", ContextType::Paragraph);
        s.max_matches = Some(2);

        let out = apply(&items, &s)[0].as_text().unwrap().to_string();
        assert!(out.contains("Paragraph 2"));
        assert!(!out.contains("Paragraph 3"));
    }

    #[test]
    fn no_match_reports_in_band() {
        let items = vec![Item::text("nothing here")];
        let result = apply(&items, &spec("ERROR", ContextType::Paragraph));

        assert_eq!(result[0].as_text().unwrap(), "No contextual matches found.");
    }
}
