//! Regular-expression search with optional context windows.
//!
//! Single-line mode scans line by line and merges adjacent context windows;
//! non-adjacent windows are separated by a literal `---` line. Multiline
//! mode emits each whole match, joined by `\n---\n`. With the structured
//! target, parseable items are searched as trees and matching subtrees
//! re-emitted as JSON.

use std::collections::BTreeSet;

use regex::{Regex, RegexBuilder};
use serde_json::{Map, Value};

use crate::content::Item;
use crate::error::ProxyError;
use crate::search::{SearchSpec, SearchTarget};

pub(super) fn apply(items: &[Item], spec: &SearchSpec) -> Vec<Item> {
    if spec.pattern.is_empty() {
        return items.to_vec();
    }

    let regex = match RegexBuilder::new(&spec.pattern)
        .case_insensitive(spec.case_insensitive)
        .multi_line(spec.multiline)
        .dot_matches_new_line(spec.multiline)
        .build()
    {
        Ok(regex) => regex,
        Err(err) => {
            return ProxyError::Pattern {
                pattern: spec.pattern.clone(),
                message: err.to_string(),
            }
            .into_items();
        }
    };

    let mut filtered = Vec::new();
    let mut match_count = 0usize;

    for item in items {
        let Some(text) = item.as_text() else { continue };

        // Structured target: search keys and values of parseable payloads,
        // falling back to plain text search when parsing fails.
        if spec.target == SearchTarget::StructuredContent
            && let Ok(data) = serde_json::from_str::<Value>(text)
        {
            if let Some(matches) = search_in_structure(&data, &regex, spec.max_matches, match_count)
            {
                match_count += count_matches(&matches);
                if let Ok(rendered) = serde_json::to_string_pretty(&matches) {
                    filtered.push(Item::Text(rendered));
                }
            }

            if spec.max_matches.is_some_and(|max| match_count >= max) {
                break;
            }
            continue;
        }

        let (matched, count) = if spec.multiline {
            search_multiline(text, &regex, spec.max_matches, match_count)
        } else {
            search_lines(
                text,
                &regex,
                spec.max_matches,
                match_count,
                spec.context_before,
                spec.context_after,
            )
        };

        if !matched.is_empty() {
            filtered.push(Item::Text(matched));
            match_count += count;
        }

        if spec.max_matches.is_some_and(|max| match_count >= max) {
            break;
        }
    }

    if filtered.is_empty() {
        vec![Item::text("No matches found.")]
    } else {
        filtered
    }
}

/// Recursively collects entries whose key or string value matches.
///
/// Objects keep any entry with a matching key or value and any subtree that
/// itself produced matches; arrays keep matching strings and non-empty
/// subtree matches. Returns `None` when nothing matched.
fn search_in_structure(
    data: &Value,
    regex: &Regex,
    max_matches: Option<usize>,
    current_count: usize,
) -> Option<Value> {
    if max_matches.is_some_and(|max| current_count >= max) {
        return None;
    }

    match data {
        Value::Object(map) => {
            let mut matches = Map::new();
            let mut count = current_count;

            for (key, value) in map {
                if max_matches.is_some_and(|max| count >= max) {
                    break;
                }

                let key_matches = regex.is_match(key);
                let value_matches = value.as_str().is_some_and(|s| regex.is_match(s));

                if key_matches || value_matches {
                    matches.insert(key.clone(), value.clone());
                    count += 1;
                } else if (value.is_object() || value.is_array())
                    && let Some(nested) = search_in_structure(value, regex, max_matches, count)
                {
                    matches.insert(key.clone(), nested);
                    count += 1;
                }
            }

            (!matches.is_empty()).then_some(Value::Object(matches))
        }
        Value::Array(elements) => {
            let mut matches = Vec::new();
            let mut count = current_count;

            for element in elements {
                if max_matches.is_some_and(|max| count >= max) {
                    break;
                }

                if (element.is_object() || element.is_array())
                    && let Some(nested) = search_in_structure(element, regex, max_matches, count)
                {
                    matches.push(nested);
                    count += 1;
                } else if element.as_str().is_some_and(|s| regex.is_match(s)) {
                    matches.push(element.clone());
                    count += 1;
                }
            }

            (!matches.is_empty()).then_some(Value::Array(matches))
        }
        other => {
            let rendered = other.to_string();
            regex.is_match(rendered.trim_matches('"')).then(|| other.clone())
        }
    }
}

/// Counts leaves in a structured-match tree for the match cap.
fn count_matches(matches: &Value) -> usize {
    match matches {
        Value::Object(map) => map.values().map(count_matches).sum(),
        Value::Array(elements) => elements.len(),
        _ => 1,
    }
}

fn search_multiline(
    text: &str,
    regex: &Regex,
    max_matches: Option<usize>,
    current_count: usize,
) -> (String, usize) {
    let mut matches: Vec<&str> = regex.find_iter(text).map(|m| m.as_str()).collect();
    if matches.is_empty() {
        return (String::new(), 0);
    }

    if let Some(max) = max_matches {
        let remaining = max.saturating_sub(current_count);
        if remaining == 0 {
            return (String::new(), 0);
        }
        matches.truncate(remaining);
    }

    let count = matches.len();
    (matches.join("\n---\n"), count)
}

fn search_lines(
    text: &str,
    regex: &Regex,
    max_matches: Option<usize>,
    current_count: usize,
    context_before: usize,
    context_after: usize,
) -> (String, usize) {
    let lines: Vec<&str> = text.split('\n').collect();

    let mut matched: BTreeSet<usize> = lines
        .iter()
        .enumerate()
        .filter(|(_, line)| regex.is_match(line))
        .map(|(i, _)| i)
        .collect();

    if matched.is_empty() {
        return (String::new(), 0);
    }

    if let Some(max) = max_matches {
        let remaining = max.saturating_sub(current_count);
        if remaining == 0 {
            return (String::new(), 0);
        }
        matched = matched.into_iter().take(remaining).collect();
    }

    let mut included: BTreeSet<usize> = BTreeSet::new();
    let mut result_lines: Vec<&str> = Vec::new();
    let mut emitted = 0usize;

    for &index in &matched {
        for i in index.saturating_sub(context_before)..index {
            if included.insert(i) {
                result_lines.push(lines[i]);
            }
        }

        if included.insert(index) {
            result_lines.push(lines[index]);
            emitted += 1;
        }

        let end = (index + 1 + context_after).min(lines.len());
        for i in (index + 1)..end {
            if included.insert(i) {
                result_lines.push(lines[i]);
            }
        }

        // Separate non-adjacent windows; adjacent ones merge silently.
        if context_before > 0 || context_after > 0 {
            let next = matched.iter().find(|&&m| m > index);
            if let Some(&next) = next
                && next > index + context_after + 1
            {
                result_lines.push("---");
            }
        }
    }

    (result_lines.join("\n"), emitted)
}
