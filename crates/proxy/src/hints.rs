//! Exploration hints for large payloads.
//!
//! Inspects the shape of a response and emits concrete follow-up drill-in
//! calls: projections for objects, pagination for arrays, searches for long
//! plain text. Best-effort throughout; a payload the hinter cannot make
//! sense of simply produces no hints.

use serde_json::{Value, json};

use crate::content::Item;

/// Placeholder substituted with the real cache id when one is known.
const CACHE_ID_PLACEHOLDER: &str = "<CACHE_ID_FROM_TRUNCATED_RESPONSE>";

/// Payloads at or below this size are not worth drilling into.
const HINT_SIZE_THRESHOLD: usize = 10_000;

/// Plain text needs this many lines before a search is suggested.
const TEXT_LINE_THRESHOLD: usize = 100;

/// Shape-driven hint generator for oversized responses.
#[derive(Debug, Clone)]
pub struct ExplorationHinter {
    size_threshold: usize,
}

impl ExplorationHinter {
    /// Creates a hinter with the default size gate.
    pub fn new() -> Self {
        Self {
            size_threshold: HINT_SIZE_THRESHOLD,
        }
    }

    /// Builds the `rlm_hints` metadata object for this content, or `None`
    /// when the payload is small or shapeless enough to not need hints.
    pub fn exploration_metadata(&self, items: &[Item], cache_id: Option<&str>) -> Option<Value> {
        if crate::content::measure(items) <= self.size_threshold {
            return None;
        }

        let mut strategies = Vec::new();
        let mut estimated_savings: u64 = 0;

        for item in items {
            let Some(text) = item.as_text() else { continue };

            match serde_json::from_str::<Value>(text) {
                Ok(Value::Object(map)) => {
                    let keys: Vec<&String> = map.keys().collect();
                    let shown: Vec<&&String> = keys.iter().take(10).collect();
                    let example_fields: Vec<&&String> = keys.iter().take(3).collect();

                    strategies.push(json!({
                        "type": "proxy_filter",
                        "description": "Use proxy_filter to project specific fields from the cached result",
                        "available_fields": shown,
                        "total_fields": keys.len(),
                        "example": {
                            "tool": "proxy_filter",
                            "arguments": {
                                "cache_id": CACHE_ID_PLACEHOLDER,
                                "fields": example_fields,
                                "mode": "include",
                            },
                        },
                    }));

                    let array_fields: Vec<&String> = map
                        .iter()
                        .filter(|(_, v)| v.is_array())
                        .map(|(k, _)| k)
                        .collect();
                    if let Some(first_array) = array_fields.first() {
                        strategies.push(json!({
                            "type": "proxy_filter_array",
                            "description": "Use proxy_filter to explore array fields element by element",
                            "array_fields": array_fields,
                            "example": {
                                "tool": "proxy_filter",
                                "arguments": {
                                    "cache_id": CACHE_ID_PLACEHOLDER,
                                    "fields": [
                                        format!("{first_array}.id"),
                                        format!("{first_array}.name"),
                                    ],
                                    "mode": "include",
                                },
                            },
                        }));
                    }

                    let full_size = text.chars().count() as u64;
                    let projected = full_size / keys.len().max(1) as u64 * 3;
                    estimated_savings = estimated_savings.max(full_size.saturating_sub(projected));
                }
                Ok(Value::Array(elements)) => {
                    strategies.push(json!({
                        "type": "list_pagination",
                        "description": "Use proxy_filter or proxy_explore to process the list in chunks",
                        "list_length": elements.len(),
                        "example": {
                            "tool": "proxy_explore",
                            "arguments": {
                                "cache_id": CACHE_ID_PLACEHOLDER,
                                "max_depth": 2,
                            },
                        },
                    }));
                }
                // Parseable scalars carry no structure worth suggesting.
                Ok(_) => {}
                Err(_) => {
                    let lines = text.split('\n').count();
                    if lines > TEXT_LINE_THRESHOLD {
                        strategies.push(json!({
                            "type": "proxy_search",
                            "description": "Use proxy_search to search within the large cached text",
                            "total_lines": lines,
                            "example": {
                                "tool": "proxy_search",
                                "arguments": {
                                    "cache_id": CACHE_ID_PLACEHOLDER,
                                    "pattern": "ERROR|WARN",
                                    "mode": "regex",
                                    "max_results": 20,
                                    "context_lines": 2,
                                },
                            },
                        }));

                        let full_size = text.chars().count() as u64;
                        estimated_savings = estimated_savings.max(full_size.saturating_sub(2000));
                    }
                }
            }
        }

        if strategies.is_empty() {
            return None;
        }

        let next_steps: Vec<Value> = strategies
            .iter()
            .filter_map(|strategy| {
                let example = strategy.get("example")?;
                let tool = example.get("tool")?.clone();
                let mut arguments = example.get("arguments").cloned().unwrap_or(json!({}));

                if let Some(cache_id) = cache_id
                    && let Some(slot) = arguments.get_mut("cache_id")
                {
                    *slot = json!(cache_id);
                }

                Some(json!({
                    "tool": tool,
                    "when": strategy.get("description").cloned().unwrap_or(json!("")),
                    "arguments": arguments,
                }))
            })
            .collect();

        Some(json!({
            "rlm_hints": {
                "recursive_exploration_available": true,
                "strategies": strategies,
                "next_steps": next_steps,
                "estimated_token_savings": estimated_savings,
                "hint": "This response is large. Consider using exactly one of the proxy tools \
                         `proxy_filter`, `proxy_search`, or `proxy_explore` with the provided \
                         cache_id, based on the suggested next_steps.",
            }
        }))
    }
}

impl Default for ExplorationHinter {
    fn default() -> Self {
        Self::new()
    }
}
