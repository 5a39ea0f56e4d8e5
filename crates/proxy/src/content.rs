//! Content model shared by every engine in this crate.
//!
//! Tool responses are lists of content items. Only text participates in
//! size accounting, truncation and searching; everything else (images,
//! embedded resources) is carried through untouched.

use rmcp::model::Content;
use serde_json::Value;

/// One element of a tool response.
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    /// UTF-8 text.
    Text(String),
    /// Any non-text content (images etc.), kept as the raw protocol value
    /// and never inspected.
    Opaque(Value),
}

impl Item {
    /// Creates a text item.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Returns the text of this item, if it is a text item.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Opaque(_) => None,
        }
    }
}

/// Total character count across all text items.
pub fn measure(items: &[Item]) -> usize {
    items
        .iter()
        .filter_map(Item::as_text)
        .map(|text| text.chars().count())
        .sum()
}

/// Concatenates text items and truncates the result to `max_chars`
/// characters. Opaque items contribute nothing to the preview.
pub fn preview(items: &[Item], max_chars: usize) -> String {
    let mut out = String::new();
    let mut taken = 0;

    for item in items {
        let Some(text) = item.as_text() else { continue };

        if taken >= max_chars {
            break;
        }

        for c in text.chars().take(max_chars - taken) {
            out.push(c);
            taken += 1;
        }
    }

    out
}

/// Converts internal items to protocol content for the client-facing result.
pub fn to_protocol(items: Vec<Item>) -> Vec<Content> {
    items
        .into_iter()
        .filter_map(|item| match item {
            Item::Text(text) => Some(Content::text(text)),
            Item::Opaque(value) => match serde_json::from_value::<Content>(value) {
                Ok(content) => Some(content),
                Err(err) => {
                    log::debug!("Dropping malformed opaque content item: {err}");
                    None
                }
            },
        })
        .collect()
}

/// Converts protocol content received from an upstream into internal items.
pub fn from_protocol_value(content: &[Value]) -> Vec<Item> {
    content
        .iter()
        .map(|value| {
            match value.get("type").and_then(Value::as_str) {
                Some("text") => {
                    let text = value.get("text").and_then(Value::as_str).unwrap_or_default();
                    Item::Text(text.to_string())
                }
                _ => Item::Opaque(value.clone()),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{Item, from_protocol_value, measure, preview};

    #[test]
    fn measure_counts_text_only() {
        let items = vec![
            Item::text("hello"),
            Item::Opaque(json!({"type": "image", "data": "aGk=", "mimeType": "image/png"})),
            Item::text("world"),
        ];
        assert_eq!(measure(&items), 10);
    }

    #[test]
    fn preview_concatenates_and_truncates() {
        let items = vec![Item::text("abcde"), Item::text("fghij")];
        assert_eq!(preview(&items, 7), "abcdefg");
        assert_eq!(preview(&items, 100), "abcdefghij");
    }

    #[test]
    fn preview_skips_opaque_items() {
        let items = vec![
            Item::Opaque(json!({"type": "image", "data": "x", "mimeType": "image/png"})),
            Item::text("text"),
        ];
        assert_eq!(preview(&items, 10), "text");
    }

    #[test]
    fn from_protocol_parses_text_and_keeps_the_rest() {
        let raw = vec![
            json!({"type": "text", "text": "hi"}),
            json!({"type": "image", "data": "aGk=", "mimeType": "image/png"}),
        ];
        let items = from_protocol_value(&raw);

        assert_eq!(items[0], Item::text("hi"));
        assert!(matches!(items[1], Item::Opaque(_)));
    }
}
