//! Structure summaries: shape, sizes and samples without the payload.
//!
//! Gives an agent enough orientation to write a targeted projection or
//! search instead of pulling the whole response into context.

use serde_json::{Map, Value, json};

use crate::content::Item;
use crate::search::SearchSpec;

/// Keys shown per object level in the truncated keys tree.
const KEYS_PER_LEVEL: usize = 10;
/// Elements/keys included in the sample.
const SAMPLE_ITEMS: usize = 3;
/// Sample strings longer than this are cut with an ellipsis.
const SAMPLE_STRING_MAX: usize = 100;

pub(super) fn apply(items: &[Item], spec: &SearchSpec) -> Vec<Item> {
    let mut results = Vec::new();

    for item in items {
        let Some(text) = item.as_text() else { continue };

        let out = match serde_json::from_str::<Value>(text) {
            Ok(data) => {
                let summary = structure_summary(&data, spec.max_depth);
                format!(
                    "Structure Navigation Summary:\n\n\
                     Type: {}\n\
                     Size: {}\n\n\
                     Structure:\n{}\n\n\
                     Sample Data:\n{}\n\n\
                     Statistics:\n{}\n",
                    summary["type"].as_str().unwrap_or("unknown"),
                    pretty(&summary["size"]),
                    pretty(&summary["keys"]),
                    pretty(&summary["sample"]),
                    pretty(&summary["statistics"]),
                )
            }
            Err(_) => {
                let prefix: String = text.chars().take(200).collect();
                format!(
                    "Text Structure Summary:\n\n\
                     Length: {} characters\n\
                     Lines: {}\n\
                     Words: {}\n\
                     First 200 chars: {prefix}...\n",
                    text.chars().count(),
                    text.split('\n').count(),
                    text.split_whitespace().count(),
                )
            }
        };

        results.push(Item::Text(out));
    }

    if results.is_empty() {
        vec![Item::text("No content to navigate.")]
    } else {
        results
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// Builds the summary record: root type, size metrics, truncated keys tree,
/// a small sample, and top-level statistics.
pub fn structure_summary(data: &Value, max_depth: usize) -> Value {
    json!({
        "type": type_name(data),
        "size": size_of(data),
        "keys": keys_tree(data, max_depth),
        "sample": sample_of(data),
        "statistics": statistics_of(data),
    })
}

fn type_name(data: &Value) -> &'static str {
    match data {
        Value::Object(_) => "object",
        Value::Array(_) => "array",
        Value::String(_) => "string",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::Null => "null",
    }
}

fn size_of(data: &Value) -> Value {
    match data {
        Value::Object(map) => json!({
            "fields": map.len(),
            "total_items": map.values().map(count_items).sum::<usize>(),
        }),
        Value::Array(elements) => json!({
            "items": elements.len(),
            "total_items": elements.iter().map(count_items).sum::<usize>(),
        }),
        Value::String(s) => json!({
            "characters": s.chars().count(),
            "lines": s.split('\n').count(),
        }),
        _ => json!({}),
    }
}

fn count_items(data: &Value) -> usize {
    match data {
        Value::Object(map) => 1 + map.values().map(count_items).sum::<usize>(),
        Value::Array(elements) => elements.len(),
        _ => 1,
    }
}

fn keys_tree(data: &Value, max_depth: usize) -> Value {
    if max_depth == 0 {
        return json!("...");
    }

    match data {
        Value::Object(map) => {
            let mut tree = Map::new();
            for (key, value) in map.iter().take(KEYS_PER_LEVEL) {
                tree.insert(key.clone(), keys_tree(value, max_depth - 1));
            }
            Value::Object(tree)
        }
        Value::Array(elements) if !elements.is_empty() => {
            json!([keys_tree(&elements[0], max_depth - 1)])
        }
        other => json!(type_name(other)),
    }
}

fn sample_of(data: &Value) -> Value {
    sample_with_limit(data, SAMPLE_ITEMS)
}

fn sample_with_limit(data: &Value, max_items: usize) -> Value {
    match data {
        Value::Object(map) => {
            let mut sample = Map::new();
            for (key, value) in map.iter().take(max_items) {
                sample.insert(key.clone(), sample_with_limit(value, 1));
            }
            Value::Object(sample)
        }
        Value::Array(elements) => Value::Array(
            elements
                .iter()
                .take(max_items)
                .map(|element| sample_with_limit(element, 1))
                .collect(),
        ),
        Value::String(s) if s.chars().count() > SAMPLE_STRING_MAX => {
            let cut: String = s.chars().take(SAMPLE_STRING_MAX).collect();
            Value::String(format!("{cut}..."))
        }
        other => other.clone(),
    }
}

fn statistics_of(data: &Value) -> Value {
    match data {
        Value::Array(elements) => {
            let mut stats = Map::new();
            stats.insert("count".to_string(), json!(elements.len()));
            if let Some(Value::Object(first)) = elements.first() {
                let fields: Vec<&String> = first.keys().take(10).collect();
                stats.insert("fields".to_string(), json!(fields));
            }
            Value::Object(stats)
        }
        Value::Object(map) => {
            let names: Vec<&String> = map.keys().take(20).collect();
            json!({
                "field_count": map.len(),
                "field_names": names,
            })
        }
        Value::String(s) => json!({
            "length": s.chars().count(),
            "lines": s.split('\n').count(),
            "words": s.split_whitespace().count(),
        }),
        _ => json!({}),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{apply, structure_summary};
    use crate::content::Item;
    use crate::search::{SearchMode, SearchSpec};

    fn spec(max_depth: usize) -> SearchSpec {
        SearchSpec {
            mode: SearchMode::Structure,
            max_depth,
            ..SearchSpec::default()
        }
    }

    #[test]
    fn object_summary_reports_type_and_fields() {
        let data = json!({"users": [{"name": "a"}, {"name": "b"}], "total": 2});
        let summary = structure_summary(&data, 3);

        assert_eq!(summary["type"], "object");
        assert_eq!(summary["size"]["fields"], 2);
        assert_eq!(summary["statistics"]["field_count"], 2);
    }

    #[test]
    fn keys_tree_truncates_at_depth() {
        let data = json!({"a": {"b": {"c": {"d": 1}}}});
        let summary = structure_summary(&data, 2);

        assert_eq!(summary["keys"]["a"]["b"], "...");
    }

    #[test]
    fn array_keys_tree_uses_first_element() {
        let data = json!([{"id": 1, "name": "x"}, {"id": 2}]);
        let summary = structure_summary(&data, 3);

        assert_eq!(summary["keys"][0]["id"], "number");
        assert_eq!(summary["statistics"]["count"], 2);
        assert_eq!(summary["statistics"]["fields"], json!(["id", "name"]));
    }

    #[test]
    fn sample_truncates_long_strings() {
        let long = "x".repeat(150);
        let data = json!({"blob": long});
        let summary = structure_summary(&data, 3);

        let sample = summary["sample"]["blob"].as_str().unwrap();
        assert_eq!(sample.len(), 103);
        assert!(sample.ends_with("..."));
    }

    #[test]
    fn json_payload_produces_structure_text() {
        let items = vec![Item::text(r#"{"name": "test", "items": [1, 2, 3]}"#)];
        let out = apply(&items, &spec(3));

        let text = out[0].as_text().unwrap();
        assert!(text.starts_with("Structure Navigation Summary:"));
        assert!(text.contains("Type: object"));
    }

    #[test]
    fn plain_text_produces_text_stats() {
        let items = vec![Item::text("one two three\nfour five")];
        let out = apply(&items, &spec(3));

        let text = out[0].as_text().unwrap();
        assert!(text.starts_with("Text Structure Summary:"));
        assert!(text.contains("Lines: 2"));
        assert!(text.contains("Words: 5"));
    }

    #[test]
    fn empty_content_reports_in_band() {
        let out = apply(&[], &spec(3));
        assert_eq!(out[0].as_text().unwrap(), "No content to navigate.");
    }
}
