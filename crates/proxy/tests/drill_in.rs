//! Drill-in tool behavior against cached content.
//!
//! These tests seed the response cache directly and exercise the
//! proxy_filter / proxy_search / proxy_explore handlers end to end,
//! without any upstream child process.

use config::Config;
use proxy::{Item, ProxyServer};
use serde_json::{Map, Value, json};

fn server() -> ProxyServer {
    ProxyServer::new(Config::default())
}

fn args(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap()
}

async fn seed(server: &ProxyServer, text: &str) -> String {
    server
        .cache()
        .put(vec![Item::text(text)], "mock_tool", json!({}), Some("tester"))
        .await
}

const USERS_JSON: &str = r#"{"users":[{"name":"a","email":"a@x","pw":"1"},{"name":"b","email":"b@x","pw":"2"}]}"#;

#[tokio::test]
async fn include_projection_on_cached_users() {
    let server = server();
    let cache_id = seed(&server, USERS_JSON).await;

    let result = server
        .dispatch(
            "proxy_filter",
            args(json!({
                "cache_id": cache_id,
                "fields": ["users.name", "users.email"],
                "mode": "include",
            })),
            Some("tester"),
        )
        .await;

    let parsed: Value = serde_json::from_str(result[0].as_text().unwrap()).unwrap();
    assert_eq!(
        parsed,
        json!({
            "users": [
                {"name": "a", "email": "a@x"},
                {"name": "b", "email": "b@x"}
            ]
        })
    );
}

#[tokio::test]
async fn exclude_projection_drops_nested_field() {
    let server = server();
    let cache_id = seed(&server, USERS_JSON).await;

    let result = server
        .dispatch(
            "proxy_filter",
            args(json!({"cache_id": cache_id, "exclude": ["users.pw"]})),
            Some("tester"),
        )
        .await;

    let parsed: Value = serde_json::from_str(result[0].as_text().unwrap()).unwrap();
    assert_eq!(
        parsed,
        json!({
            "users": [
                {"name": "a", "email": "a@x"},
                {"name": "b", "email": "b@x"}
            ]
        })
    );
}

#[tokio::test]
async fn filter_without_fields_or_exclude_is_an_error() {
    let server = server();
    let cache_id = seed(&server, USERS_JSON).await;

    let result = server
        .dispatch(
            "proxy_filter",
            args(json!({"cache_id": cache_id})),
            Some("tester"),
        )
        .await;

    assert_eq!(
        result[0].as_text().unwrap(),
        "Error: Provide 'fields' or 'exclude' to filter."
    );
}

#[tokio::test]
async fn view_mode_is_rejected_in_band() {
    let server = server();
    let cache_id = seed(&server, USERS_JSON).await;

    let result = server
        .dispatch(
            "proxy_filter",
            args(json!({"cache_id": cache_id, "mode": "view", "fields": ["users"]})),
            Some("tester"),
        )
        .await;

    let text = result[0].as_text().unwrap();
    assert!(text.starts_with("Error: Invalid projection mode: view"));
}

#[tokio::test]
async fn projection_metrics_are_recorded() {
    let server = server();
    let cache_id = seed(&server, USERS_JSON).await;

    server
        .dispatch(
            "proxy_filter",
            args(json!({"cache_id": cache_id, "fields": ["users.name"]})),
            Some("tester"),
        )
        .await;

    let summary = server.metrics().summary();
    assert_eq!(summary.total_calls, 1);
    assert_eq!(summary.projection_calls, 1);
    assert_eq!(summary.search_calls, 0);
}

#[tokio::test]
async fn bm25_ranks_the_relevant_paragraph_first() {
    let server = server();

    let filler = "the quick brown fox jumps over the lazy dog and keeps running. ".repeat(8);
    let text = format!(
        "{filler}\n\nThe database timeout was reported while committing, \
         and the database timeout repeated after the retry.\n\n{filler}"
    );
    let cache_id = seed(&server, &text).await;

    let result = server
        .dispatch(
            "proxy_search",
            args(json!({
                "cache_id": cache_id,
                "pattern": "database timeout",
                "mode": "bm25",
                "top_k": 1,
            })),
            Some("tester"),
        )
        .await;

    let out = result[0].as_text().unwrap();
    assert!(out.starts_with("BM25 Search Results (query: 'database timeout'"));
    assert!(out.contains("=== Result 1 (Score:"));
    assert!(out.contains("database timeout"));
}

#[tokio::test]
async fn context_grep_returns_window_without_separator() {
    let server = server();
    let cache_id = seed(&server, "line one\nline two\nline three ERROR\nline four\nline five").await;

    let result = server
        .dispatch(
            "proxy_search",
            args(json!({
                "cache_id": cache_id,
                "pattern": "ERROR",
                "context_lines": 1,
            })),
            Some("tester"),
        )
        .await;

    assert_eq!(
        result[0].as_text().unwrap(),
        "line two\nline three ERROR\nline four"
    );
}

#[tokio::test]
async fn regex_max_results_caps_matching_lines() {
    let server = server();
    let text = (0..50).map(|i| format!("AAAA line {i}")).collect::<Vec<_>>().join("\n");
    let cache_id = seed(&server, &text).await;

    let result = server
        .dispatch(
            "proxy_search",
            args(json!({"cache_id": cache_id, "pattern": "AAAA", "max_results": 3})),
            Some("tester"),
        )
        .await;

    assert_eq!(result[0].as_text().unwrap().lines().count(), 3);
}

#[tokio::test]
async fn fuzzy_search_reports_similarity() {
    let server = server();
    let cache_id = seed(&server, "a conection issue was reported by the user").await;

    let result = server
        .dispatch(
            "proxy_search",
            args(json!({
                "cache_id": cache_id,
                "pattern": "connection",
                "mode": "fuzzy",
                "threshold": 0.7,
            })),
            Some("tester"),
        )
        .await;

    let out = result[0].as_text().unwrap();
    assert!(out.starts_with("Fuzzy Search Results (pattern: 'connection'"));
    assert!(out.contains("Similarity:"));
}

#[tokio::test]
async fn invalid_regex_is_one_error_item() {
    let server = server();
    let cache_id = seed(&server, "any text").await;

    let result = server
        .dispatch(
            "proxy_search",
            args(json!({"cache_id": cache_id, "pattern": "[invalid"})),
            Some("tester"),
        )
        .await;

    assert_eq!(result.len(), 1);
    assert!(
        result[0]
            .as_text()
            .unwrap()
            .starts_with("Error: Invalid regex pattern '[invalid'")
    );
}

#[tokio::test]
async fn missing_pattern_is_an_error() {
    let server = server();
    let cache_id = seed(&server, "text").await;

    let result = server
        .dispatch(
            "proxy_search",
            args(json!({"cache_id": cache_id})),
            Some("tester"),
        )
        .await;

    assert_eq!(
        result[0].as_text().unwrap(),
        "Error: 'pattern' is required for proxy_search."
    );
}

#[tokio::test]
async fn unknown_search_mode_is_an_error() {
    let server = server();
    let cache_id = seed(&server, "text").await;

    let result = server
        .dispatch(
            "proxy_search",
            args(json!({"cache_id": cache_id, "pattern": "x", "mode": "semantic"})),
            Some("tester"),
        )
        .await;

    let text = result[0].as_text().unwrap();
    assert!(text.starts_with("Error: Unknown search mode 'semantic'"));
    assert!(text.contains("regex, bm25, fuzzy, context, structure"));
}

#[tokio::test]
async fn explore_summarizes_structure() {
    let server = server();
    let cache_id = seed(&server, r#"{"users": [{"name": "a"}], "total": 1}"#).await;

    let result = server
        .dispatch(
            "proxy_explore",
            args(json!({"cache_id": cache_id, "max_depth": 2})),
            Some("tester"),
        )
        .await;

    let out = result[0].as_text().unwrap();
    assert!(out.starts_with("Structure Navigation Summary:"));
    assert!(out.contains("Type: object"));
    assert!(out.contains("users"));
}

#[tokio::test]
async fn expired_cache_id_reports_cache_miss() {
    let mut config = Config::default();
    config.proxy_settings.cache_ttl_seconds = 0;
    let server = ProxyServer::new(config);

    let cache_id = seed(&server, "short lived").await;
    tokio::time::sleep(std::time::Duration::from_millis(30)).await;

    let result = server
        .dispatch(
            "proxy_search",
            args(json!({"cache_id": cache_id, "pattern": "x"})),
            Some("tester"),
        )
        .await;

    let text = result[0].as_text().unwrap();
    assert!(text.starts_with(&format!("Error: Cache entry '{cache_id}' not found or expired")));
    assert!(text.contains("Re-call the original tool"));
}

#[tokio::test]
async fn missing_source_arguments_is_an_error() {
    let server = server();

    let result = server
        .dispatch("proxy_filter", args(json!({"fields": ["x"]})), Some("tester"))
        .await;

    let text = result[0].as_text().unwrap();
    assert!(text.starts_with("Error: Provide either 'cache_id'"));
}

#[tokio::test]
async fn drill_in_tools_are_listed_without_upstreams() {
    let server = server();
    let tools = server.list_all_tools().await;

    let names: Vec<&str> = tools.iter().map(|t| t.name.as_ref()).collect();
    assert_eq!(names, vec!["proxy_filter", "proxy_search", "proxy_explore"]);
}

#[tokio::test]
async fn server_info_advertises_the_drill_in_tools() {
    use rmcp::ServerHandler;

    let info = server().get_info();
    let instructions = info.instructions.unwrap();

    assert!(instructions.contains("proxy_filter"));
    assert!(instructions.contains("proxy_search"));
    assert!(instructions.contains("proxy_explore"));
    assert!(instructions.contains("cache_id"));
    assert_eq!(info.server_info.name, "rlm-proxy");
}

#[tokio::test]
async fn caching_is_transparent_to_semantics() {
    let server = server();
    let cache_id = seed(&server, USERS_JSON).await;

    // An exclude projection with an irrelevant field returns the data
    // unchanged, so cached content round-trips exactly.
    let result = server
        .dispatch(
            "proxy_filter",
            args(json!({"cache_id": cache_id, "exclude": ["not_present"]})),
            Some("tester"),
        )
        .await;

    let parsed: Value = serde_json::from_str(result[0].as_text().unwrap()).unwrap();
    let original: Value = serde_json::from_str(USERS_JSON).unwrap();
    assert_eq!(parsed, original);
}
