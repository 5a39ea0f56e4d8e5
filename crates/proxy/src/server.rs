//! The proxy server: protocol handler, response pipeline and drill-in tools.
//!
//! Upstream calls flow through route → forward → measure → truncate/cache →
//! hint → metrics. The three built-in drill-in tools resolve their content
//! from the cache or a fresh upstream call and run the projection or search
//! engines on the CPU pool.

use std::sync::Arc;

use config::{Config, ProxySettings, UpstreamConfig};
use rmcp::model::{
    CallToolRequestParams, CallToolResult, Implementation, ListToolsResult,
    PaginatedRequestParams, ServerCapabilities, ServerInfo, Tool, ToolsCapability,
};
use rmcp::service::RequestContext;
use rmcp::{ErrorData as McpError, RoleServer, ServerHandler};
use serde_json::{Map, Value};

use crate::cache::{CacheLimits, ResponseCache};
use crate::content::{self, Item};
use crate::error::ProxyError;
use crate::executor::CpuExecutor;
use crate::hints::ExplorationHinter;
use crate::metrics::ProxyMetrics;
use crate::projection::{ProjectionSpec, project_items};
use crate::registry::{PROXY_EXPLORE, PROXY_FILTER, PROXY_SEARCH, ToolRegistry, ToolsCache};
use crate::search::{ContextType, SearchMode, SearchSpec, search_items};
use crate::upstream::{RpcError, UpstreamSet};

const SERVER_INSTRUCTIONS: &str =
    "This proxy aggregates tools from multiple MCP servers. \
     Tool names are prefixed with the server name (e.g. filesystem_read_file). \
     When a tool response is large it is automatically truncated and cached. \
     The truncated response includes a cache_id you can use with these proxy \
     tools to drill into the data without re-executing the original call:\n\
       - proxy_filter: project/filter specific fields from cached or fresh results\n\
       - proxy_search: grep/bm25/fuzzy/context search on cached or fresh results\n\
       - proxy_explore: discover data structure (keys, types, sizes) without loading content\n\
     All proxy tool parameters are flat top-level strings/arrays/integers — no nested objects required.";

struct Inner {
    settings: ProxySettings,
    upstream_configs: Vec<(String, UpstreamConfig)>,
    upstreams: Arc<UpstreamSet>,
    registry: ToolRegistry,
    cache: ResponseCache,
    executor: CpuExecutor,
    hinter: ExplorationHinter,
    metrics: Arc<ProxyMetrics>,
}

/// The MCP proxy server. Cheap to clone; all state is shared.
#[derive(Clone)]
pub struct ProxyServer {
    inner: Arc<Inner>,
}

impl ProxyServer {
    /// Builds a server from loaded configuration. No upstream is contacted
    /// until [`initialize_upstreams`](Self::initialize_upstreams) runs.
    pub fn new(config: Config) -> Self {
        let metrics = Arc::new(ProxyMetrics::default());
        let tools = Arc::new(ToolsCache::default());
        let upstreams = Arc::new(UpstreamSet::new(tools.clone(), metrics.clone()));
        let registry = ToolRegistry::new(upstreams.clone(), tools);

        let settings = config.proxy_settings;
        let cache = ResponseCache::new(
            CacheLimits::from_settings(&settings),
            settings.enable_agent_isolation,
        );

        let upstream_configs = config.mcp_servers.into_iter().collect();

        Self {
            inner: Arc::new(Inner {
                settings,
                upstream_configs,
                upstreams,
                registry,
                cache,
                executor: CpuExecutor::new(),
                hinter: ExplorationHinter::new(),
                metrics,
            }),
        }
    }

    /// Connects every configured upstream. Failures are logged and counted;
    /// the proxy serves its drill-in tools regardless.
    pub async fn initialize_upstreams(&self) {
        self.inner
            .upstreams
            .initialize_all(&self.inner.upstream_configs)
            .await;
    }

    /// Orderly teardown: log the savings summary, cancel supervisors, drop
    /// the cache.
    pub async fn shutdown(&self) {
        self.inner.metrics.log_summary();
        self.inner.upstreams.shutdown_all().await;
        self.inner.cache.clear().await;
    }

    /// The response cache (exposed for embedding and tests).
    pub fn cache(&self) -> &ResponseCache {
        &self.inner.cache
    }

    /// The savings/health counters.
    pub fn metrics(&self) -> &ProxyMetrics {
        &self.inner.metrics
    }

    /// The aggregate tool listing: drill-in tools plus prefixed upstream
    /// tools.
    pub async fn list_all_tools(&self) -> Vec<Tool> {
        self.inner.registry.aggregate_tools().await
    }

    /// Handles one tool call. Every failure is flattened to a text item
    /// starting with `Error:`; this function does not fail.
    pub async fn dispatch(
        &self,
        name: &str,
        arguments: Map<String, Value>,
        agent_id: Option<&str>,
    ) -> Vec<Item> {
        log::debug!("call_tool: {name}");

        let result = match name {
            PROXY_FILTER => self.handle_filter(arguments, agent_id).await,
            PROXY_SEARCH => self.handle_search(arguments, agent_id).await,
            PROXY_EXPLORE => self.handle_explore(arguments, agent_id).await,
            _ => return self.handle_upstream_call(name, arguments, agent_id).await,
        };

        result.unwrap_or_else(ProxyError::into_items)
    }

    // ── Forwarded upstream calls ─────────────────────────────────────────

    async fn handle_upstream_call(
        &self,
        name: &str,
        arguments: Map<String, Value>,
        agent_id: Option<&str>,
    ) -> Vec<Item> {
        let (client, tool) = match self.inner.registry.resolve(name).await {
            Ok(resolved) => resolved,
            Err(err) => return err.into_items(),
        };
        let upstream = client.name().to_string();

        log::debug!("Forwarding {tool} to {upstream}");

        let content = match client.call_tool(&tool, Value::Object(arguments.clone())).await {
            Ok(content) => content,
            Err(RpcError::Timeout(_)) => {
                let err = ProxyError::UpstreamTimeout { upstream, tool };
                log::error!("{err}");
                return err.into_items();
            }
            Err(err) => {
                let err = ProxyError::UpstreamFailure {
                    upstream,
                    tool,
                    message: err.to_string(),
                };
                log::error!("{err}");
                return err.into_items();
            }
        };

        self.postprocess_response(name, arguments, content, agent_id).await
    }

    /// Size check, truncate-and-cache, exploration hints, metrics.
    async fn postprocess_response(
        &self,
        name: &str,
        arguments: Map<String, Value>,
        content: Vec<Item>,
        agent_id: Option<&str>,
    ) -> Vec<Item> {
        let settings = &self.inner.settings;
        let original_size = content::measure(&content);

        let mut auto_truncated = false;
        let mut metadata: Option<Value> = None;
        let mut content = content;

        if settings.enable_auto_truncation && original_size > settings.max_response_size {
            let cache_id = self
                .inner
                .cache
                .put(
                    content.clone(),
                    name,
                    Value::Object(arguments),
                    agent_id,
                )
                .await;

            let hinter = self.inner.hinter.clone();
            let max_chars = settings.max_response_size;
            let hint_cache_id = cache_id.clone();

            let offloaded = self
                .inner
                .executor
                .run(move || {
                    let metadata = hinter.exploration_metadata(&content, Some(&hint_cache_id));
                    let preview = content::preview(&content, max_chars);
                    (preview, metadata)
                })
                .await;

            let (preview, hints) = match offloaded {
                Ok(result) => result,
                Err(err) => return err.into_items(),
            };
            metadata = hints;

            let mut hint_lines = vec![format!(
                "--- Response truncated ({} chars). Full result cached as cache_id=\"{cache_id}\". \
                 Use proxy_filter, proxy_search, or proxy_explore with this cache_id \
                 to drill into the data. ---",
                group_thousands(original_size)
            )];

            if let Some(steps) = metadata
                .as_ref()
                .and_then(|meta| meta["rlm_hints"]["next_steps"].as_array())
            {
                hint_lines.push(String::new());
                hint_lines.push("--- RLM exploration suggestions ---".to_string());
                for (i, step) in steps.iter().take(3).enumerate() {
                    let tool = step["tool"].as_str().unwrap_or("tool");
                    let when = step["when"].as_str().unwrap_or("");
                    hint_lines.push(format!("{}. Call {tool} when: {when}", i + 1));
                }
                if let Some(hint) = metadata
                    .as_ref()
                    .and_then(|meta| meta["rlm_hints"]["hint"].as_str())
                {
                    hint_lines.push(String::new());
                    hint_lines.push(hint.to_string());
                }
            }

            content = vec![Item::Text(format!(
                "{preview}\n\n{}",
                hint_lines.join("\n")
            ))];
            auto_truncated = true;
        }

        let new_size = content::measure(&content);

        if !auto_truncated {
            let hinter = self.inner.hinter.clone();
            let for_hints = content.clone();
            metadata = self
                .inner
                .executor
                .run(move || hinter.exploration_metadata(&for_hints, None))
                .await
                .unwrap_or_else(|err| {
                    // Hinting is best-effort.
                    log::debug!("Failed to generate exploration metadata: {err}");
                    None
                });
        }

        self.inner
            .metrics
            .record_call(original_size, new_size, false, false, auto_truncated);

        if original_size > 0 {
            let savings = (original_size.saturating_sub(new_size)) as f64 / original_size as f64 * 100.0;
            log::info!("Token savings: {original_size} -> {new_size} chars ({savings:.1}% reduction)");
        }

        if let Some(metadata) = metadata
            && metadata.get("rlm_hints").is_some()
            && let Ok(rendered) = serde_json::to_string_pretty(&metadata)
        {
            content.push(Item::Text(format!(
                "\n\nRLM exploration metadata:\n{rendered}"
            )));
        }

        content
    }

    // ── Drill-in handlers ────────────────────────────────────────────────

    /// Resolves drill-in content either from the cache or by a fresh
    /// upstream call whose result is cached for follow-ups.
    async fn resolve_source(
        &self,
        arguments: &Map<String, Value>,
        agent_id: Option<&str>,
    ) -> Result<Vec<Item>, ProxyError> {
        if let Some(cache_id) = non_empty_str(arguments, "cache_id") {
            return match self.inner.cache.get(cache_id).await {
                Some(content) => Ok(content),
                None => Err(ProxyError::CacheMiss(cache_id.to_string())),
            };
        }

        if let Some(tool) = non_empty_str(arguments, "tool") {
            let tool_args = arguments
                .get("arguments")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();

            let (client, bare) = self.inner.registry.resolve(tool).await?;
            let upstream = client.name().to_string();

            return match client.call_tool(&bare, Value::Object(tool_args.clone())).await {
                Ok(content) => {
                    let cache_id = self
                        .inner
                        .cache
                        .put(content.clone(), tool, Value::Object(tool_args), agent_id)
                        .await;
                    log::debug!("Fresh call cached as {cache_id}");
                    Ok(content)
                }
                Err(RpcError::Timeout(_)) => Err(ProxyError::UpstreamTimeout {
                    upstream,
                    tool: bare,
                }),
                Err(err) => Err(ProxyError::UpstreamFailure {
                    upstream,
                    tool: bare,
                    message: err.to_string(),
                }),
            };
        }

        Err(ProxyError::InvalidArgument(
            "Provide either 'cache_id' (from a previous truncated response) \
             or 'tool' + 'arguments' to call a tool fresh."
                .to_string(),
        ))
    }

    async fn handle_filter(
        &self,
        arguments: Map<String, Value>,
        agent_id: Option<&str>,
    ) -> Result<Vec<Item>, ProxyError> {
        let content = self.resolve_source(&arguments, agent_id).await?;

        let fields = string_list(&arguments, "fields");
        let exclude = string_list(&arguments, "exclude");

        let mode = match non_empty_str(&arguments, "mode") {
            Some(mode) => mode.to_string(),
            None if !exclude.is_empty() => "exclude".to_string(),
            None => "include".to_string(),
        };

        let projection_fields = if mode == "exclude" { exclude } else { fields };
        if projection_fields.is_empty() {
            return Ok(vec![Item::text("Error: Provide 'fields' or 'exclude' to filter.")]);
        }

        let spec = ProjectionSpec::parse(&mode, projection_fields)?;

        let original_size = content::measure(&content);
        let result = self
            .inner
            .executor
            .run(move || project_items(content, &spec))
            .await?;
        let filtered_size = content::measure(&result);

        self.inner
            .metrics
            .record_call(original_size, filtered_size, true, false, false);

        Ok(result)
    }

    async fn handle_search(
        &self,
        arguments: Map<String, Value>,
        agent_id: Option<&str>,
    ) -> Result<Vec<Item>, ProxyError> {
        let Some(pattern) = non_empty_str(&arguments, "pattern") else {
            return Ok(vec![Item::text("Error: 'pattern' is required for proxy_search.")]);
        };

        let mode_name = non_empty_str(&arguments, "mode").unwrap_or("regex");
        let Some(mode) = SearchMode::parse(mode_name) else {
            return Ok(vec![Item::text(format!(
                "Error: Unknown search mode '{mode_name}'. Supported: {}",
                SearchMode::SUPPORTED
            ))]);
        };

        let mut spec = SearchSpec {
            mode,
            pattern: pattern.to_string(),
            ..SearchSpec::default()
        };

        if let Some(max_results) = positive_usize(&arguments, "max_results") {
            spec.max_matches = Some(max_results);
            spec.top_k = max_results;
        }
        if let Some(context_lines) = positive_usize(&arguments, "context_lines") {
            spec.context_before = context_lines;
            spec.context_after = context_lines;
        }
        if arguments
            .get("case_insensitive")
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            spec.case_insensitive = true;
        }
        if let Some(threshold) = arguments.get("threshold").and_then(Value::as_f64)
            && threshold > 0.0
        {
            spec.threshold = threshold;
        }
        if let Some(top_k) = positive_usize(&arguments, "top_k") {
            spec.top_k = top_k;
        }
        if let Some(context_type) = non_empty_str(&arguments, "context_type") {
            spec.context_type = ContextType::parse(context_type);
        }

        let content = self.resolve_source(&arguments, agent_id).await?;

        let original_size = content::measure(&content);
        let result = self
            .inner
            .executor
            .run(move || search_items(&content, &spec))
            .await?;
        let filtered_size = content::measure(&result);

        self.inner
            .metrics
            .record_call(original_size, filtered_size, false, true, false);

        Ok(result)
    }

    async fn handle_explore(
        &self,
        arguments: Map<String, Value>,
        agent_id: Option<&str>,
    ) -> Result<Vec<Item>, ProxyError> {
        let content = self.resolve_source(&arguments, agent_id).await?;

        let spec = SearchSpec {
            mode: SearchMode::Structure,
            max_depth: positive_usize(&arguments, "max_depth").unwrap_or(3),
            ..SearchSpec::default()
        };

        let hinter = self.inner.hinter.clone();
        let (mut result, hints) = self
            .inner
            .executor
            .run(move || {
                let summary = search_items(&content, &spec);
                let hints = hinter.exploration_metadata(&content, None);
                (summary, hints)
            })
            .await?;

        if let Some(hints) = hints
            && let Ok(rendered) = serde_json::to_string_pretty(&hints)
        {
            result.push(Item::Text(format!(
                "\n\nRLM-guided next steps:\n\
                 You can now use proxy_filter or proxy_search with the suggested projections/grep patterns.\n\
                 {rendered}"
            )));
        }

        Ok(result)
    }

    /// Derives the cache-isolation agent id from the protocol session's
    /// client identity. `None` disables prefixing entirely.
    fn agent_id(&self, context: &RequestContext<RoleServer>) -> Option<String> {
        if !self.inner.settings.enable_agent_isolation {
            return None;
        }

        let raw = context
            .peer
            .peer_info()
            .map(|info| info.client_info.name.to_string())
            .unwrap_or_default();

        Some(sanitize_agent_id(&raw))
    }
}

impl ServerHandler for ProxyServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(SERVER_INSTRUCTIONS.into()),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability { list_changed: None }),
                ..Default::default()
            },
            server_info: Implementation {
                name: "rlm-proxy".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        Ok(ListToolsResult {
            tools: self.list_all_tools().await,
            next_cursor: None,
            meta: Default::default(),
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let agent_id = self.agent_id(&context);
        let arguments = request.arguments.unwrap_or_default();

        let items = self
            .dispatch(&request.name, arguments, agent_id.as_deref())
            .await;

        Ok(CallToolResult::success(content::to_protocol(items)))
    }
}

fn non_empty_str<'a>(arguments: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

fn string_list(arguments: &Map<String, Value>, key: &str) -> Vec<String> {
    arguments
        .get(key)
        .and_then(Value::as_array)
        .map(|values| {
            values
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn positive_usize(arguments: &Map<String, Value>, key: &str) -> Option<usize> {
    arguments
        .get(key)
        .and_then(Value::as_u64)
        .filter(|&n| n > 0)
        .map(|n| n as usize)
}

/// Restricts an agent id to `[A-Za-z0-9_-]`, capped at 64 characters.
fn sanitize_agent_id(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .take(64)
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.is_empty() {
        "default".to_string()
    } else {
        cleaned
    }
}

/// Formats an integer with `,` thousands separators for the truncation hint.
fn group_thousands(n: usize) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);

    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{group_thousands, sanitize_agent_id};

    #[test]
    fn thousands_grouping() {
        assert_eq!(group_thousands(0), "0");
        assert_eq!(group_thousands(999), "999");
        assert_eq!(group_thousands(1000), "1,000");
        assert_eq!(group_thousands(20000), "20,000");
        assert_eq!(group_thousands(1234567), "1,234,567");
    }

    #[test]
    fn agent_id_sanitizing() {
        assert_eq!(sanitize_agent_id("claude-desktop"), "claude-desktop");
        assert_eq!(sanitize_agent_id("agent one!"), "agent_one_");
        assert_eq!(sanitize_agent_id(""), "default");
        assert_eq!(sanitize_agent_id(&"x".repeat(100)).len(), 64);
    }
}
