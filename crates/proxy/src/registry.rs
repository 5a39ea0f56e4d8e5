//! Tool aggregation and call routing.
//!
//! The aggregate listing starts with the three built-in drill-in tools and
//! re-emits every upstream tool under a `{upstream}_{tool}` name. Cached
//! upstream lists are used when present; uncached or empty upstreams are
//! re-fetched in parallel. Upstream schemas are deep-copied, never mutated.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;
use rmcp::model::Tool;
use serde_json::json;
use tokio::sync::RwLock;

use crate::error::ProxyError;
use crate::upstream::{UpstreamClient, UpstreamSet, UpstreamTool};

/// Name of the projection drill-in tool.
pub const PROXY_FILTER: &str = "proxy_filter";
/// Name of the search drill-in tool.
pub const PROXY_SEARCH: &str = "proxy_search";
/// Name of the structure drill-in tool.
pub const PROXY_EXPLORE: &str = "proxy_explore";

/// Returns whether a tool name is one of the built-in drill-in tools.
pub fn is_builtin(name: &str) -> bool {
    matches!(name, PROXY_FILTER | PROXY_SEARCH | PROXY_EXPLORE)
}

/// Cached per-upstream tool lists.
#[derive(Default)]
pub struct ToolsCache {
    inner: RwLock<HashMap<String, Vec<UpstreamTool>>>,
}

impl ToolsCache {
    /// Replaces the cached list for one upstream.
    pub async fn insert(&self, upstream: &str, tools: Vec<UpstreamTool>) {
        self.inner.write().await.insert(upstream.to_string(), tools);
    }

    /// The cached list for one upstream, if any.
    pub async fn get(&self, upstream: &str) -> Option<Vec<UpstreamTool>> {
        self.inner.read().await.get(upstream).cloned()
    }

    /// Drops the cached list for one upstream.
    pub async fn remove(&self, upstream: &str) {
        self.inner.write().await.remove(upstream);
    }

    /// A point-in-time copy of every cached list.
    pub async fn snapshot(&self) -> HashMap<String, Vec<UpstreamTool>> {
        self.inner.read().await.clone()
    }
}

/// Routes prefixed tool calls and produces the aggregate tool listing.
pub struct ToolRegistry {
    upstreams: Arc<UpstreamSet>,
    tools: Arc<ToolsCache>,
}

impl ToolRegistry {
    /// Creates a registry over the given sessions and tool cache.
    pub fn new(upstreams: Arc<UpstreamSet>, tools: Arc<ToolsCache>) -> Self {
        Self { upstreams, tools }
    }

    /// Builds the full tool listing: built-ins first, then every upstream
    /// tool under its prefixed name.
    pub async fn aggregate_tools(&self) -> Vec<Tool> {
        let mut all_tools = builtin_tools();

        let cached = self.tools.snapshot().await;

        for (upstream, tools) in &cached {
            log::debug!("Using {} cached tools from {upstream}", tools.len());
            for tool in tools {
                all_tools.push(prefixed_tool(upstream, tool));
            }
        }

        // Upstreams with no cached (or an empty) list are fetched now, in
        // parallel, and merged after the fan-in.
        let to_fetch: Vec<String> = self
            .upstreams
            .names()
            .await
            .into_iter()
            .filter(|name| cached.get(name).is_none_or(Vec::is_empty))
            .collect();

        if !to_fetch.is_empty() {
            log::debug!("Fetching tools from {} upstream(s) in parallel", to_fetch.len());

            let fetches = to_fetch.iter().map(|name| {
                let upstreams = self.upstreams.clone();
                async move {
                    let Some(client) = upstreams.get(name).await else {
                        return (name.clone(), Vec::new());
                    };
                    match client.list_tools().await {
                        Ok(tools) => (name.clone(), tools),
                        Err(err) => {
                            log::error!("Error listing tools from {name}: {err}");
                            (name.clone(), Vec::new())
                        }
                    }
                }
            });

            for (upstream, tools) in join_all(fetches).await {
                if tools.is_empty() {
                    log::warn!("{upstream} returned 0 tools");
                    continue;
                }

                log::info!("Loaded {} tools from {upstream}", tools.len());
                for tool in &tools {
                    all_tools.push(prefixed_tool(&upstream, tool));
                }
                self.tools.insert(&upstream, tools).await;
            }
        }

        log::debug!("Returning {} total tools", all_tools.len());
        all_tools
    }

    /// Resolves a `{upstream}_{tool}` call to a live session and the bare
    /// tool name.
    pub async fn resolve(&self, name: &str) -> Result<(Arc<UpstreamClient>, String), ProxyError> {
        let known = self.upstreams.names().await;

        let (upstream, tool) = match split_tool_name(name, &known) {
            Ok(split) => split,
            Err(err) => return Err(err),
        };

        match self.upstreams.get(&upstream).await {
            Some(client) => Ok((client, tool)),
            None => Err(ProxyError::UpstreamUnavailable(upstream)),
        }
    }
}

/// Splits `{upstream}_{tool}` against the set of known upstream names.
///
/// Upstream names may themselves contain underscores, so every known name
/// is tried as a prefix first; only then does the split fall back to the
/// last underscore.
pub fn split_tool_name(name: &str, known: &[String]) -> Result<(String, String), ProxyError> {
    if !name.contains('_') {
        return Err(ProxyError::MalformedToolName(name.to_string()));
    }

    for upstream in known {
        if let Some(tool) = name.strip_prefix(upstream.as_str()).and_then(|rest| rest.strip_prefix('_'))
            && !tool.is_empty()
        {
            return Ok((upstream.clone(), tool.to_string()));
        }
    }

    let Some((upstream, tool)) = name.rsplit_once('_') else {
        return Err(ProxyError::MalformedToolName(name.to_string()));
    };

    if known.iter().any(|k| k.as_str() == upstream) {
        Ok((upstream.to_string(), tool.to_string()))
    } else {
        let available = if known.is_empty() {
            "none".to_string()
        } else {
            known.join(", ")
        };
        Err(ProxyError::UnknownUpstream {
            name: upstream.to_string(),
            available,
        })
    }
}

/// Re-emits an upstream tool under its prefixed name with a deep-copied
/// schema and a `(via {upstream})` suffix on the description.
pub fn prefixed_tool(upstream: &str, tool: &UpstreamTool) -> Tool {
    let schema = tool
        .input_schema
        .as_object()
        .cloned()
        .unwrap_or_else(|| {
            json!({"type": "object", "properties": {}})
                .as_object()
                .cloned()
                .unwrap_or_default()
        });

    Tool::new(
        format!("{upstream}_{}", tool.name),
        format!("{}\n(via {upstream})", tool.description),
        Arc::new(schema),
    )
}

/// The three drill-in tools with flat, self-defined schemas.
pub fn builtin_tools() -> Vec<Tool> {
    let filter_schema = json!({
        "type": "object",
        "properties": {
            "cache_id": {
                "type": "string",
                "description": "Cache ID from a previous truncated response. Use this OR tool+arguments.",
            },
            "tool": {
                "type": "string",
                "description": "Full tool name (e.g. filesystem_read_file) to call fresh. Use with 'arguments'.",
            },
            "arguments": {
                "type": "object",
                "description": "Arguments for the fresh tool call (only used with 'tool').",
            },
            "fields": {
                "type": "array",
                "items": {"type": "string"},
                "description": "Field paths to include/exclude (e.g. ['name', 'users.email']).",
            },
            "exclude": {
                "type": "array",
                "items": {"type": "string"},
                "description": "Field paths to exclude. If provided, mode is auto-set to 'exclude'.",
            },
            "mode": {
                "type": "string",
                "enum": ["include", "exclude"],
                "description": "Projection mode. Defaults to 'include' if fields provided, 'exclude' if exclude provided.",
            },
        },
    });

    let search_schema = json!({
        "type": "object",
        "properties": {
            "cache_id": {
                "type": "string",
                "description": "Cache ID from a previous truncated response.",
            },
            "tool": {
                "type": "string",
                "description": "Full tool name to call fresh.",
            },
            "arguments": {
                "type": "object",
                "description": "Arguments for fresh tool call.",
            },
            "pattern": {
                "type": "string",
                "description": "Search pattern (regex for regex mode, query text for bm25/fuzzy).",
            },
            "mode": {
                "type": "string",
                "enum": ["regex", "bm25", "fuzzy", "context"],
                "description": "Search mode. Defaults to 'regex'.",
            },
            "max_results": {
                "type": "integer",
                "description": "Maximum number of results to return.",
            },
            "context_lines": {
                "type": "integer",
                "description": "Number of context lines around each match (regex mode).",
            },
            "case_insensitive": {
                "type": "boolean",
                "description": "Case-insensitive matching (regex mode). Default false.",
            },
            "threshold": {
                "type": "number",
                "description": "Similarity threshold 0-1 (fuzzy mode). Default 0.7.",
            },
            "top_k": {
                "type": "integer",
                "description": "Number of top chunks to return (bm25 mode). Default 5.",
            },
            "context_type": {
                "type": "string",
                "enum": ["paragraph", "section", "sentence", "lines"],
                "description": "Context extraction unit (context mode). Default 'paragraph'.",
            },
        },
        "required": ["pattern"],
    });

    let explore_schema = json!({
        "type": "object",
        "properties": {
            "cache_id": {
                "type": "string",
                "description": "Cache ID from a previous truncated response.",
            },
            "tool": {
                "type": "string",
                "description": "Full tool name to call fresh.",
            },
            "arguments": {
                "type": "object",
                "description": "Arguments for fresh tool call.",
            },
            "max_depth": {
                "type": "integer",
                "description": "Maximum depth to explore. Default 3.",
            },
        },
    });

    vec![
        Tool::new(
            PROXY_FILTER,
            "Filter/project specific fields from a cached or fresh tool result. \
             Use this when a previous tool response was truncated and you received a cache_id, \
             or supply tool+arguments to call and filter in one step.\n\n\
             Modes: include (whitelist fields), exclude (blacklist fields).",
            Arc::new(filter_schema.as_object().cloned().unwrap_or_default()),
        ),
        Tool::new(
            PROXY_SEARCH,
            "Search/grep within a cached or fresh tool result. \
             Supports multiple search modes: regex (default), bm25, fuzzy, context.\n\n\
             Use when you need to find specific content within a large response.",
            Arc::new(search_schema.as_object().cloned().unwrap_or_default()),
        ),
        Tool::new(
            PROXY_EXPLORE,
            "Discover the structure of a cached or fresh tool result without loading \
             all data. Returns types, field names, sizes, and a small sample. \
             Use this first when you receive a large truncated response to understand \
             the shape of the data before filtering.",
            Arc::new(explore_schema.as_object().cloned().unwrap_or_default()),
        ),
    ]
}
