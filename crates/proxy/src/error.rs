//! Per-call error kinds.
//!
//! Every error here is surfaced *in band*: the protocol result stays
//! well-formed and carries a single text item whose first word is `Error:`.
//! Only startup failures abort the process.

use crate::content::Item;

/// Errors raised while handling a single tool call.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// The tool name did not resolve to a known, initialized upstream.
    #[error(
        "Unknown server: '{name}'. Available: {available}. \
         Tool name format: {{server_name}}_{{tool_name}}. \
         Call list_tools() to see all available tool names."
    )]
    UnknownUpstream {
        /// The server prefix that failed to resolve.
        name: String,
        /// Comma-separated list of known upstream names, or `none`.
        available: String,
    },

    /// The tool name is not of the form `{server}_{tool}`.
    #[error("Tool name must be in format 'server_tool', got: {0}")]
    MalformedToolName(String),

    /// The upstream exists but its session is gone.
    #[error("Upstream server '{0}' is unavailable (connection lost)")]
    UpstreamUnavailable(String),

    /// The upstream did not answer within the call deadline.
    #[error("Timeout calling tool {tool} on {upstream} (60s)")]
    UpstreamTimeout {
        /// Upstream server name.
        upstream: String,
        /// Bare tool name on that upstream.
        tool: String,
    },

    /// The upstream answered with a protocol-level error.
    #[error("Error calling tool {tool} on {upstream}: {message}")]
    UpstreamFailure {
        /// Upstream server name.
        upstream: String,
        /// Bare tool name on that upstream.
        tool: String,
        /// Remote error description.
        message: String,
    },

    /// Malformed drill-in arguments (bad mode, missing pattern, cache_id/tool
    /// XOR violation, ...).
    #[error("{0}")]
    InvalidArgument(String),

    /// The referenced cache entry is unknown or expired.
    #[error(
        "Cache entry '{0}' not found or expired. \
         Re-call the original tool to get a new cache_id."
    )]
    CacheMiss(String),

    /// The search pattern did not compile.
    #[error("Invalid regex pattern '{pattern}': {message}")]
    Pattern {
        /// The pattern as supplied by the caller.
        pattern: String,
        /// The regex library's error message.
        message: String,
    },

    /// Unexpected internal failure (worker pool join, poisoned state).
    #[error("Internal proxy error: {0}")]
    Internal(String),
}

impl ProxyError {
    /// Flattens the error into the in-band representation.
    pub fn into_items(self) -> Vec<Item> {
        vec![Item::text(format!("Error: {self}"))]
    }
}
