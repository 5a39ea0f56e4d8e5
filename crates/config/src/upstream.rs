use std::collections::BTreeMap;

use serde::Deserialize;

/// Configuration for an individual upstream MCP server.
///
/// Upstream servers run as child processes speaking the protocol over
/// stdin/stdout. The map is immutable after load.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UpstreamConfig {
    /// Executable to spawn.
    pub command: String,
    /// Arguments passed to the command.
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment variables for the child process.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Maximum length of an upstream server name.
pub(crate) const MAX_NAME_LEN: usize = 100;

/// Returns `true` if the name is a valid upstream server name:
/// alphanumeric plus `_` and `-`, between 1 and 100 characters.
pub(crate) fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
