use std::path::PathBuf;

use clap::Parser;

/// Transparent MCP proxy with automatic large-response handling.
#[derive(Debug, Parser)]
#[command(name = "rlm-proxy", version, about)]
pub struct Args {
    /// Path to the mcp.json configuration file.
    #[arg(short, long, default_value = "mcp.json")]
    pub config: PathBuf,

    /// Log filter, e.g. `info` or `proxy=debug`. Logs go to stderr; stdout
    /// carries the protocol.
    #[arg(long, env = "MCP_PROXY_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}
