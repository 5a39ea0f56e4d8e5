//! Proxy configuration structures to map the mcp.json configuration.

#![deny(missing_docs)]

mod loader;
mod settings;
mod upstream;

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
pub use settings::ProxySettings;
pub use upstream::UpstreamConfig;

/// Main configuration structure for the proxy.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct Config {
    /// Map of upstream server names to their configurations.
    pub mcp_servers: BTreeMap<String, UpstreamConfig>,
    /// Tunables for truncation and caching.
    pub proxy_settings: ProxySettings,
}

impl Config {
    /// Load configuration from a file path.
    ///
    /// A missing file yields the default configuration (no upstream servers,
    /// default settings), so the proxy still serves its built-in tools. Any
    /// other failure is a startup error.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
        loader::load(path)
    }
}
