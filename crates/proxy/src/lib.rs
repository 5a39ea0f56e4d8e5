//! Transparent MCP proxy with context-budget management.
//!
//! The proxy multiplexes over upstream tool servers it spawns as child
//! processes, re-exporting their tools under `{upstream}_{tool}` names.
//! Oversized responses are truncated and cached per agent; three built-in
//! drill-in tools (`proxy_filter`, `proxy_search`, `proxy_explore`) let an
//! agent explore the cached payload without re-invoking the upstream or
//! loading the whole payload into its context.

#![deny(missing_docs)]

pub mod cache;
pub mod content;
pub mod error;
pub mod executor;
pub mod hints;
pub mod metrics;
pub mod projection;
pub mod registry;
pub mod search;
pub mod server;
pub mod upstream;

pub use content::Item;
pub use error::ProxyError;
pub use server::ProxyServer;
