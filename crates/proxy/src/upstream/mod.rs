//! Supervised long-lived upstream sessions.
//!
//! Each configured server gets one supervisor task that spawns the child,
//! performs the handshake, prefetches its tool list, and then parks until
//! it is cancelled or the transport is lost. A session is visible to the
//! router only between successful initialization and teardown.

mod client;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use config::UpstreamConfig;
use tokio::sync::{RwLock, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub use client::{
    CALL_TIMEOUT, HANDSHAKE_TIMEOUT, LIST_TOOLS_TIMEOUT, RpcError, ServerIdentity, UpstreamClient,
    UpstreamTool,
};

use crate::metrics::ProxyMetrics;
use crate::registry::ToolsCache;

/// Ceiling on waiting for a single supervisor to become ready.
pub const STARTUP_TIMEOUT: Duration = Duration::from_secs(35);

struct SessionHandle {
    client: Arc<UpstreamClient>,
}

/// All live upstream sessions, keyed by configured name.
pub struct UpstreamSet {
    sessions: Arc<RwLock<HashMap<String, SessionHandle>>>,
    tools: Arc<ToolsCache>,
    metrics: Arc<ProxyMetrics>,
    shutdown: CancellationToken,
    supervisors: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl UpstreamSet {
    /// Creates an empty set sharing the registry's tool cache and the
    /// server's metrics.
    pub fn new(tools: Arc<ToolsCache>, metrics: Arc<ProxyMetrics>) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            tools,
            metrics,
            shutdown: CancellationToken::new(),
            supervisors: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    /// Connects every configured upstream, one at a time. Failures are
    /// recorded and logged; the proxy continues with whatever connected.
    pub async fn initialize_all(&self, configs: &[(String, UpstreamConfig)]) {
        if configs.is_empty() {
            log::info!("No upstream servers configured.");
            return;
        }

        log::info!("Initializing {} upstream server(s)...", configs.len());

        for (name, config) in configs {
            log::info!(
                "Connecting to {name} (command: {}, args: {:?})",
                config.command,
                config.args
            );

            if let Err(err) = self.connect(name, config).await {
                log::error!("Failed to connect to {name}: {err}");
                self.metrics.connection_failed();
            }
        }
    }

    /// Starts one supervisor and waits until it has either initialized its
    /// session or surfaced a fatal error.
    pub async fn connect(&self, name: &str, config: &UpstreamConfig) -> anyhow::Result<()> {
        let (ready_tx, ready_rx) = oneshot::channel::<Result<(), String>>();
        let token = self.shutdown.child_token();

        let supervisor = tokio::spawn(supervise(
            name.to_string(),
            config.clone(),
            token.clone(),
            ready_tx,
            self.sessions.clone(),
            self.tools.clone(),
            self.metrics.clone(),
        ));
        self.supervisors.lock().await.push(supervisor);

        match tokio::time::timeout(STARTUP_TIMEOUT, ready_rx).await {
            Err(_) => {
                token.cancel();
                anyhow::bail!("Timeout waiting for connection to {name}");
            }
            Ok(Err(_)) => anyhow::bail!("Supervisor for {name} exited before signalling readiness"),
            Ok(Ok(Err(message))) => anyhow::bail!("{message}"),
            Ok(Ok(Ok(()))) => Ok(()),
        }
    }

    /// Returns the live session for an upstream, if it is initialized and
    /// its transport is still up.
    pub async fn get(&self, name: &str) -> Option<Arc<UpstreamClient>> {
        let sessions = self.sessions.read().await;
        sessions
            .get(name)
            .map(|handle| handle.client.clone())
            .filter(|client| client.is_alive())
    }

    /// Names of all registered upstreams, sorted for stable messages.
    pub async fn names(&self) -> Vec<String> {
        let sessions = self.sessions.read().await;
        let mut names: Vec<String> = sessions.keys().cloned().collect();
        names.sort();
        names
    }

    /// Cancels every supervisor and waits for orderly teardown.
    pub async fn shutdown_all(&self) {
        log::info!("Cleaning up upstream connections...");
        self.shutdown.cancel();

        let supervisors: Vec<JoinHandle<()>> = {
            let mut guard = self.supervisors.lock().await;
            guard.drain(..).collect()
        };

        for supervisor in supervisors {
            let _ = supervisor.await;
        }

        self.sessions.write().await.clear();
    }
}

/// Keeps one session alive: initialize, prefetch tools, park, tear down.
#[allow(clippy::too_many_arguments)]
async fn supervise(
    name: String,
    config: UpstreamConfig,
    token: CancellationToken,
    ready: oneshot::Sender<Result<(), String>>,
    sessions: Arc<RwLock<HashMap<String, SessionHandle>>>,
    tools: Arc<ToolsCache>,
    metrics: Arc<ProxyMetrics>,
) {
    let (client, mut reader) = match UpstreamClient::spawn(&name, &config) {
        Ok(spawned) => spawned,
        Err(err) => {
            let _ = ready.send(Err(format!("Failed to spawn {name}: {err}")));
            return;
        }
    };

    match client.initialize().await {
        Ok(identity) => {
            log::info!("Connected to upstream server: {name}");
            if !identity.name.is_empty() {
                log::info!("     Server: {}, Version: {}", identity.name, identity.version);
            }
        }
        Err(err) => {
            let _ = ready.send(Err(format!("Failed to initialize {name}: {err}")));
            client.shutdown().await;
            return;
        }
    }

    sessions.write().await.insert(
        name.clone(),
        SessionHandle {
            client: client.clone(),
        },
    );
    metrics.connection_established();

    // Prefetch is best-effort: on failure the registry re-fetches lazily
    // on the next aggregate listing.
    match client.list_tools().await {
        Ok(list) => {
            log::info!("     Loaded {} tools from {name}", list.len());
            tools.insert(&name, list).await;
        }
        Err(err) => {
            log::error!("Could not list tools from {name}: {err}");
        }
    }

    let _ = ready.send(Ok(()));

    tokio::select! {
        _ = token.cancelled() => {
            log::info!("Connection to {name} cancelled");
            sessions.write().await.remove(&name);
            tools.remove(&name).await;
            client.shutdown().await;
            let _ = reader.await;
        }
        _ = &mut reader => {
            log::error!("Lost connection to upstream {name}");
            sessions.write().await.remove(&name);
            tools.remove(&name).await;
            metrics.connection_lost();
            client.shutdown().await;
        }
    }
}
