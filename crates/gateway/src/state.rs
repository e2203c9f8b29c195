use std::{net::IpAddr, sync::Arc, time::Duration};

use {
    scriptgate_config::GatewayConfig,
    scriptgate_host::{Capabilities, ExecutionHost, ExecutionLimits},
    scriptgate_mcp::SessionStore,
};

use crate::{
    dispatch::Dispatcher,
    manifest::ManifestStore,
    push::PushRegistry,
    schema::{ConstScanExtractor, SchemaExtractor},
};

/// Deployment identity reported by discovery and `initialize`.
#[derive(Debug, Clone)]
pub struct ServerIdentity {
    pub name: String,
    pub profile: String,
    pub version: String,
}

/// Shared gateway runtime state, owned by the router.
pub struct GatewayState {
    pub dispatcher: Arc<Dispatcher>,
    pub sessions: Arc<SessionStore>,
    pub schema: Arc<dyn SchemaExtractor>,
    pub identity: ServerIdentity,
    /// `serverInfo.name` for the tool protocol.
    pub mcp_server_name: String,
    /// Gateway build version.
    pub version: String,
    /// Peers whose forwarding headers name the client address.
    pub trusted_proxies: Vec<IpAddr>,
}

impl GatewayState {
    pub fn new(config: &GatewayConfig, capabilities: Capabilities) -> Arc<Self> {
        let scripts = &config.scripts;
        let host = ExecutionHost::new(
            scripts.root.clone(),
            scripts.includes.clone(),
            capabilities,
            ExecutionLimits {
                timeout: Duration::from_secs(scripts.timeout_secs),
                memory_limit: scripts.memory_limit_mb.saturating_mul(1024 * 1024),
            },
        );
        let dispatcher = Dispatcher::new(
            ManifestStore::new(scripts.manifest_path()),
            host,
            Arc::new(PushRegistry::new()),
        );
        let version = env!("CARGO_PKG_VERSION").to_string();
        let identity = ServerIdentity {
            name: config.server.name.clone(),
            profile: config.server.profile.clone(),
            version: if config.server.version.is_empty() {
                version.clone()
            } else {
                config.server.version.clone()
            },
        };
        Arc::new(Self {
            dispatcher: Arc::new(dispatcher),
            sessions: Arc::new(SessionStore::new(Duration::from_secs(
                config.mcp.session_ttl_secs,
            ))),
            schema: Arc::new(ConstScanExtractor),
            mcp_server_name: config
                .mcp
                .server_name
                .clone()
                .unwrap_or_else(|| config.server.name.clone()),
            identity,
            version,
            trusted_proxies: config.server.trusted_proxies.clone(),
        })
    }

    pub fn push(&self) -> &Arc<PushRegistry> {
        self.dispatcher.push_registry()
    }
}
