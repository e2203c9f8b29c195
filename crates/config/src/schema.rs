//! Config schema types (server, scripts, outbound capabilities, tool protocol, logging).

use std::{net::IpAddr, path::PathBuf};

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub scripts: ScriptsConfig,
    pub http: HttpConfig,
    pub exec: ExecConfig,
    pub smtp: SmtpConfig,
    pub mcp: McpConfig,
    pub log: LogConfig,
}

/// Listener and identity settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Deployment name reported by the discovery endpoint.
    pub name: String,
    pub profile: String,
    pub version: String,
    pub bind: String,
    pub port: u16,
    /// PEM certificate; HTTPS is served when both this and `key_path` are set.
    pub cert_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,
    /// Reverse proxies allowed to name the client via `X-Forwarded-For`.
    pub trusted_proxies: Vec<IpAddr>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "scriptgate".into(),
            profile: String::new(),
            version: String::new(),
            bind: "0.0.0.0".into(),
            port: 8080,
            cert_path: None,
            key_path: None,
            trusted_proxies: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Cert and key pair, only when both are configured.
    pub fn tls_pair(&self) -> Option<(&PathBuf, &PathBuf)> {
        match (&self.cert_path, &self.key_path) {
            (Some(cert), Some(key)) => Some((cert, key)),
            _ => None,
        }
    }
}

/// Where scripts live and how they run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptsConfig {
    /// Deployment root. Manifest, scripts, includes and file capabilities
    /// resolve relative to it.
    pub root: PathBuf,
    /// Manifest file name, relative to `root`.
    pub manifest: PathBuf,
    /// Shared include scripts, concatenated in order before every script.
    pub includes: Vec<PathBuf>,
    pub timeout_secs: u64,
    pub memory_limit_mb: usize,
}

impl Default for ScriptsConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            manifest: PathBuf::from("api.json"),
            includes: Vec::new(),
            timeout_secs: 30,
            memory_limit_mb: 64,
        }
    }
}

impl ScriptsConfig {
    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(&self.manifest)
    }
}

/// Outbound HTTP capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

/// Host command capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecConfig {
    pub timeout_secs: u64,
    pub max_output_bytes: usize,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_output_bytes: 200 * 1024,
        }
    }
}

/// Mail capability. An empty `host` disables sending.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from_email: String,
    pub from_name: String,
    /// Implicit TLS (SMTPS) instead of STARTTLS/plain.
    pub tls: bool,
    /// Appended to the blind-copy list of every message.
    pub default_bcc: Vec<String>,
}

impl SmtpConfig {
    pub fn is_configured(&self) -> bool {
        !self.host.trim().is_empty()
    }
}

/// Tool-invocation protocol settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct McpConfig {
    /// Idle time after which a session token stops being accepted.
    pub session_ttl_secs: u64,
    /// `serverInfo.name` reported on initialize. Falls back to `server.name`.
    pub server_name: Option<String>,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            session_ttl_secs: 3600,
            server_name: None,
        }
    }
}

/// Logging. Rotation is left to the platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub json: bool,
    /// Append to this file instead of stdout.
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            file: None,
        }
    }
}
