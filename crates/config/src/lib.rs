//! Gateway configuration: schema, discovery and loading.
//!
//! Config files may be TOML, YAML or JSON. `${VAR}` placeholders are
//! substituted from the environment before parsing.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{discover_and_load, load_config, load_from},
    schema::{
        ExecConfig, GatewayConfig, HttpConfig, LogConfig, McpConfig, ScriptsConfig, ServerConfig,
        SmtpConfig,
    },
};
