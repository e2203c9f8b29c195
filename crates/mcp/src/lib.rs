//! Tool-invocation protocol (MCP over streamable HTTP), server side.
//!
//! This crate owns the wire types, protocol version negotiation and the
//! session table. The HTTP adapter in the gateway drives it.

pub mod session;
pub mod types;

pub use {
    session::{Session, SessionError, SessionStore},
    types::{
        DEFAULT_PROTOCOL_VERSION, PROTOCOL_VERSION_HEADER, SESSION_HEADER,
        SUPPORTED_PROTOCOL_VERSIONS, negotiate_version,
    },
};
