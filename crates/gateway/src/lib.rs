//! Gateway: HTTP/WebSocket server that exposes manifest-declared scripts
//! through three protocol adapters.
//!
//! Request flow:
//! 1. An adapter (dynamic route, JSON-RPC, tool protocol, or streaming
//!    connection) turns its input into a parameter bag
//! 2. The dispatcher resolves the operation against the manifest and runs its
//!    script in a fresh execution context
//! 3. The adapter interprets the script's output for its protocol
//! 4. If the operation declares a push target, that script runs in the
//!    background and its output goes to the streaming connection registered
//!    under the target's name
//!
//! Script execution and the capability surface live in `scriptgate-host`.

pub mod discovery;
pub mod dispatch;
pub mod dynamic;
pub mod envelope;
pub mod manifest;
pub mod mcp;
pub mod params;
pub mod push;
pub mod rpc;
pub mod schema;
pub mod server;
pub mod state;
pub mod ws;

pub use {
    server::{build_gateway_app, start_gateway},
    state::GatewayState,
};
