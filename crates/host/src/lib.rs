//! Execution host: runs guest scripts in a fresh QuickJS context per call.
//!
//! Each invocation gets its own runtime and context, a fixed table of host
//! capabilities (cookies, shared key-value store, outbound HTTP, host
//! commands, local files, mail), the concatenated include scripts plus the
//! target script, and the parameter bag as `nyanAllParams`. The final
//! expression's string value is the raw result.
//!
//! Capabilities sit behind traits so they can be swapped in tests.

mod bridge;
pub mod capabilities;
pub mod error;
pub mod kv;
pub mod runtime;
pub mod transport;

pub use {
    capabilities::Capabilities,
    error::{CapabilityError, ExecutionError},
    kv::KvStore,
    runtime::{ExecutionHost, ExecutionLimits, PARAMS_GLOBAL, ScriptRequest},
    transport::TransportContext,
};
