//! Per-request transport state visible to the cookie capabilities.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

/// Lifetime of a cookie set by a script, in seconds.
pub const COOKIE_MAX_AGE_SECS: u64 = 3600;

#[derive(Debug, Default)]
struct CookieState {
    incoming: HashMap<String, String>,
    outgoing: Mutex<Vec<(String, String)>>,
}

/// Handle on the inbound HTTP request, when there is one.
///
/// Streaming frames, RPC calls, tool calls and push executions carry no
/// request-bound cookies; for those, reads return nothing and writes are
/// dropped.
#[derive(Debug, Clone, Default)]
pub struct TransportContext {
    cookies: Option<Arc<CookieState>>,
}

impl TransportContext {
    /// A context with no request attached.
    pub fn detached() -> Self {
        Self::default()
    }

    /// A context bound to an HTTP request carrying these cookies.
    pub fn with_cookies(incoming: HashMap<String, String>) -> Self {
        Self {
            cookies: Some(Arc::new(CookieState {
                incoming,
                outgoing: Mutex::new(Vec::new()),
            })),
        }
    }

    pub fn is_request_bound(&self) -> bool {
        self.cookies.is_some()
    }

    /// Cookie sent with the request. `None` when absent or detached.
    pub fn cookie(&self, name: &str) -> Option<String> {
        self.cookies.as_ref()?.incoming.get(name).cloned()
    }

    /// Queue a cookie for the response. Returns `false` when detached.
    pub fn set_cookie(&self, name: impl Into<String>, value: impl Into<String>) -> bool {
        let Some(state) = &self.cookies else {
            return false;
        };
        match state.outgoing.lock() {
            Ok(mut out) => {
                out.push((name.into(), value.into()));
                true
            },
            Err(_) => false,
        }
    }

    /// Drain queued cookies in the order they were set.
    pub fn take_set_cookies(&self) -> Vec<(String, String)> {
        self.cookies
            .as_ref()
            .and_then(|s| s.outgoing.lock().ok().map(|mut out| std::mem::take(&mut *out)))
            .unwrap_or_default()
    }
}
