//! Parameter unification: every inbound shape becomes one [`ParameterBag`].
//!
//! Layers are merged in a fixed order, later layers overwriting earlier ones:
//! route-derived operation name, query string, posted form, JSON body (or
//! RPC params / tool arguments / frame object). A multi-valued field keeps
//! its last value. A route-derived `api` is re-asserted after the user
//! layers, and request metadata is injected last, so neither can be forged.

use std::net::{IpAddr, SocketAddr};

use {
    axum::{
        extract::ConnectInfo,
        http::{HeaderMap, Method, header, request::Parts},
    },
    serde_json::{Map, Value},
};

pub type ParameterBag = Map<String, Value>;

/// Operation name key.
pub const API_KEY: &str = "api";
pub const REMOTE_IP_KEY: &str = "_remote_ip";
pub const USER_AGENT_KEY: &str = "_user_agent";
pub const HEADERS_KEY: &str = "_headers";
pub const METHOD_KEY: &str = "_method";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UnifyError {
    #[error("malformed JSON body: {0}")]
    MalformedJson(String),

    #[error("JSON body must be an object")]
    NotAnObject,
}

/// Request metadata injected under reserved `_` keys.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    pub remote_ip: String,
    pub user_agent: String,
    /// First value of each header, keyed by lower-case name.
    pub headers: Map<String, Value>,
    pub method: String,
}

impl RequestMeta {
    pub fn from_parts(parts: &Parts, trusted_proxies: &[IpAddr]) -> Self {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        Self::from_headers(&parts.method, &parts.headers, peer, trusted_proxies)
    }

    /// `X-Forwarded-For` / `X-Real-IP` are honoured only when the socket
    /// peer is one of `trusted_proxies`; otherwise the peer address stands.
    pub fn from_headers(
        method: &Method,
        headers: &HeaderMap,
        peer: Option<IpAddr>,
        trusted_proxies: &[IpAddr],
    ) -> Self {
        let mut bag = Map::new();
        for name in headers.keys() {
            if let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) {
                bag.insert(name.as_str().to_string(), Value::String(value.to_string()));
            }
        }
        let forwarded = peer
            .filter(|ip| trusted_proxies.contains(ip))
            .and_then(|_| forwarded_client(headers));
        Self {
            remote_ip: forwarded
                .or_else(|| peer.map(|ip| ip.to_string()))
                .unwrap_or_default(),
            user_agent: header_str(headers, header::USER_AGENT.as_str())
                .unwrap_or_default()
                .to_string(),
            headers: bag,
            method: method.as_str().to_string(),
        }
    }

    pub fn inject(&self, bag: &mut ParameterBag) {
        bag.insert(REMOTE_IP_KEY.into(), Value::String(self.remote_ip.clone()));
        bag.insert(USER_AGENT_KEY.into(), Value::String(self.user_agent.clone()));
        bag.insert(HEADERS_KEY.into(), Value::Object(self.headers.clone()));
        bag.insert(METHOD_KEY.into(), Value::String(self.method.clone()));
    }
}

fn forwarded_client(headers: &HeaderMap) -> Option<String> {
    header_str(headers, "x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .or_else(|| header_str(headers, "x-real-ip"))
        .map(str::to_string)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// An HTTP request as seen by the unifier.
#[derive(Debug, Clone, Copy)]
pub struct HttpInput<'a> {
    /// Operation name taken from the path, if any.
    pub route: Option<&'a str>,
    pub method: &'a Method,
    pub query: Option<&'a str>,
    pub content_type: Option<&'a str>,
    pub body: &'a [u8],
}

pub fn unify_http(input: &HttpInput<'_>, meta: &RequestMeta) -> Result<ParameterBag, UnifyError> {
    let mut bag = ParameterBag::new();
    set_route(&mut bag, input.route);

    if let Some(query) = input.query {
        merge_pairs(&mut bag, query.as_bytes());
    }

    let mime = input.content_type.map(essence).unwrap_or_default();
    let has_form_body = matches!(*input.method, Method::POST | Method::PUT | Method::PATCH);
    if has_form_body && mime == "application/x-www-form-urlencoded" {
        merge_pairs(&mut bag, input.body);
    }

    if is_json(&mime) && !input.body.iter().all(u8::is_ascii_whitespace) {
        match serde_json::from_slice::<Value>(input.body) {
            Ok(Value::Object(obj)) => bag.extend(obj),
            Ok(_) => return Err(UnifyError::NotAnObject),
            Err(e) => return Err(UnifyError::MalformedJson(e.to_string())),
        }
    }

    set_route(&mut bag, input.route);
    meta.inject(&mut bag);
    Ok(bag)
}

/// Unify an already-structured layer (RPC params, tool arguments, frames).
pub fn unify_object(route: Option<&str>, layer: Map<String, Value>, meta: &RequestMeta) -> ParameterBag {
    let mut bag = ParameterBag::new();
    set_route(&mut bag, route);
    bag.extend(layer);
    set_route(&mut bag, route);
    meta.inject(&mut bag);
    bag
}

/// The operation named by the bag's `api` key.
pub fn operation_name(bag: &ParameterBag) -> Option<&str> {
    bag.get(API_KEY)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn set_route(bag: &mut ParameterBag, route: Option<&str>) {
    if let Some(name) = route {
        bag.insert(API_KEY.into(), Value::String(name.to_string()));
    }
}

fn merge_pairs(bag: &mut ParameterBag, encoded: &[u8]) {
    for (k, v) in url::form_urlencoded::parse(encoded) {
        bag.insert(k.into_owned(), Value::String(v.into_owned()));
    }
}

fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

fn is_json(mime: &str) -> bool {
    mime == "application/json" || (mime.starts_with("application/") && mime.ends_with("+json"))
}
