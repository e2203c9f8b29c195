//! Dynamic-route adapter: any method on `/{operation}` (or `/` with an `api`
//! parameter). Upgrade requests on the same paths go to the streaming
//! adapter.

use std::{collections::HashMap, fmt::Display, sync::Arc};

use {
    axum::{
        body::to_bytes,
        extract::{FromRequestParts, Request, State, WebSocketUpgrade},
        http::{HeaderMap, HeaderValue, StatusCode, header, request::Parts},
        response::{IntoResponse, Json, Response},
    },
    axum_extra::extract::cookie::{Cookie, CookieJar},
    scriptgate_host::{TransportContext, transport::COOKIE_MAX_AGE_SECS},
    serde_json::json,
    tracing::{debug, warn},
};

use crate::{
    discovery,
    dispatch::DispatchError,
    envelope::interpret,
    params::{HttpInput, RequestMeta, operation_name, unify_http},
    push::FrameKind,
    state::GatewayState,
    ws,
};

/// Largest request body read into memory.
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Query value of `api` that serves the discovery summary on `/`.
const DISCOVERY_API: &str = "nyan";

pub async fn handle(State(state): State<Arc<GatewayState>>, req: Request) -> Response {
    let (mut parts, body) = req.into_parts();
    let route = route_operation(parts.uri.path());
    let meta = RequestMeta::from_parts(&parts, &state.trusted_proxies);

    if is_websocket_upgrade(&parts.headers) {
        return match WebSocketUpgrade::from_request_parts(&mut parts, &state).await {
            Ok(upgrade) => ws::upgrade(upgrade, Arc::clone(&state), route, meta),
            Err(rejection) => rejection.into_response(),
        };
    }

    if route.is_none() && asks_for_discovery(&parts) {
        return discovery::summary_response(&state).await;
    }

    let body = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => return error_response(StatusCode::PAYLOAD_TOO_LARGE, e),
    };

    let transport = TransportContext::with_cookies(request_cookies(&parts.headers));
    let input = HttpInput {
        route: route.as_deref(),
        method: &parts.method,
        query: parts.uri.query(),
        content_type: parts
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok()),
        body: &body,
    };

    let mut response = match run(&state, &input, &meta, transport.clone()).await {
        Ok(response) => response,
        Err(e) => {
            warn!(path = %parts.uri.path(), error = %e, "dynamic route failed");
            error_response(status_for(&e), e)
        },
    };
    append_set_cookies(response.headers_mut(), transport.take_set_cookies());
    response
}

async fn run(
    state: &Arc<GatewayState>,
    input: &HttpInput<'_>,
    meta: &RequestMeta,
    transport: TransportContext,
) -> Result<Response, DispatchError> {
    let params = unify_http(input, meta)?;
    let operation = operation_name(&params)
        .ok_or(DispatchError::NoOperation)?
        .to_string();
    debug!(operation = %operation, "dynamic route call");

    let invocation = state
        .dispatcher
        .invoke(&operation, &params, transport)
        .await?;
    let envelope = interpret(&invocation.raw)?;
    let status = envelope.http_status()?;

    state
        .dispatcher
        .spawn_push(&invocation, params, FrameKind::Text);
    Ok((status, Json(envelope.to_http_body())).into_response())
}

pub fn status_for(e: &DispatchError) -> StatusCode {
    match e {
        DispatchError::Malformed(_) | DispatchError::NoOperation => StatusCode::BAD_REQUEST,
        DispatchError::NotFound(_) => StatusCode::NOT_FOUND,
        DispatchError::Misconfigured(_)
        | DispatchError::ManifestUnavailable(_)
        | DispatchError::Execution(_)
        | DispatchError::Envelope(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn error_response(status: StatusCode, message: impl Display) -> Response {
    (status, Json(json!({"error": message.to_string()}))).into_response()
}

/// `/add` → `add`; `/` → none.
fn route_operation(path: &str) -> Option<String> {
    let name = path.trim_matches('/');
    (!name.is_empty()).then(|| name.to_string())
}

fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
}

fn asks_for_discovery(parts: &Parts) -> bool {
    parts.uri.query().is_some_and(|q| {
        url::form_urlencoded::parse(q.as_bytes())
            .any(|(k, v)| k == "api" && v == DISCOVERY_API)
    })
}

pub(crate) fn request_cookies(headers: &HeaderMap) -> HashMap<String, String> {
    CookieJar::from_headers(headers)
        .iter()
        .map(|c| (c.name().to_string(), c.value().to_string()))
        .collect()
}

pub(crate) fn append_set_cookies(headers: &mut HeaderMap, cookies: Vec<(String, String)>) {
    for (name, value) in cookies {
        let cookie = Cookie::build((name, value)).path("/").http_only(true).build();
        match HeaderValue::from_str(&format!("{cookie}; Max-Age={COOKIE_MAX_AGE_SECS}")) {
            Ok(v) => {
                headers.append(header::SET_COOKIE, v);
            },
            Err(e) => warn!(cookie = %cookie.name(), error = %e, "cookie value not representable"),
        }
    }
}
