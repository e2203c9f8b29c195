//! Tool-invocation adapter: `POST /mcp` (JSON-RPC), `DELETE /mcp` to end a
//! session, `GET /mcp` rejected.
//!
//! `initialize` mints a session token returned in `Mcp-Session-Id`; every
//! other call except `ping` and `notifications/initialized` must present a
//! live token, checked before the manifest is touched.

use std::sync::Arc;

use {
    axum::{
        body::to_bytes,
        extract::{Request, State},
        http::{HeaderMap, HeaderValue, StatusCode, header},
        response::{IntoResponse, Json, Response},
    },
    scriptgate_host::TransportContext,
    scriptgate_mcp::{
        PROTOCOL_VERSION_HEADER, SESSION_HEADER, SessionError, negotiate_version,
        types::{
            InitializeParams, InitializeResult, McpToolDef, ServerInfo, ToolsCallParams,
            ToolsCallResult, ToolsListResult,
        },
    },
    scriptgate_protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, error_codes},
    serde_json::{Map, Value, json},
    tracing::{debug, info, warn},
};

use crate::{
    dispatch::DispatchError,
    dynamic::MAX_BODY_BYTES,
    envelope::interpret,
    params::{RequestMeta, unify_object},
    push::FrameKind,
    schema::input_schema,
    state::GatewayState,
};

const INITIALIZED_NOTIFICATION: &str = "notifications/initialized";

pub async fn handle_post(State(state): State<Arc<GatewayState>>, req: Request) -> Response {
    let (parts, body) = req.into_parts();
    let meta = RequestMeta::from_parts(&parts, &state.trusted_proxies);
    let request: JsonRpcRequest = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => match serde_json::from_slice(&bytes) {
            Ok(r) => r,
            Err(e) => return parse_error(e),
        },
        Err(e) => return parse_error(e),
    };
    let id = request.id_or_null();

    if !request.has_valid_version() {
        return failure(
            StatusCode::BAD_REQUEST,
            id,
            JsonRpcError::new(error_codes::INVALID_REQUEST, "Invalid Request"),
        );
    }

    match request.method.as_str() {
        "initialize" => return initialize(&state, id, request.params),
        "ping" => return success(id, json!({})),
        INITIALIZED_NOTIFICATION => return StatusCode::ACCEPTED.into_response(),
        _ => {},
    }

    let token = parts
        .headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok());
    let session = match state.sessions.validate(token) {
        Ok(session) => session,
        Err(e) => return session_rejection(id, &e),
    };
    if let Some(requested) = header_str(&parts.headers, PROTOCOL_VERSION_HEADER)
        && negotiate_version(Some(requested)) != requested
    {
        debug!(session = %session.id, requested, negotiated = %session.protocol_version, "unsupported protocol version header; using session version");
    }

    if request.is_notification() {
        debug!(method = %request.method, "notification ignored");
        return StatusCode::ACCEPTED.into_response();
    }

    match request.method.as_str() {
        "tools/list" => list_tools(&state, id).await,
        "tools/call" => call_tool(&state, id, request.params, &meta).await,
        other => failure(
            StatusCode::OK,
            id,
            JsonRpcError::new(error_codes::METHOD_NOT_FOUND, format!("Method not found: {other}")),
        ),
    }
}

pub async fn handle_get() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        [(header::ALLOW, "POST, DELETE")],
    )
        .into_response()
}

pub async fn handle_delete(State(state): State<Arc<GatewayState>>, headers: HeaderMap) -> Response {
    let Some(token) = header_str(&headers, SESSION_HEADER) else {
        return session_rejection(Value::Null, &SessionError::Missing);
    };
    if state.sessions.terminate(token) {
        info!(session = %token, "mcp session terminated");
        StatusCode::OK.into_response()
    } else {
        session_rejection(Value::Null, &SessionError::Unknown)
    }
}

fn initialize(state: &GatewayState, id: Value, params: Option<Value>) -> Response {
    let params: InitializeParams = params
        .and_then(|p| serde_json::from_value(p).ok())
        .unwrap_or_default();
    let session = state.sessions.create(params.protocol_version.as_deref());
    info!(
        session = %session.id,
        requested = params.protocol_version.as_deref().unwrap_or(""),
        negotiated = %session.protocol_version,
        client = params.client_info.as_ref().map(|c| c.name.as_str()).unwrap_or(""),
        "mcp session initialized"
    );

    let result = InitializeResult::new(&session.protocol_version, ServerInfo {
        name: state.mcp_server_name.clone(),
        version: state.identity.version.clone(),
    });
    let mut response = success(id, json!(result));
    if let Ok(v) = HeaderValue::from_str(&session.id) {
        response.headers_mut().insert(SESSION_HEADER, v);
    }
    response
}

async fn list_tools(state: &GatewayState, id: Value) -> Response {
    let manifest = match state.dispatcher.load_manifest().await {
        Ok(m) => m,
        Err(e) => return failure(StatusCode::OK, id, internal(&e)),
    };
    let mut tools = Vec::with_capacity(manifest.len());
    for name in manifest.names() {
        let entry = match manifest.resolve(name) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(operation = name, error = %e, "skipping misconfigured tool");
                continue;
            },
        };
        let schema = state
            .dispatcher
            .script_schema(&entry, state.schema.as_ref())
            .await;
        tools.push(McpToolDef {
            name: entry.name,
            description: entry.description,
            input_schema: input_schema(&schema),
        });
    }
    success(id, json!(ToolsListResult { tools }))
}

async fn call_tool(
    state: &GatewayState,
    id: Value,
    params: Option<Value>,
    meta: &RequestMeta,
) -> Response {
    let call: ToolsCallParams = match params.map(serde_json::from_value) {
        Some(Ok(call)) => call,
        _ => {
            return failure(
                StatusCode::OK,
                id,
                JsonRpcError::new(error_codes::INVALID_PARAMS, "Invalid params: missing tool name"),
            );
        },
    };
    let arguments = match call.arguments {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(obj)) => obj,
        Some(_) => {
            return failure(
                StatusCode::OK,
                id,
                JsonRpcError::new(error_codes::INVALID_PARAMS, "Invalid params: arguments must be an object"),
            );
        },
    };

    let bag = unify_object(Some(&call.name), arguments, meta);
    let invocation = match state
        .dispatcher
        .invoke(&call.name, &bag, TransportContext::detached())
        .await
    {
        Ok(inv) => inv,
        Err(DispatchError::NotFound(name)) => {
            return failure(
                StatusCode::OK,
                id,
                JsonRpcError::new(error_codes::INVALID_PARAMS, format!("Unknown tool: {name}")),
            );
        },
        Err(DispatchError::Execution(e)) => {
            warn!(tool = %call.name, error = %e, "tool call failed");
            return success(id, json!(ToolsCallResult::text(e.to_string(), true)));
        },
        Err(e) => return failure(StatusCode::OK, id, internal(&e)),
    };

    // Output must be a valid envelope before anything is pushed.
    let envelope = match interpret(&invocation.raw) {
        Ok(env) => env,
        Err(e) => {
            warn!(tool = %call.name, error = %e, "tool: invalid script result");
            return failure(StatusCode::OK, id, internal(&e.into()));
        },
    };
    state
        .dispatcher
        .spawn_push(&invocation, bag, FrameKind::Text);
    success(id, json!(ToolsCallResult::text(invocation.raw, !envelope.success)))
}

fn session_rejection(id: Value, e: &SessionError) -> Response {
    let (status, message) = match e {
        SessionError::Missing => (StatusCode::BAD_REQUEST, "Bad Request: missing session id"),
        SessionError::Unknown | SessionError::Expired => (StatusCode::NOT_FOUND, "Session not found"),
    };
    failure(status, id, JsonRpcError::new(error_codes::SESSION_REQUIRED, message))
}

fn internal(e: &DispatchError) -> JsonRpcError {
    JsonRpcError::new(error_codes::INTERNAL_ERROR, "Internal error").with_data(e.to_string())
}

fn parse_error(e: impl std::fmt::Display) -> Response {
    failure(
        StatusCode::BAD_REQUEST,
        Value::Null,
        JsonRpcError::new(error_codes::PARSE_ERROR, "Parse error").with_data(e.to_string()),
    )
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn success(id: Value, result: Value) -> Response {
    (StatusCode::OK, Json(JsonRpcResponse::success(id, result))).into_response()
}

fn failure(status: StatusCode, id: Value, error: JsonRpcError) -> Response {
    (status, Json(JsonRpcResponse::failure(id, error))).into_response()
}
