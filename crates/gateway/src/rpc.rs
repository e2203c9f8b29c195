//! JSON-RPC adapter: `POST /nyan-rpc`, the method names the operation.

use std::sync::Arc;

use {
    axum::{
        body::to_bytes,
        extract::{Request, State},
        http::StatusCode,
        response::{IntoResponse, Json, Response},
    },
    scriptgate_host::TransportContext,
    scriptgate_protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, error_codes},
    serde_json::{Map, Value},
    tracing::{debug, warn},
};

use crate::{
    dispatch::DispatchError,
    dynamic::{MAX_BODY_BYTES, append_set_cookies, request_cookies},
    envelope::interpret,
    params::{RequestMeta, unify_object},
    push::FrameKind,
    state::GatewayState,
};

pub async fn handle(State(state): State<Arc<GatewayState>>, req: Request) -> Response {
    let (parts, body) = req.into_parts();
    let meta = RequestMeta::from_parts(&parts, &state.trusted_proxies);
    let bytes = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(b) => b,
        Err(e) => {
            return reply(
                StatusCode::BAD_REQUEST,
                Value::Null,
                JsonRpcError::new(error_codes::PARSE_ERROR, "Parse error").with_data(e.to_string()),
            );
        },
    };

    let request: JsonRpcRequest = match serde_json::from_slice(&bytes) {
        Ok(r) => r,
        Err(e) => {
            return reply(
                StatusCode::BAD_REQUEST,
                Value::Null,
                JsonRpcError::new(error_codes::PARSE_ERROR, "Parse error").with_data(e.to_string()),
            );
        },
    };
    let id = request.id_or_null();

    if !request.has_valid_version() {
        return reply(
            StatusCode::BAD_REQUEST,
            id,
            JsonRpcError::new(
                error_codes::INVALID_REQUEST,
                "Invalid Request: jsonrpc must be \"2.0\"",
            ),
        );
    }
    if request.method.trim().is_empty() {
        return reply(
            StatusCode::NOT_FOUND,
            id,
            JsonRpcError::new(error_codes::METHOD_NOT_FOUND, "Method not found"),
        );
    }
    let layer = match request.params {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(obj)) => obj,
        Some(_) => {
            return reply(
                StatusCode::OK,
                id,
                JsonRpcError::new(error_codes::INVALID_PARAMS, "Invalid params: must be an object"),
            );
        },
    };

    let method = request.method.trim().to_string();
    debug!(method = %method, "rpc call");
    let params = unify_object(Some(&method), layer, &meta);

    let transport = TransportContext::with_cookies(request_cookies(&parts.headers));
    let mut response = call(&state, &method, params, id, transport.clone()).await;
    append_set_cookies(response.headers_mut(), transport.take_set_cookies());
    response
}

/// Runs the operation and shapes the reply. Cookies set by the script are
/// attached by the caller, so error replies carry them too.
async fn call(
    state: &GatewayState,
    method: &str,
    params: Map<String, Value>,
    id: Value,
    transport: TransportContext,
) -> Response {
    let invocation = match state.dispatcher.invoke(method, &params, transport).await {
        Ok(inv) => inv,
        Err(e) => {
            warn!(method = %method, error = %e, "rpc call failed");
            return reply(StatusCode::OK, id, dispatch_error(&e));
        },
    };

    let envelope = match interpret(&invocation.raw) {
        Ok(env) => env,
        Err(e) => {
            warn!(method = %method, error = %e, "rpc: invalid script result");
            return reply(StatusCode::OK, id, dispatch_error(&e.into()));
        },
    };

    if !envelope.success {
        let (code, message) = classify_failure(envelope.status);
        return reply(
            StatusCode::OK,
            id,
            JsonRpcError::new(code, message).with_data(envelope.to_http_body()),
        );
    }

    state
        .dispatcher
        .spawn_push(&invocation, params, FrameKind::Text);
    (
        StatusCode::OK,
        Json(JsonRpcResponse::success(id, envelope.to_rpc_result())),
    )
        .into_response()
}

/// Error code and message for a `success: false` envelope.
pub fn classify_failure(status: i64) -> (i64, &'static str) {
    match status {
        400 => (error_codes::INVALID_PARAMS, "Invalid params"),
        401 => (error_codes::UNAUTHORIZED, "Unauthorized"),
        404 => (error_codes::METHOD_NOT_FOUND, "Not found"),
        _ => (error_codes::INTERNAL_ERROR, "Internal error"),
    }
}

fn dispatch_error(e: &DispatchError) -> JsonRpcError {
    match e {
        DispatchError::NotFound(name) => {
            JsonRpcError::new(error_codes::METHOD_NOT_FOUND, format!("Method not found: {name}"))
        },
        DispatchError::Malformed(_) | DispatchError::NoOperation => {
            JsonRpcError::new(error_codes::INVALID_PARAMS, "Invalid params").with_data(e.to_string())
        },
        DispatchError::Misconfigured(_)
        | DispatchError::ManifestUnavailable(_)
        | DispatchError::Execution(_)
        | DispatchError::Envelope(_) => {
            JsonRpcError::new(error_codes::INTERNAL_ERROR, "Internal error").with_data(e.to_string())
        },
    }
}

fn reply(status: StatusCode, id: Value, error: JsonRpcError) -> Response {
    (status, Json(JsonRpcResponse::failure(id, error))).into_response()
}
