//! Read-only manifest summaries. Script paths never leave the server.

use std::sync::Arc;

use {
    axum::{
        extract::{Path, State},
        http::StatusCode,
        response::{IntoResponse, Json, Response},
    },
    serde_json::{Value, json},
    tracing::{debug, warn},
};

use crate::{dynamic::error_response, schema::ScriptSchema, state::GatewayState};

/// `GET /nyan`
pub async fn summary(State(state): State<Arc<GatewayState>>) -> Response {
    summary_response(&state).await
}

/// Deployment identity plus every entry with `script` removed.
pub async fn summary_response(state: &GatewayState) -> Response {
    let manifest = match state.dispatcher.load_manifest().await {
        Ok(m) => m,
        Err(e) => {
            warn!(error = %e, "discovery summary failed");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, e);
        },
    };
    let identity = &state.identity;
    Json(json!({
        "nyan": {
            "name": identity.name,
            "profile": identity.profile,
            "version": identity.version,
        },
        "apis": manifest.redacted(),
    }))
    .into_response()
}

/// `GET /nyan/{api}`
pub async fn detail(
    State(state): State<Arc<GatewayState>>,
    Path(api): Path<String>,
) -> Response {
    let manifest = match state.dispatcher.load_manifest().await {
        Ok(m) => m,
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    };
    let Some(raw) = manifest.raw_entry(&api) else {
        return error_response(StatusCode::NOT_FOUND, format!("API not found: {api}"));
    };
    let Some(fields) = raw.as_object() else {
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("operation '{api}' is misconfigured: entry is not an object"),
        );
    };
    let description = fields
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or_default();

    // Entries without a usable script still describe themselves.
    let ScriptSchema {
        accepted_params,
        output_columns,
    } = match manifest.resolve(&api) {
        Ok(entry) => {
            state
                .dispatcher
                .script_schema(&entry, state.schema.as_ref())
                .await
        },
        Err(e) => {
            debug!(api = %api, error = %e, "no script to scan; empty schema");
            ScriptSchema::default()
        },
    };

    Json(json!({
        "api": api,
        "description": description,
        "nyanAcceptedParams": accepted_params,
        "nyanOutputColumns": output_columns,
    }))
    .into_response()
}
