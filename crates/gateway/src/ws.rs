//! Streaming adapter.
//!
//! Each inbound frame is a JSON object naming an operation in `api`. Frames
//! are processed strictly in arrival order by a single reader loop; results
//! are written back with the frame type they arrived in. A connection opened
//! on `/{name}` is registered as push channel `name` for its lifetime.

use std::{sync::Arc, time::Duration};

use {
    axum::{
        extract::{
            WebSocketUpgrade,
            ws::{Message, WebSocket},
        },
        response::Response,
    },
    futures::{Sink, SinkExt, StreamExt},
    scriptgate_host::TransportContext,
    serde_json::{Value, json},
    tokio::{sync::mpsc, task::JoinHandle},
    tracing::{debug, info, warn},
};

use crate::{
    params::{RequestMeta, operation_name, unify_object},
    push::{FrameKind, OutboundFrame, PushConnection},
    state::GatewayState,
};

/// How long queued replies may take to flush once the reader has stopped.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub fn upgrade(
    upgrade: WebSocketUpgrade,
    state: Arc<GatewayState>,
    channel: Option<String>,
    meta: RequestMeta,
) -> Response {
    upgrade.on_upgrade(move |socket| handle_connection(socket, state, channel, meta))
}

pub async fn handle_connection(
    socket: WebSocket,
    state: Arc<GatewayState>,
    channel: Option<String>,
    meta: RequestMeta,
) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    let (ws_tx, mut ws_rx) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<OutboundFrame>();
    let write_handle = spawn_writer(ws_tx, rx);

    if let Some(name) = &channel {
        state
            .push()
            .register(name, PushConnection::new(conn_id.clone(), tx.clone()));
    }
    info!(conn_id = %conn_id, channel = channel.as_deref().unwrap_or(""), remote_ip = %meta.remote_ip, "stream: connected");

    while let Some(msg) = ws_rx.next().await {
        let msg = match msg {
            Ok(m) => m,
            Err(e) => {
                debug!(conn_id = %conn_id, error = %e, "stream: read error");
                break;
            },
        };
        let (kind, payload) = match msg {
            Message::Text(text) => (FrameKind::Text, text.as_bytes().to_vec()),
            Message::Binary(bytes) => (FrameKind::Binary, bytes.to_vec()),
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => continue,
        };
        handle_frame(&state, &tx, &meta, kind, &payload).await;
    }

    if let Some(name) = &channel {
        state.push().unregister(name, &conn_id);
    }
    drop(tx);
    if !drain_writer(write_handle, WRITER_DRAIN_TIMEOUT).await {
        debug!(conn_id = %conn_id, "stream: writer did not drain in time");
    }
    info!(conn_id = %conn_id, "stream: disconnected");
}

/// Write loop: forwards frames from the channel to the socket until every
/// sender is gone.
fn spawn_writer<S>(mut sink: S, mut rx: mpsc::UnboundedReceiver<OutboundFrame>) -> JoinHandle<()>
where
    S: Sink<Message> + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sink.send(frame.into_message()).await.is_err() {
                break;
            }
        }
    })
}

/// Lets the writer flush what is already queued. Returns `false` and aborts
/// it when a push still holds a sender past `deadline`.
async fn drain_writer(mut handle: JoinHandle<()>, deadline: Duration) -> bool {
    if tokio::time::timeout(deadline, &mut handle).await.is_err() {
        handle.abort();
        return false;
    }
    true
}

async fn handle_frame(
    state: &Arc<GatewayState>,
    tx: &mpsc::UnboundedSender<OutboundFrame>,
    meta: &RequestMeta,
    kind: FrameKind,
    payload: &[u8],
) {
    let frame = match serde_json::from_slice::<Value>(payload) {
        Ok(Value::Object(obj)) => obj,
        _ => {
            send_error(tx, "Invalid JSON data");
            return;
        },
    };
    let params = unify_object(None, frame, meta);
    let Some(operation) = operation_name(&params).map(str::to_string) else {
        send_error(tx, "Invalid script value");
        return;
    };

    let invocation = match state
        .dispatcher
        .invoke(&operation, &params, TransportContext::detached())
        .await
    {
        Ok(invocation) => invocation,
        Err(e) => {
            warn!(operation = %operation, error = %e, "stream: call failed");
            send_error(tx, &e.to_string());
            return;
        },
    };

    if tx
        .send(OutboundFrame::new(kind, invocation.raw.clone()))
        .is_err()
    {
        return;
    }
    state.dispatcher.spawn_push(&invocation, params, kind);
}

fn send_error(tx: &mpsc::UnboundedSender<OutboundFrame>, message: &str) {
    let _ = tx.send(OutboundFrame::Text(json!({"error": message}).to_string()));
}
