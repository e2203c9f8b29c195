//! Push registry: channel name → live streaming connection.
//!
//! One connection per channel; a new registration replaces the old one.
//! Every registration carries the connection id of its owner, and an owner
//! can only release the entry while it is still the registered one, so a
//! replaced connection that disconnects late cannot evict its successor.

use {
    axum::extract::ws::Message,
    dashmap::DashMap,
    tokio::sync::mpsc,
    tracing::{debug, warn},
};

/// Frame type, echoed back to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Text,
    Binary,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Text(String),
    Binary(Vec<u8>),
}

impl OutboundFrame {
    pub fn new(kind: FrameKind, payload: String) -> Self {
        match kind {
            FrameKind::Text => Self::Text(payload),
            FrameKind::Binary => Self::Binary(payload.into_bytes()),
        }
    }

    pub fn into_message(self) -> Message {
        match self {
            Self::Text(text) => Message::Text(text.into()),
            Self::Binary(bytes) => Message::Binary(bytes.into()),
        }
    }
}

/// Handle to a connection's write loop.
#[derive(Debug, Clone)]
pub struct PushConnection {
    pub conn_id: String,
    sender: mpsc::UnboundedSender<OutboundFrame>,
}

impl PushConnection {
    pub fn new(conn_id: impl Into<String>, sender: mpsc::UnboundedSender<OutboundFrame>) -> Self {
        Self {
            conn_id: conn_id.into(),
            sender,
        }
    }

    fn send(&self, frame: OutboundFrame) -> bool {
        self.sender.send(frame).is_ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    NotFound,
    WriteError,
}

#[derive(Debug, Default)]
pub struct PushRegistry {
    channels: DashMap<String, PushConnection>,
}

impl PushRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `conn` under `channel`, returning the connection it replaced.
    pub fn register(&self, channel: &str, conn: PushConnection) -> Option<PushConnection> {
        debug!(channel, conn_id = %conn.conn_id, "push channel registered");
        let previous = self.channels.insert(channel.to_string(), conn);
        if let Some(prev) = &previous {
            debug!(channel, replaced = %prev.conn_id, "push channel replaced");
        }
        previous
    }

    /// Remove the entry only while `conn_id` still owns it.
    pub fn unregister(&self, channel: &str, conn_id: &str) -> bool {
        self.channels
            .remove_if(channel, |_, conn| conn.conn_id == conn_id)
            .is_some()
    }

    pub fn deliver(&self, channel: &str, frame: OutboundFrame) -> DeliveryOutcome {
        // Clone out of the map so no shard lock is held while sending.
        let Some(conn) = self.channels.get(channel).map(|c| c.value().clone()) else {
            return DeliveryOutcome::NotFound;
        };
        if conn.send(frame) {
            DeliveryOutcome::Delivered
        } else {
            warn!(channel, conn_id = %conn.conn_id, "push target closed; dropping registration");
            self.unregister(channel, &conn.conn_id);
            DeliveryOutcome::WriteError
        }
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
