//! Change-notification fan-out
//!
//! Tracks connected viewer sessions and delivers typed notifications to all
//! of them. Sessions are an explicit registry of outbound channels so that
//! a delivery failure removes exactly the failing session and never aborts
//! delivery to the others. The WebSocket endpoint in `ws.rs` owns the
//! socket side of each session.

use crate::domain::{ChangeNotification, GatewayHealth, GatewayStatus};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

/// Identifier handed to a session at registration.
pub type SessionId = u64;

/// Session registry plus last-known gateway status.
pub struct Broadcaster {
    sessions: RwLock<HashMap<SessionId, mpsc::Sender<String>>>,
    next_id: AtomicU64,
    last_status: RwLock<GatewayStatus>,
    session_buffer: usize,
}

impl Broadcaster {
    pub fn new(session_buffer: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            // Nothing is known about the gateway until the first probe
            last_status: RwLock::new(GatewayStatus::unknown(GatewayHealth::Offline)),
            session_buffer,
        }
    }

    /// Register a new session. The receiver side carries pre-serialized
    /// notifications destined for that session's socket. The session
    /// immediately receives a synthetic status notification reflecting the
    /// current best-known gateway state.
    pub async fn register(&self) -> (SessionId, mpsc::Receiver<String>) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(self.session_buffer);

        let initial =
            ChangeNotification::GatewayStatusChanged(self.last_status.read().await.clone());
        if let Some(json) = serialize(&initial) {
            // Channel is empty at this point; send cannot fail
            let _ = tx.try_send(json);
        }

        self.sessions.write().await.insert(id, tx);
        debug!(session_id = id, "Session registered");
        (id, rx)
    }

    /// Remove a session. Idempotent; safe after the session is already gone.
    pub async fn unregister(&self, id: SessionId) {
        if self.sessions.write().await.remove(&id).is_some() {
            debug!(session_id = id, "Session unregistered");
        }
    }

    /// Deliver a notification to every registered session. The payload is
    /// serialized once. A session whose channel is closed or full is
    /// dropped from the registry; the remaining sessions still receive the
    /// notification.
    pub async fn broadcast(&self, notification: ChangeNotification) {
        let Some(json) = serialize(&notification) else {
            return;
        };

        let mut dead = Vec::new();
        {
            let sessions = self.sessions.read().await;
            for (id, tx) in sessions.iter() {
                if tx.try_send(json.clone()).is_err() {
                    warn!(session_id = id, "Session not accepting messages, dropping");
                    dead.push(*id);
                }
            }
            debug!(
                kind = notification.kind(),
                receivers = sessions.len() - dead.len(),
                "Broadcast notification"
            );
        }

        if !dead.is_empty() {
            let mut sessions = self.sessions.write().await;
            for id in dead {
                sessions.remove(&id);
            }
        }
    }

    /// Deliver a notification to a single session, never broadcast. Used
    /// for error replies to malformed inbound messages.
    pub async fn send_to(&self, id: SessionId, notification: ChangeNotification) {
        let Some(json) = serialize(&notification) else {
            return;
        };

        let sessions = self.sessions.read().await;
        if let Some(tx) = sessions.get(&id) {
            if tx.try_send(json).is_err() {
                warn!(session_id = id, "Targeted delivery failed");
            }
        }
    }

    /// Number of currently registered sessions. No side effects.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Last-known gateway status, as handed to newly registered sessions.
    pub async fn last_status(&self) -> GatewayStatus {
        self.last_status.read().await.clone()
    }

    /// Record a fresh status observation. Returns true when the health
    /// value changed, which is the poller's cue to broadcast.
    pub async fn update_status(&self, status: GatewayStatus) -> bool {
        let mut last = self.last_status.write().await;
        let changed = last.status != status.status;
        *last = status;
        changed
    }
}

fn serialize(notification: &ChangeNotification) -> Option<String> {
    match serde_json::to_string(notification) {
        Ok(json) => Some(json),
        Err(e) => {
            warn!(error = %e, "Failed to serialize notification");
            None
        }
    }
}
