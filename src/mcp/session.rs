//! Per-session state and the HTTP session table.
//!
//! For stdio and WebSocket transports one [`Session`] exists per connection,
//! owned exclusively by that connection's task — no locking. HTTP requests
//! are stateless, so their sessions live in a shared [`SessionTable`] keyed
//! by a server-generated identifier carried in the `Mcp-Session-Id` header.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// Mutable state scoped to one logical client.
#[derive(Debug, Default)]
pub struct Session {
    /// Set permanently true by a successful `initialize` (until teardown or
    /// re-negotiation).
    pub initialised: bool,
    /// Whether the client acknowledged the handshake with `initialized`.
    pub acknowledged: bool,
    /// Protocol version negotiated during `initialize`.
    pub protocol_version: Option<String>,
    /// Model chosen via `models/select`. Last write wins.
    pub selected_model: Option<String>,
}

impl Session {
    /// Creates a fresh, uninitialised session.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets the negotiation-scoped flags for a repeated `initialize`.
    ///
    /// Registrations are untouched (they live in the registry); only the
    /// session-scoped selections are cleared.
    pub fn renegotiate(&mut self, protocol_version: String) {
        self.initialised = true;
        self.acknowledged = false;
        self.protocol_version = Some(protocol_version);
        self.selected_model = None;
    }
}

/// A shared handle to one HTTP session and its push channels.
#[derive(Debug)]
pub struct SessionHandle {
    /// The server-generated session identifier.
    pub id: String,
    /// The session record. Concurrent requests mutate it last-write-wins.
    pub state: RwLock<Session>,
    /// Live SSE channels bound to this session (1-to-many). Dropping a
    /// sender ends the corresponding stream.
    sse_clients: RwLock<Vec<mpsc::UnboundedSender<Value>>>,
}

impl SessionHandle {
    fn new(id: String) -> Self {
        Self {
            id,
            state: RwLock::new(Session::new()),
            sse_clients: RwLock::new(Vec::new()),
        }
    }

    /// Creates a handle owned by a single connection (stdio/WebSocket),
    /// not tracked by any table.
    #[must_use]
    pub fn for_connection(id: String) -> Self {
        Self::new(id)
    }

    /// Registers a new push channel and returns its receiving half.
    pub async fn open_sse_channel(&self) -> mpsc::UnboundedReceiver<Value> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.sse_clients.write().await.push(tx);
        rx
    }

    /// Pushes an event to every live channel, pruning closed ones.
    pub async fn push_event(&self, event: &Value) {
        let mut clients = self.sse_clients.write().await;
        clients.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Returns the number of live push channels.
    pub async fn sse_client_count(&self) -> usize {
        let mut clients = self.sse_clients.write().await;
        clients.retain(|tx| !tx.is_closed());
        clients.len()
    }

    /// Drops every push channel, ending the associated streams.
    pub async fn close_sse_channels(&self) {
        self.sse_clients.write().await.clear();
    }
}

/// Shared table of HTTP sessions.
///
/// Cheap to clone; all clones view the same table.
#[derive(Debug, Clone, Default)]
pub struct SessionTable {
    sessions: Arc<RwLock<HashMap<String, Arc<SessionHandle>>>>,
}

impl SessionTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mints a new session with a server-generated identifier.
    pub async fn create(&self) -> Arc<SessionHandle> {
        let id = Uuid::new_v4().to_string();
        let handle = Arc::new(SessionHandle::new(id.clone()));
        self.sessions.write().await.insert(id.clone(), handle.clone());
        tracing::debug!(session_id = %id, "Created HTTP session");
        handle
    }

    /// Looks a session up by identifier.
    pub async fn get(&self, id: &str) -> Option<Arc<SessionHandle>> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Removes a session, closing its push channels.
    ///
    /// Returns `true` if the session existed.
    pub async fn remove(&self, id: &str) -> bool {
        let removed = self.sessions.write().await.remove(id);
        if let Some(handle) = removed {
            handle.close_sse_channels().await;
            tracing::debug!(session_id = %id, "Removed HTTP session");
            true
        } else {
            false
        }
    }

    /// Removes every session and closes every push channel.
    pub async fn clear(&self) {
        let drained: Vec<_> = self.sessions.write().await.drain().collect();
        for (_, handle) in drained {
            handle.close_sse_channels().await;
        }
    }

    /// Returns the number of live sessions.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Returns `true` if no sessions exist.
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
