//! Application state management for the web server.
//!
//! This module provides shared state that is accessible across all HTTP
//! handlers: the upload manager, the event bus feeding SSE clients, and
//! the in-memory text message board.

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::events::{EventBus, TextMessage};
use crate::upload::UploadManager;

/// Messages kept on the board before the oldest are dropped.
pub const MAX_MESSAGES: usize = 500;

/// Shared application state for the web server.
pub struct AppState {
    /// Chunked upload sessions
    pub manager: Arc<UploadManager>,
    /// Event fan-out for `/api/events` subscribers
    pub events: EventBus,
    /// Text message board, oldest first (lost on restart)
    pub messages: RwLock<Vec<TextMessage>>,
    /// Bearer token required on `/api/*`
    pub auth_token: Option<String>,
}

impl AppState {
    /// Create new application state.
    ///
    /// `events` should be the same bus the manager publishes file-ready
    /// events to, so that SSE clients see both uploads and messages.
    #[must_use]
    pub fn new(manager: Arc<UploadManager>, events: EventBus, auth_token: Option<String>) -> Self {
        Self {
            manager,
            events,
            messages: RwLock::new(Vec::new()),
            auth_token,
        }
    }

    /// Append a message to the board and broadcast it.
    ///
    /// Blank content is ignored and returns `None`.
    pub async fn post_message(&self, content: &str) -> Option<TextMessage> {
        let content = content.trim();
        if content.is_empty() {
            return None;
        }

        let message = TextMessage::now(content);
        {
            let mut messages = self.messages.write().await;
            messages.push(message.clone());
            if messages.len() > MAX_MESSAGES {
                let excess = messages.len() - MAX_MESSAGES;
                messages.drain(..excess);
            }
        }

        self.events.publish(message.clone().into());
        Some(message)
    }

    /// Snapshot of the message board.
    pub async fn messages(&self) -> Vec<TextMessage> {
        self.messages.read().await.clone()
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("manager", &self.manager)
            .field("auth_enabled", &self.auth_token.is_some())
            .finish_non_exhaustive()
    }
}

/// Thread-safe reference to application state.
pub type SharedState = Arc<AppState>;
