//! Embedded HTTP server for lanshare.
//!
//! Browsers and scripts on the same network upload files in resumable
//! chunks, read the shared file list and message board, and follow new
//! files as they land through a Server-Sent Events stream.
//!
//! ## Starting the Server
//!
//! ```bash
//! lanshare serve                     # Default port 5000
//! lanshare serve --port 9000         # Custom port
//! lanshare serve --localhost-only    # Restrict to localhost
//! lanshare serve --auth              # Require a bearer token
//! ```
//!
//! ## API Endpoints
//!
//! | Method | Endpoint | Description |
//! |--------|----------|-------------|
//! | POST | /api/upload/init | Open an upload session |
//! | POST | /api/upload/chunk | Upload one chunk (multipart) |
//! | POST | /api/upload/complete | Finalize an upload |
//! | POST | /api/upload/retry | List missing chunks |
//! | GET | /api/upload/sessions | In-flight sessions |
//! | GET | /api/files | Finished files |
//! | GET | /api/messages | Text message board |
//! | POST | /api/text | Post a text message |
//! | GET | /api/events | Live events (SSE) |

pub mod error;
pub mod handlers;
pub mod sse;
pub mod state;

use std::borrow::Cow;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, State},
    http::{header, Request},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use percent_encoding::percent_decode_str;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::events::EventBus;
use crate::upload::UploadManager;

pub use error::{ApiError, ApiResult};
pub use state::{AppState, SharedState};

/// Room left in a chunk request for the multipart envelope and text fields.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Configuration for the web server.
#[derive(Debug, Clone)]
pub struct WebServerConfig {
    /// Port to listen on
    pub port: u16,
    /// Bind to localhost only
    pub localhost_only: bool,
    /// Bearer token required on `/api/*`
    pub auth_token: Option<String>,
}

impl Default for WebServerConfig {
    fn default() -> Self {
        Self {
            port: crate::DEFAULT_PORT,
            localhost_only: false,
            auth_token: None,
        }
    }
}

impl From<&crate::config::ServerConfig> for WebServerConfig {
    fn from(server: &crate::config::ServerConfig) -> Self {
        Self {
            port: server.port,
            localhost_only: server.localhost_only,
            auth_token: server.auth_token.clone(),
        }
    }
}

impl WebServerConfig {
    /// Generate a random access token.
    #[must_use]
    pub fn generate_token() -> String {
        use rand::Rng;
        const CHARSET: &[u8] = b"abcdefghijkmnopqrstuvwxyzABCDEFGHJKLMNPQRSTUVWXYZ23456789";
        let mut rng = rand::thread_rng();
        (0..16)
            .map(|_| {
                let idx = rng.gen_range(0..CHARSET.len());
                CHARSET[idx] as char
            })
            .collect()
    }

    /// Get the bind address for the server.
    ///
    /// Non-local servers prefer a dual-stack IPv6 socket; see
    /// [`WebServer::bind`] for the IPv4 fallback.
    #[must_use]
    pub fn bind_addr(&self) -> SocketAddr {
        if self.localhost_only {
            SocketAddr::from((Ipv4Addr::LOCALHOST, self.port))
        } else {
            SocketAddr::from((Ipv6Addr::UNSPECIFIED, self.port))
        }
    }
}

/// Build the API router over shared state.
///
/// `chunk_size` bounds request bodies: a chunk upload may carry one chunk
/// plus its multipart envelope.
pub fn router(state: SharedState, chunk_size: usize) -> Router {
    let api = Router::new()
        .route("/api/upload/init", post(handlers::init_upload))
        .route("/api/upload/chunk", post(handlers::upload_chunk))
        .route("/api/upload/complete", post(handlers::complete_upload))
        .route("/api/upload/retry", post(handlers::retry_upload))
        .route("/api/upload/sessions", get(handlers::list_sessions))
        .route("/api/files", get(handlers::list_files))
        .route("/api/messages", get(handlers::list_messages))
        .route("/api/text", post(handlers::post_text))
        .route("/api/events", get(sse::events_sse))
        .layer(middleware::from_fn_with_state(state.clone(), require_token));

    api.layer(DefaultBodyLimit::max(
        chunk_size.saturating_add(MULTIPART_OVERHEAD),
    ))
    .layer(
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    )
    .with_state(state)
}

/// Reject API requests without the configured bearer token.
///
/// `EventSource` cannot set headers, so a `token` query parameter is
/// accepted as well.
async fn require_token(
    State(state): State<SharedState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(expected) = state.auth_token.as_deref() else {
        return next.run(request).await;
    };

    let authorized = {
        let from_header = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(|v| Cow::Borrowed(v.trim()));
        let from_query = request.uri().query().and_then(|q| {
            q.split('&')
                .find_map(|pair| pair.strip_prefix("token="))
                .and_then(|raw| percent_decode_str(raw).decode_utf8().ok())
        });

        from_header
            .or(from_query)
            .is_some_and(|token| constant_time_eq(token.as_bytes(), expected.as_bytes()))
    };

    if authorized {
        next.run(request).await
    } else {
        tracing::debug!(path = %request.uri().path(), "Rejected request without valid token");
        ApiError::unauthorized("Bearer token required").into_response()
    }
}

/// Compare two byte strings in time independent of where they differ.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// The web server instance.
#[derive(Debug)]
pub struct WebServer {
    config: WebServerConfig,
    app: Config,
}

impl WebServer {
    /// Create a new web server.
    ///
    /// `config` controls the listener; `app` supplies storage and upload
    /// settings.
    #[must_use]
    pub const fn new(config: WebServerConfig, app: Config) -> Self {
        Self { config, app }
    }

    /// Get the server configuration.
    #[must_use]
    pub const fn config(&self) -> &WebServerConfig {
        &self.config
    }

    /// Bind the listening socket.
    ///
    /// For non-local servers a dual-stack IPv6 socket is tried first so
    /// one listener serves both families; if the host has no IPv6 the
    /// server falls back to `0.0.0.0`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServerError`] if no socket can be bound.
    pub fn bind(&self) -> Result<tokio::net::TcpListener> {
        let addr = self.config.bind_addr();

        let socket = match bind_socket(addr, addr.is_ipv6()) {
            Ok(socket) => socket,
            Err(e) if addr.is_ipv6() => {
                tracing::warn!(error = %e, "Dual-stack bind failed, falling back to IPv4");
                let v4 = SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.config.port));
                bind_socket(v4, false)
                    .map_err(|e| Error::ServerError(format!("failed to bind {v4}: {e}")))?
            }
            Err(e) => return Err(Error::ServerError(format!("failed to bind {addr}: {e}"))),
        };

        let std_listener: std::net::TcpListener = socket.into();
        tokio::net::TcpListener::from_std(std_listener)
            .map_err(|e| Error::ServerError(format!("failed to register listener: {e}")))
    }

    /// Start the web server and run until Ctrl+C.
    ///
    /// Opens the upload storage, starts the background expiry sweep, and
    /// serves the API.
    ///
    /// # Errors
    ///
    /// Returns an error if storage cannot be opened or the server cannot
    /// be started.
    pub async fn start(&self) -> Result<()> {
        let events = EventBus::default();
        let manager = Arc::new(
            UploadManager::open(
                &self.app.storage,
                &self.app.upload,
                Arc::new(events.clone()),
            )
            .await?,
        );

        let sweeper = manager.spawn_sweeper(self.app.upload.sweep_interval);

        let state = Arc::new(AppState::new(
            Arc::clone(&manager),
            events,
            self.config.auth_token.clone(),
        ));
        let app = router(state, self.app.upload.chunk_size);

        let listener = self.bind()?;
        let local_addr = listener.local_addr()?;
        tracing::info!(
            addr = %local_addr,
            upload_dir = %manager.upload_dir().display(),
            auth = self.config.auth_token.is_some(),
            "Web server listening"
        );

        let result = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await;

        sweeper.abort();
        tracing::info!("Web server stopped");

        result.map_err(|e| Error::ServerError(e.to_string()))
    }
}

fn bind_socket(addr: SocketAddr, dual_stack: bool) -> std::io::Result<socket2::Socket> {
    let domain = if addr.is_ipv6() {
        socket2::Domain::IPV6
    } else {
        socket2::Domain::IPV4
    };
    let socket = socket2::Socket::new(
        domain,
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    if dual_stack {
        socket.set_only_v6(false)?;
    }
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;
    socket.set_nonblocking(true)?;

    Ok(socket)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_token() {
        let token = WebServerConfig::generate_token();
        assert_eq!(token.len(), 16);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(token, WebServerConfig::generate_token());
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"s3cret", b"s3cret"));
        assert!(!constant_time_eq(b"s3cret", b"s3creT"));
        assert!(!constant_time_eq(b"s3cret", b"s3cre"));
        assert!(constant_time_eq(b"", b""));
    }

    #[test]
    fn test_bind_addr() {
        let mut config = WebServerConfig::default();
        assert_eq!(config.bind_addr().port(), crate::DEFAULT_PORT);
        assert!(config.bind_addr().is_ipv6());

        config.localhost_only = true;
        assert_eq!(
            config.bind_addr(),
            SocketAddr::from((Ipv4Addr::LOCALHOST, crate::DEFAULT_PORT))
        );
    }

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let server = WebServer::new(
            WebServerConfig {
                port: 0,
                localhost_only: true,
                auth_token: None,
            },
            Config::default(),
        );

        let listener = server.bind().expect("bind");
        assert!(listener.local_addr().unwrap().ip().is_loopback());
    }
}
