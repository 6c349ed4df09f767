//! auth-server library: the OAuth 2.0 Authorization Code core and its HTTP
//! surface.
//!
//! Provides:
//! - Stateless signed authorization codes, access tokens and refresh tokens
//! - A static client allow-list
//! - `GET /authorize` and `POST /token`
//! - RFC 8414 metadata discovery

pub mod codec;
pub mod config;
pub mod error;
pub mod oauth;
pub mod registry;
pub mod replay;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use codec::{Claims, CodecError, TokenClass, TokenCodec};
pub use config::Config;
pub use error::OAuthError;
pub use registry::ClientRegistry;
pub use replay::{MemoryReplayGuard, ReplayGuard};

/// Shared application state
pub struct AppState {
    pub config: Config,
    pub codec: TokenCodec,
    pub clients: ClientRegistry,
    pub replay: Arc<dyn ReplayGuard>,
    /// Public URL for this service (used in OAuth metadata)
    pub public_url: String,
    /// Prefix for the OAuth endpoints, empty or starting with '/'
    pub base_path: String,
}

impl AppState {
    /// Build state from configuration, generating fresh signing keys
    pub fn new(config: Config, public_url: String) -> Result<Self, CodecError> {
        let codec = TokenCodec::new(&config.tokens)?;
        let clients = ClientRegistry::new(config.allowed_client_ids.iter().cloned());

        Ok(Self {
            config,
            codec,
            clients,
            replay: Arc::new(MemoryReplayGuard::new()),
            public_url,
            base_path: String::new(),
        })
    }

    pub fn with_base_path(mut self, base_path: &str) -> Self {
        self.base_path = normalize_base_path(base_path);
        self
    }

    pub fn with_replay_guard(mut self, replay: Arc<dyn ReplayGuard>) -> Self {
        self.replay = replay;
        self
    }
}

/// Build the HTTP router
pub fn router(state: Arc<AppState>) -> Router {
    let endpoints = Router::new()
        .route("/authorize", get(oauth::authorize::handler))
        .route("/token", post(oauth::token::handler));

    let endpoints = if state.base_path.is_empty() {
        endpoints
    } else {
        Router::new().nest(&state.base_path, endpoints)
    };

    Router::new()
        // OAuth metadata (RFC 8414)
        .route(
            "/.well-known/oauth-authorization-server",
            get(oauth::metadata::handler),
        )
        .merge(endpoints)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// "" and "/" mean no prefix; anything else gets one leading '/' and no trailing '/'
fn normalize_base_path(base_path: &str) -> String {
    let trimmed = base_path.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{}", trimmed)
    }
}
