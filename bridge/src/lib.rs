// Relay bridge: HTTP submission, WebSocket clients and the Pally tip feed

pub mod assets;
pub mod config;
pub mod feed;
pub mod http;
pub mod websocket;

use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use relay_audio::{
    DirectoryAlertSource, DirectoryEffectLibrary, ElevenLabsSynthesizer, FfmpegPostProcessor,
};
use relay_core::{Providers, Relay, RelayError};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::{info, warn};

pub use config::BridgeConfig;
pub use feed::{FeedAdapter, FeedConfig};

#[derive(thiserror::Error, Debug)]
pub enum BridgeError {
    #[error(transparent)]
    Relay(#[from] RelayError),
    #[error("invalid or missing key")]
    Unauthorized,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, BridgeError>;

impl BridgeError {
    pub fn status(&self) -> StatusCode {
        match self {
            BridgeError::Unauthorized => StatusCode::UNAUTHORIZED,
            BridgeError::BadRequest(_) => StatusCode::BAD_REQUEST,
            BridgeError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            BridgeError::Relay(e) => match e {
                RelayError::Parse(_) | RelayError::EffectNotFound(_) => StatusCode::BAD_REQUEST,
                RelayError::NotFound(_) => StatusCode::NOT_FOUND,
                RelayError::Busy(_) => StatusCode::TOO_MANY_REQUESTS,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(target: "http", error = %self, "Request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Clone)]
pub struct BridgeState {
    pub relay: Relay,
    /// Key `/tts` callers must present; `None` refuses every request
    pub tts_key: Option<Arc<str>>,
}

impl BridgeState {
    pub fn new(relay: Relay, tts_key: Option<String>) -> Self {
        if tts_key.is_none() {
            warn!(target: "http", "TTS_KEY is not set; /tts will reject all requests");
        }
        Self {
            relay,
            tts_key: tts_key.map(Arc::from),
        }
    }
}

/// Wire the production collaborators into a relay runtime
pub fn build_relay(cfg: &BridgeConfig) -> relay_core::Result<Relay> {
    let providers = Providers {
        synthesizer: Arc::new(ElevenLabsSynthesizer::new(cfg.elevenlabs.clone())?),
        post_processor: Arc::new(FfmpegPostProcessor::new(cfg.ffmpeg.clone())),
        effects: Arc::new(DirectoryEffectLibrary::new(cfg.effects_dir.clone())),
        alerts: Arc::new(DirectoryAlertSource::new(cfg.alerts.clone())),
    };
    Relay::new(cfg.relay_config(), cfg.catalog.build(), providers)
}

pub fn router(state: BridgeState, static_dir: Option<&Path>) -> Router {
    let app = Router::new()
        .route("/tts", get(http::speak))
        .route("/ws", get(websocket::upgrade))
        .route("/api/voices", get(http::voices))
        .route("/api/effects", get(http::effects))
        .route("/health", get(http::health));

    let app = match static_dir {
        Some(dir) if dir.is_dir() => app.fallback_service(ServeDir::new(dir)),
        Some(dir) => {
            warn!(target: "http", dir = ?dir, "Static directory not found; serving API only");
            app
        }
        None => app,
    };

    app.layer(
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    )
    .with_state(state)
}

pub async fn start_server<F>(
    addr: SocketAddr,
    state: BridgeState,
    static_dir: Option<&Path>,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(state, static_dir);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| BridgeError::Internal(format!("bind {addr}: {e}")))?;
    info!(target: "http", addr = %addr, "Relay server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| BridgeError::Internal(e.to_string()))?;
    info!(target: "http", "Relay server stopped");
    Ok(())
}
