// HTTP handlers: speech submission and read-only catalog endpoints

use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};
use relay_core::{Message, Origin, SynthesisParams};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::{BridgeError, BridgeState, Result};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeakQuery {
    #[serde(default)]
    pub channel: String,
    pub key: Option<String>,
    #[serde(default)]
    pub text: String,
    pub voice: Option<String>,
    pub stability: Option<String>,
    pub similarity_boost: Option<String>,
    pub style: Option<String>,
}

impl SpeakQuery {
    /// Unparseable numbers fall back to the defaults
    pub fn params(&self) -> SynthesisParams {
        let defaults = SynthesisParams::default();
        let parse = |raw: &Option<String>, fallback: f64| {
            raw.as_deref()
                .and_then(|s| s.trim().parse::<f64>().ok())
                .filter(|v| v.is_finite())
                .unwrap_or(fallback)
        };
        SynthesisParams {
            stability: parse(&self.stability, defaults.stability),
            similarity_boost: parse(&self.similarity_boost, defaults.similarity_boost),
            style: parse(&self.style, defaults.style),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SpeakResponse {
    pub correlation_id: String,
    pub batch: String,
    pub segments: usize,
}

fn authorize(state: &BridgeState, key: Option<&str>) -> Result<()> {
    match (state.tts_key.as_deref(), key) {
        (Some(expected), Some(given)) if expected == given => Ok(()),
        _ => Err(BridgeError::Unauthorized),
    }
}

/// `GET /tts`: responds once every segment has audio; playback continues in the background
pub async fn speak(
    State(state): State<BridgeState>,
    Query(query): Query<SpeakQuery>,
) -> Result<Json<SpeakResponse>> {
    authorize(&state, query.key.as_deref())?;
    let channel = query.channel.trim();
    if channel.is_empty() {
        return Err(BridgeError::BadRequest("channel is required".into()));
    }

    let message = Message::new(channel, query.text.as_str())
        .with_voice(query.voice.clone().unwrap_or_default())
        .with_params(query.params())
        .with_origin(Origin::Http);

    let mut handle = state.relay.submit(message)?;
    info!(
        target: "http",
        channel = %handle.channel,
        batch = %handle.batch_name,
        segments = handle.segments,
        "Accepted speech request"
    );
    handle.generated().await?;

    let response = SpeakResponse {
        correlation_id: handle.correlation_id.clone(),
        batch: handle.batch_name.clone(),
        segments: handle.segments,
    };
    tokio::spawn(async move {
        let channel = handle.channel.clone();
        let batch = handle.batch_name.clone();
        let outcome = handle.finished().await;
        debug!(target: "http", channel = %channel, batch = %batch, outcome = ?outcome, "Batch finished");
    });
    Ok(Json(response))
}

pub async fn voices(State(state): State<BridgeState>) -> Json<Vec<String>> {
    Json(state.relay.catalog.names())
}

pub async fn effects(State(state): State<BridgeState>) -> Json<Vec<String>> {
    Json(state.relay.providers.effects.names())
}

pub async fn health(State(state): State<BridgeState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": state.relay.registry.asset_version(),
        "clients": state.relay.registry.len(),
        "pending": state.relay.queue.len(),
    }))
}
