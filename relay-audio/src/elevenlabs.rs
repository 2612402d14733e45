//! ElevenLabs speech synthesis
//!
//! Streams `POST {base}/v1/text-to-speech/{voice_id}/stream` and collects the
//! encoded audio. Any non-2xx response is a synthesis error carrying the
//! status and body.
//!
//! Env overrides:
//! - ELEVENLABS_KEY
//! - ELEVENLABS_BASE_URL
//! - TTS_TIMEOUT_MS

use std::time::Duration;

use async_trait::async_trait;
use relay_core::{RelayError, Result, SpeechSynthesizer, SynthesisRequest};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

#[derive(Clone, Debug)]
pub struct ElevenLabsConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout_ms: u64,
}

impl Default for ElevenLabsConfig {
    fn default() -> Self {
        Self {
            api_key: std::env::var("ELEVENLABS_KEY").unwrap_or_default(),
            base_url: std::env::var("ELEVENLABS_BASE_URL")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "https://api.elevenlabs.io".to_string()),
            timeout_ms: std::env::var("TTS_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(60_000),
        }
    }
}

pub struct ElevenLabsSynthesizer {
    client: reqwest::Client,
    cfg: ElevenLabsConfig,
}

impl ElevenLabsSynthesizer {
    pub fn new(cfg: ElevenLabsConfig) -> Result<Self> {
        if cfg.api_key.is_empty() {
            warn!(target: "audio", "ELEVENLABS_KEY is not set; synthesis requests will be rejected");
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(|e| RelayError::Config(format!("http client: {e}")))?;
        info!(target: "audio", base_url = %cfg.base_url, "ElevenLabs synthesizer ready");
        Ok(Self { client, cfg })
    }

    fn endpoint(&self, voice_id: &str) -> String {
        format!(
            "{}/v1/text-to-speech/{}/stream",
            self.cfg.base_url.trim_end_matches('/'),
            voice_id
        )
    }
}

/// JSON body for one synthesis call. `style` is left out for models that reject it.
pub fn request_body(request: &SynthesisRequest) -> Value {
    let mut settings = json!({
        "stability": request.stability,
        "similarity_boost": request.similarity_boost,
    });
    if let Some(style) = request.style {
        settings["style"] = json!(style);
    }
    json!({
        "text": request.text,
        "model_id": request.model.model_id(),
        "voice_settings": settings,
    })
}

#[async_trait]
impl SpeechSynthesizer for ElevenLabsSynthesizer {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Vec<u8>> {
        debug!(
            target: "audio",
            voice = %request.voice_name,
            model = request.model.model_id(),
            chars = request.text.chars().count(),
            "Requesting speech"
        );
        let response = self
            .client
            .post(self.endpoint(&request.voice_id))
            .query(&[("output_format", request.output_format.as_str())])
            .header("xi-api-key", &self.cfg.api_key)
            .header("accept", "audio/mpeg")
            .json(&request_body(request))
            .send()
            .await
            .map_err(|e| RelayError::Synthesis(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::Synthesis(format!(
                "API error (status {}): {}",
                status.as_u16(),
                body
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| RelayError::Synthesis(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}
