// External collaborators used by the delivery pipeline
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::voices::SynthesisModel;
use crate::Result;

/// Fully resolved parameters for one synthesis call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SynthesisRequest {
    pub text: String,
    pub voice_id: String,
    pub voice_name: String,
    pub model: SynthesisModel,
    pub stability: f64,
    pub similarity_boost: f64,
    /// `None` for models that reject a style setting
    pub style: Option<f64>,
    pub output_format: String,
}

/// Turns text into encoded audio bytes. Any non-success response is an error.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Vec<u8>>;
}

/// Applies a named modifier (e.g. reverb) to encoded audio
#[async_trait]
pub trait PostProcessor: Send + Sync {
    async fn apply(&self, audio: Vec<u8>, modifier: &str, channel: &str) -> Result<Vec<u8>>;
}

/// Pre-recorded effects addressed by name
#[async_trait]
pub trait EffectLibrary: Send + Sync {
    fn contains(&self, name: &str) -> bool;

    fn names(&self) -> Vec<String>;

    async fn load(&self, name: &str) -> Result<Vec<u8>>;
}

#[derive(Debug, Clone)]
pub struct AlertSound {
    pub audio: Vec<u8>,
    /// Probed playback length, if known
    pub duration: Option<Duration>,
}

/// Picks the pre-roll sound for alert-flagged batches
#[async_trait]
pub trait AlertSource: Send + Sync {
    async fn pick(&self, channel: &str) -> Result<Option<AlertSound>>;
}

/// Alert source for deployments without alert sounds
pub struct NoAlerts;

#[async_trait]
impl AlertSource for NoAlerts {
    async fn pick(&self, _channel: &str) -> Result<Option<AlertSound>> {
        Ok(None)
    }
}

/// The set of collaborators a `Relay` is built with
#[derive(Clone)]
pub struct Providers {
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub post_processor: Arc<dyn PostProcessor>,
    pub effects: Arc<dyn EffectLibrary>,
    pub alerts: Arc<dyn AlertSource>,
}
