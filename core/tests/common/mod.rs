//! Shared fakes for relay-core tests
//!
//! - `StaticEffects`: effect library over a fixed name list
//! - `EchoSynth`: returns the text as audio and records every request
//! - `FailingSynth`: always fails
//! - `SlowSynth`: echoes, but takes five seconds for the text `slow`
//! - `PanickingSynth`: panics inside the delivery task
//! - `TagProcessor`: appends `+<modifier>` to the audio
//! - `FixedAlert`: a fixed alert sound with a known duration
#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use relay_core::{
    AlertSound, AlertSource, ChannelRegistry, ConnectionHandle, DeliveryConfig, EffectLibrary,
    LivenessConfig, NoAlerts, Outbound, PostProcessor, Providers, Relay, RelayConfig, RelayError,
    Result, SpeechSynthesizer, SynthesisModel, SynthesisRequest, Voice, VoiceCatalog,
};
use tokio::sync::mpsc;

pub const VERSION: &str = "test-version";

pub struct StaticEffects(pub Vec<String>);

impl StaticEffects {
    pub fn new(names: &[&str]) -> Self {
        Self(names.iter().map(|n| n.to_string()).collect())
    }
}

#[async_trait]
impl EffectLibrary for StaticEffects {
    fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|n| n.eq_ignore_ascii_case(name))
    }

    fn names(&self) -> Vec<String> {
        self.0.clone()
    }

    async fn load(&self, name: &str) -> Result<Vec<u8>> {
        if self.contains(name) {
            Ok(format!("effect:{name}").into_bytes())
        } else {
            Err(RelayError::EffectNotFound(name.to_string()))
        }
    }
}

#[derive(Default)]
pub struct EchoSynth {
    pub requests: Mutex<Vec<SynthesisRequest>>,
}

#[async_trait]
impl SpeechSynthesizer for EchoSynth {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Vec<u8>> {
        if let Ok(mut seen) = self.requests.lock() {
            seen.push(request.clone());
        }
        Ok(request.text.clone().into_bytes())
    }
}

pub struct FailingSynth;

#[async_trait]
impl SpeechSynthesizer for FailingSynth {
    async fn synthesize(&self, _request: &SynthesisRequest) -> Result<Vec<u8>> {
        Err(RelayError::Synthesis("API error (status 401): invalid key".into()))
    }
}

pub struct SlowSynth;

#[async_trait]
impl SpeechSynthesizer for SlowSynth {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Vec<u8>> {
        if request.text == "slow" {
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
        Ok(request.text.clone().into_bytes())
    }
}

pub struct PanickingSynth;

#[async_trait]
impl SpeechSynthesizer for PanickingSynth {
    async fn synthesize(&self, _request: &SynthesisRequest) -> Result<Vec<u8>> {
        panic!("synthesizer crashed")
    }
}

pub struct TagProcessor;

#[async_trait]
impl PostProcessor for TagProcessor {
    async fn apply(&self, mut audio: Vec<u8>, modifier: &str, _channel: &str) -> Result<Vec<u8>> {
        audio.extend_from_slice(format!("+{modifier}").as_bytes());
        Ok(audio)
    }
}

pub struct FixedAlert(pub Duration);

#[async_trait]
impl AlertSource for FixedAlert {
    async fn pick(&self, _channel: &str) -> Result<Option<AlertSound>> {
        Ok(Some(AlertSound {
            audio: b"alert".to_vec(),
            duration: Some(self.0),
        }))
    }
}

pub fn catalog() -> VoiceCatalog {
    VoiceCatalog::new(vec![Voice::new("alice", "id-alice"), Voice::new("bob", "id-bob")])
        .with_model("bob", SynthesisModel::Turbo)
}

pub fn providers(synth: Arc<dyn SpeechSynthesizer>) -> Providers {
    Providers {
        synthesizer: synth,
        post_processor: Arc::new(TagProcessor),
        effects: Arc::new(StaticEffects::new(&["airhorn", "rimshot"])),
        alerts: Arc::new(NoAlerts),
    }
}

/// Liveness timers far beyond any test's virtual runtime
pub fn quiet_liveness() -> LivenessConfig {
    LivenessConfig {
        expected_interval: Duration::from_secs(3_000),
        deadline: Duration::from_secs(3_600),
        initial_deadline: Duration::from_secs(7_200),
        keepalive_interval: Duration::from_secs(3_600),
    }
}

pub fn config() -> RelayConfig {
    RelayConfig {
        asset_version: VERSION.to_string(),
        liveness: quiet_liveness(),
        delivery: DeliveryConfig::default(),
    }
}

pub fn relay(providers: Providers) -> Relay {
    Relay::new(config(), catalog(), providers).expect("relay builds")
}

pub fn connect(
    registry: &ChannelRegistry,
    channel: &str,
) -> (ConnectionHandle, mpsc::Receiver<Outbound>) {
    let (tx, rx) = mpsc::channel(64);
    let handle = registry
        .register(channel, Some(VERSION), tx)
        .expect("register client");
    (handle, rx)
}

pub fn text(msg: &Outbound) -> Option<&str> {
    match msg {
        Outbound::Text(t) => Some(t.as_str()),
        _ => None,
    }
}

/// Next non-keepalive message
pub async fn next(rx: &mut mpsc::Receiver<Outbound>) -> Outbound {
    loop {
        match rx.recv().await {
            Some(Outbound::Keepalive) => continue,
            Some(msg) => return msg,
            None => panic!("connection writer closed"),
        }
    }
}
