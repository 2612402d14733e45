// In-memory collaborators for bridge tests
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use relay_bridge::BridgeState;
use relay_core::{
    ConnectionHandle, DeliveryConfig, EffectLibrary, LivenessConfig, NoAlerts, Outbound,
    PostProcessor, Providers, Relay, RelayConfig, RelayError, Result, SpeechSynthesizer,
    SynthesisRequest, Voice, VoiceCatalog,
};
use tokio::sync::mpsc;

pub const VERSION: &str = "bridge-test";
pub const KEY: &str = "sekrit";

struct Effects;

#[async_trait]
impl EffectLibrary for Effects {
    fn contains(&self, name: &str) -> bool {
        name.eq_ignore_ascii_case("airhorn")
    }

    fn names(&self) -> Vec<String> {
        vec!["airhorn".to_string()]
    }

    async fn load(&self, name: &str) -> Result<Vec<u8>> {
        if self.contains(name) {
            Ok(b"horn".to_vec())
        } else {
            Err(RelayError::EffectNotFound(name.to_string()))
        }
    }
}

struct Echo;

#[async_trait]
impl SpeechSynthesizer for Echo {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Vec<u8>> {
        Ok(request.text.clone().into_bytes())
    }
}

struct Passthrough;

#[async_trait]
impl PostProcessor for Passthrough {
    async fn apply(&self, audio: Vec<u8>, _modifier: &str, _channel: &str) -> Result<Vec<u8>> {
        Ok(audio)
    }
}

pub fn relay() -> Relay {
    let providers = Providers {
        synthesizer: Arc::new(Echo),
        post_processor: Arc::new(Passthrough),
        effects: Arc::new(Effects),
        alerts: Arc::new(NoAlerts),
    };
    let config = RelayConfig {
        asset_version: VERSION.to_string(),
        liveness: LivenessConfig {
            expected_interval: Duration::from_secs(3_000),
            deadline: Duration::from_secs(3_600),
            initial_deadline: Duration::from_secs(7_200),
            keepalive_interval: Duration::from_secs(3_600),
        },
        delivery: DeliveryConfig::default(),
    };
    let catalog = VoiceCatalog::new(vec![Voice::new("alice", "id-alice"), Voice::new("bob", "id-bob")]);
    Relay::new(config, catalog, providers).expect("relay builds")
}

pub fn state() -> BridgeState {
    BridgeState::new(relay(), Some(KEY.to_string()))
}

pub fn connect(relay: &Relay, channel: &str) -> (ConnectionHandle, mpsc::Receiver<Outbound>) {
    let (tx, rx) = mpsc::channel(64);
    let handle = relay
        .registry
        .register(channel, Some(VERSION), tx)
        .expect("register client");
    (handle, rx)
}
