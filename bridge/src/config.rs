use std::fs;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use relay_audio::{AlertConfig, ElevenLabsConfig, FfmpegConfig};
use relay_core::voices::{VoiceModelEntry, VoiceModifierEntry, VoiceStyleEntry};
use relay_core::{DeliveryConfig, LivenessConfig, RelayConfig, Voice, VoiceCatalog};
use serde::de::DeserializeOwned;

use crate::assets;
use crate::feed::{FeedConfig, FeedKey, FeedVoice};

/// Server configuration: env-driven defaults with an optional TOML overlay
#[derive(Clone, Debug)]
pub struct BridgeConfig {
    pub addr: SocketAddr,
    /// Public URL of this server, used in log lines
    pub server_url: String,
    /// Key required by the `/tts` endpoint; requests are refused when unset
    pub tts_key: Option<String>,
    pub static_dir: PathBuf,
    /// File whose digest is the client version
    pub client_asset: PathBuf,
    pub effects_dir: PathBuf,
    pub catalog: CatalogConfig,
    pub elevenlabs: ElevenLabsConfig,
    pub ffmpeg: FfmpegConfig,
    pub alerts: AlertConfig,
    pub delivery: DeliveryConfig,
    pub liveness: LivenessConfig,
    pub feed: FeedConfig,
}

/// Voice entries as they appear in `VOICES`, `VOICE_MODELS`, `VOICE_STYLES`, `VOICE_MODIFIERS`
#[derive(Clone, Debug, Default)]
pub struct CatalogConfig {
    pub voices: Vec<Voice>,
    pub models: Vec<VoiceModelEntry>,
    pub styles: Vec<VoiceStyleEntry>,
    pub modifiers: Vec<VoiceModifierEntry>,
}

impl CatalogConfig {
    pub fn build(&self) -> VoiceCatalog {
        VoiceCatalog::from_entries(
            self.voices.clone(),
            &self.models,
            &self.styles,
            &self.modifiers,
        )
    }
}

/// Parse a JSON-valued env var, falling back to the default on absence or error
pub(crate) fn json_env<T: DeserializeOwned + Default>(key: &str) -> T {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => match serde_json::from_str(&raw) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(target: "config", key = %key, error = %e, "Invalid JSON in env var; ignoring");
                T::default()
            }
        },
        _ => T::default(),
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            voices: json_env("VOICES"),
            models: json_env("VOICE_MODELS"),
            styles: json_env("VOICE_STYLES"),
            modifiers: json_env("VOICE_MODIFIERS"),
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        let port = std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(8034);
        let static_dir = std::env::var("STATIC_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("static"));
        Self {
            addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
            server_url: std::env::var("SERVER_URL")
                .unwrap_or_else(|_| format!("http://localhost:{port}")),
            tts_key: std::env::var("TTS_KEY").ok().filter(|s| !s.is_empty()),
            client_asset: static_dir.join("index.html"),
            static_dir,
            effects_dir: std::env::var("EFFECTS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("effects")),
            catalog: CatalogConfig::default(),
            elevenlabs: ElevenLabsConfig::default(),
            ffmpeg: FfmpegConfig::default(),
            alerts: AlertConfig::default(),
            delivery: DeliveryConfig::default(),
            liveness: LivenessConfig::default(),
            feed: FeedConfig::default(),
        }
    }
}

impl BridgeConfig {
    /// Load configuration from a TOML file (path via RELAY_CONFIG or ./relay.toml),
    /// overlaying values onto env-driven defaults.
    pub fn load() -> Self {
        let default = Self::default();
        let path = std::env::var("RELAY_CONFIG").unwrap_or_else(|_| "relay.toml".into());
        let p = Path::new(&path);
        if !p.exists() {
            tracing::info!(target: "config", path = %path, "No TOML config found; using defaults/env");
            return default;
        }
        match fs::read_to_string(p) {
            Ok(s) => match Self::from_toml_str(&s, default.clone()) {
                Ok(cfg) => cfg,
                Err(e) => {
                    tracing::warn!(target: "config", error = %e, "Failed to parse TOML; using defaults");
                    default
                }
            },
            Err(e) => {
                tracing::warn!(target: "config", error = %e, "Failed to read TOML; using defaults");
                default
            }
        }
    }

    pub fn from_toml_str(raw: &str, base: Self) -> Result<Self, toml::de::Error> {
        let overlay: RelayToml = toml::from_str(raw)?;
        Ok(overlay.overlay(base))
    }

    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            asset_version: assets::asset_version(&self.client_asset),
            liveness: self.liveness.clone(),
            delivery: self.delivery.clone(),
        }
    }
}

// =========================
// TOML overlay definitions
// =========================

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct RelayToml {
    pub port: Option<u16>,
    pub server_url: Option<String>,
    pub tts_key: Option<String>,
    pub static_dir: Option<PathBuf>,
    pub client_asset: Option<PathBuf>,
    pub effects_dir: Option<PathBuf>,
    pub voices: Option<Vec<Voice>>,
    pub voice_models: Option<Vec<VoiceModelEntry>>,
    pub voice_styles: Option<Vec<VoiceStyleEntry>>,
    pub voice_modifiers: Option<Vec<VoiceModifierEntry>>,
    pub elevenlabs: Option<ElevenLabsToml>,
    pub ffmpeg: Option<FfmpegToml>,
    pub alerts: Option<AlertsToml>,
    pub delivery: Option<DeliveryToml>,
    pub liveness: Option<LivenessToml>,
    pub feed: Option<FeedToml>,
}

impl RelayToml {
    fn overlay(self, mut base: BridgeConfig) -> BridgeConfig {
        if let Some(v) = self.port {
            base.addr.set_port(v);
        }
        if let Some(v) = self.server_url {
            base.server_url = v;
        }
        if let Some(v) = self.tts_key {
            base.tts_key = Some(v).filter(|k| !k.is_empty());
        }
        if let Some(v) = self.static_dir {
            base.client_asset = v.join("index.html");
            base.static_dir = v;
        }
        if let Some(v) = self.client_asset {
            base.client_asset = v;
        }
        if let Some(v) = self.effects_dir {
            base.effects_dir = v;
        }
        if let Some(v) = self.voices {
            base.catalog.voices = v;
        }
        if let Some(v) = self.voice_models {
            base.catalog.models = v;
        }
        if let Some(v) = self.voice_styles {
            base.catalog.styles = v;
        }
        if let Some(v) = self.voice_modifiers {
            base.catalog.modifiers = v;
        }
        if let Some(e) = self.elevenlabs {
            e.apply(&mut base.elevenlabs);
        }
        if let Some(f) = self.ffmpeg {
            f.apply(&mut base.ffmpeg);
        }
        if let Some(a) = self.alerts {
            a.apply(&mut base.alerts);
        }
        if let Some(d) = self.delivery {
            d.apply(&mut base.delivery);
        }
        if let Some(l) = self.liveness {
            l.apply(&mut base.liveness);
        }
        if let Some(f) = self.feed {
            f.apply(&mut base.feed);
        }
        base
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct ElevenLabsToml {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub timeout_ms: Option<u64>,
}
impl ElevenLabsToml {
    fn apply(self, e: &mut ElevenLabsConfig) {
        if let Some(x) = self.api_key {
            e.api_key = x;
        }
        if let Some(x) = self.base_url {
            e.base_url = x;
        }
        if let Some(x) = self.timeout_ms {
            e.timeout_ms = x;
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct FfmpegToml {
    pub enabled: Option<bool>,
    pub bin: Option<PathBuf>,
    pub reverb_impulse: Option<PathBuf>,
    pub timeout_ms: Option<u64>,
    pub temp_dir: Option<PathBuf>,
}
impl FfmpegToml {
    fn apply(self, f: &mut FfmpegConfig) {
        if let Some(x) = self.enabled {
            f.enabled = x;
        }
        if let Some(x) = self.bin {
            f.ffmpeg_bin = Some(x);
        }
        if let Some(x) = self.reverb_impulse {
            f.reverb_impulse = x;
        }
        if let Some(x) = self.timeout_ms {
            f.timeout_ms = x;
        }
        if let Some(x) = self.temp_dir {
            f.temp_dir = x;
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct AlertsToml {
    pub dir: Option<PathBuf>,
    pub ffprobe_bin: Option<PathBuf>,
    pub probe_timeout_ms: Option<u64>,
}
impl AlertsToml {
    fn apply(self, a: &mut AlertConfig) {
        if let Some(x) = self.dir {
            a.root = x;
        }
        if let Some(x) = self.ffprobe_bin {
            a.ffprobe_bin = Some(x);
        }
        if let Some(x) = self.probe_timeout_ms {
            a.probe_timeout_ms = x;
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct DeliveryToml {
    pub start_grace_ms: Option<u64>,
    pub confirm_timeout_secs: Option<u64>,
    pub alert_fallback_secs: Option<u64>,
    pub output_format: Option<String>,
}
impl DeliveryToml {
    fn apply(self, d: &mut DeliveryConfig) {
        if let Some(x) = self.start_grace_ms {
            d.start_grace = Duration::from_millis(x);
        }
        if let Some(x) = self.confirm_timeout_secs {
            d.confirm_timeout = Duration::from_secs(x.max(1));
        }
        if let Some(x) = self.alert_fallback_secs {
            d.alert_fallback = Duration::from_secs(x);
        }
        if let Some(x) = self.output_format {
            d.output_format = x;
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct LivenessToml {
    pub expected_interval_secs: Option<u64>,
    pub deadline_secs: Option<u64>,
    pub initial_deadline_secs: Option<u64>,
    pub keepalive_interval_secs: Option<u64>,
}
impl LivenessToml {
    fn apply(self, l: &mut LivenessConfig) {
        if let Some(x) = self.expected_interval_secs {
            l.expected_interval = Duration::from_secs(x);
        }
        if let Some(x) = self.deadline_secs {
            l.deadline = Duration::from_secs(x);
        }
        if let Some(x) = self.initial_deadline_secs {
            l.initial_deadline = Duration::from_secs(x);
        }
        if let Some(x) = self.keepalive_interval_secs {
            l.keepalive_interval = Duration::from_secs(x.max(1));
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct FeedToml {
    pub url: Option<String>,
    pub keys: Option<Vec<FeedKey>>,
    pub voices: Option<Vec<FeedVoice>>,
    pub keepalive_secs: Option<u64>,
    pub retry_delay_ms: Option<u64>,
    pub max_wait_secs: Option<u64>,
    pub backoff_min_ms: Option<u64>,
    pub backoff_max_secs: Option<u64>,
}
impl FeedToml {
    fn apply(self, f: &mut FeedConfig) {
        if let Some(x) = self.url {
            f.url = x;
        }
        if let Some(x) = self.keys {
            f.keys = x;
        }
        if let Some(x) = self.voices {
            f.voices = x;
        }
        if let Some(x) = self.keepalive_secs {
            f.keepalive = Duration::from_secs(x.max(1));
        }
        if let Some(x) = self.retry_delay_ms {
            f.retry_delay = Duration::from_millis(x);
        }
        if let Some(x) = self.max_wait_secs {
            f.max_wait = Duration::from_secs(x);
        }
        if let Some(x) = self.backoff_min_ms {
            f.backoff_min = Duration::from_millis(x);
        }
        if let Some(x) = self.backoff_max_secs {
            f.backoff_max = Duration::from_secs(x);
        }
    }
}
