use serde::{Deserialize, Serialize};

/// Synthesis knobs carried by a message. Voice-specific overrides from the
/// catalog take precedence during generation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SynthesisParams {
    pub stability: f64,
    pub similarity_boost: f64,
    pub style: f64,
}

impl Default for SynthesisParams {
    fn default() -> Self {
        Self {
            stability: 0.40,
            similarity_boost: 1.00,
            style: 0.00,
        }
    }
}

/// Where a message came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Http,
    Feed,
}

/// Input to the delivery pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub channel: String,
    pub text: String,
    pub default_voice: Option<String>,
    pub params: SynthesisParams,
    pub alert: bool,
    pub origin: Origin,
}

impl Message {
    pub fn new(channel: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            channel: channel.into().to_lowercase(),
            text: text.into(),
            default_voice: None,
            params: SynthesisParams::default(),
            alert: false,
            origin: Origin::Http,
        }
    }

    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        let voice = voice.into();
        self.default_voice = if voice.trim().is_empty() {
            None
        } else {
            Some(voice)
        };
        self
    }

    pub fn with_params(mut self, params: SynthesisParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_alert(mut self, alert: bool) -> Self {
        self.alert = alert;
        self
    }

    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = origin;
        self
    }
}
