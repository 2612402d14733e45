//! Voice catalog
//!
//! Holds the configured voices and the per-voice synthesis settings:
//! - model alias (`turbo`, `v2`, `v3`), defaulting to `v3`
//! - style override, which wins over the request's style
//! - default modifiers applied to every speech segment of the voice
//!
//! The first configured voice is the default voice. Lookups by name are
//! case-insensitive.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::message::SynthesisParams;
use crate::providers::SynthesisRequest;

/// Modifiers the post-processing collaborator understands
pub const KNOWN_MODIFIERS: &[&str] = &["reverb"];

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Voice {
    pub name: String,
    pub id: String,
}

impl Voice {
    pub fn new(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SynthesisModel {
    Turbo,
    MultilingualV2,
    V3,
}

impl SynthesisModel {
    /// Unknown aliases fall back to `V3`.
    pub fn from_alias(alias: &str) -> Self {
        match alias.trim().to_lowercase().as_str() {
            "turbo" => SynthesisModel::Turbo,
            "v2" => SynthesisModel::MultilingualV2,
            _ => SynthesisModel::V3,
        }
    }

    pub fn model_id(&self) -> &'static str {
        match self {
            SynthesisModel::Turbo => "eleven_turbo_v2",
            SynthesisModel::MultilingualV2 => "eleven_multilingual_v2",
            SynthesisModel::V3 => "eleven_v3",
        }
    }

    pub fn discrete_stability(&self) -> bool {
        matches!(self, SynthesisModel::V3)
    }

    pub fn supports_style(&self) -> bool {
        !matches!(self, SynthesisModel::V3)
    }
}

/// Snap stability to one of 0.0, 0.5 or 1.0
pub fn snap_stability(stability: f64) -> f64 {
    if stability < 0.25 {
        0.0
    } else if stability < 0.75 {
        0.5
    } else {
        1.0
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct VoiceModelEntry {
    pub name: String,
    pub model: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StyleValue {
    Number(f64),
    Text(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct VoiceStyleEntry {
    pub name: String,
    pub style: StyleValue,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VoiceModifierEntry {
    pub name: String,
    /// Comma separated, e.g. `"reverb"`
    pub modifiers: String,
}

#[derive(Debug, Clone, Default)]
pub struct VoiceCatalog {
    voices: Vec<Voice>,
    models: HashMap<String, SynthesisModel>,
    styles: HashMap<String, f64>,
    modifiers: HashMap<String, Vec<String>>,
    known_modifiers: BTreeSet<String>,
}

impl VoiceCatalog {
    pub fn new(voices: Vec<Voice>) -> Self {
        Self {
            voices,
            models: HashMap::new(),
            styles: HashMap::new(),
            modifiers: HashMap::new(),
            known_modifiers: KNOWN_MODIFIERS.iter().map(|m| m.to_string()).collect(),
        }
    }

    /// Build from the JSON-shaped config entries. Bad style values are
    /// skipped with a warning.
    pub fn from_entries(
        voices: Vec<Voice>,
        models: &[VoiceModelEntry],
        styles: &[VoiceStyleEntry],
        modifiers: &[VoiceModifierEntry],
    ) -> Self {
        let mut catalog = Self::new(voices);
        for m in models {
            catalog = catalog.with_model(&m.name, SynthesisModel::from_alias(&m.model));
        }
        for s in styles {
            let value = match &s.style {
                StyleValue::Number(n) => Some(*n),
                StyleValue::Text(t) => t.trim().parse::<f64>().ok(),
            };
            match value {
                Some(v) => catalog = catalog.with_style(&s.name, v),
                None => {
                    warn!(target: "voices", voice = %s.name, "Invalid style value, ignoring")
                }
            }
        }
        for m in modifiers {
            let list = m.modifiers.split(',').map(str::trim).filter(|s| !s.is_empty());
            catalog = catalog.with_modifiers(&m.name, list);
        }
        catalog
    }

    pub fn with_model(mut self, voice: &str, model: SynthesisModel) -> Self {
        self.models.insert(voice.to_lowercase(), model);
        self
    }

    pub fn with_style(mut self, voice: &str, style: f64) -> Self {
        self.styles.insert(voice.to_lowercase(), style);
        self
    }

    pub fn with_modifiers<I, S>(mut self, voice: &str, modifiers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let list: Vec<String> = modifiers
            .into_iter()
            .map(|m| m.into().to_lowercase())
            .collect();
        self.modifiers.insert(voice.to_lowercase(), list);
        self
    }

    pub fn voices(&self) -> &[Voice] {
        &self.voices
    }

    pub fn names(&self) -> Vec<String> {
        self.voices.iter().map(|v| v.name.clone()).collect()
    }

    pub fn default_voice(&self) -> Option<&Voice> {
        self.voices.first()
    }

    pub fn resolve(&self, name: &str) -> Option<&Voice> {
        let name = name.trim();
        self.voices.iter().find(|v| v.name.eq_ignore_ascii_case(name))
    }

    /// Named voice if it exists, otherwise the default voice
    pub fn resolve_or_default(&self, name: Option<&str>) -> Option<Voice> {
        name.and_then(|n| self.resolve(n))
            .or_else(|| self.default_voice())
            .cloned()
    }

    pub fn is_modifier(&self, name: &str) -> bool {
        self.known_modifiers.contains(&name.trim().to_lowercase())
    }

    pub fn model_for(&self, voice: &Voice) -> SynthesisModel {
        self.models
            .get(&voice.name.to_lowercase())
            .copied()
            .unwrap_or(SynthesisModel::V3)
    }

    pub fn style_for(&self, voice: &Voice) -> Option<f64> {
        self.styles.get(&voice.name.to_lowercase()).copied()
    }

    /// Voice defaults merged with tag modifiers, deduplicated and sorted
    pub fn modifiers_for(&self, voice: &Voice, tagged: &[String]) -> Vec<String> {
        let mut set: BTreeSet<String> = tagged.iter().cloned().collect();
        if let Some(defaults) = self.modifiers.get(&voice.name.to_lowercase()) {
            set.extend(defaults.iter().cloned());
        }
        set.into_iter().collect()
    }

    /// Final parameters for one speech segment
    pub fn synthesis_request(
        &self,
        voice: &Voice,
        text: &str,
        params: &SynthesisParams,
        output_format: &str,
    ) -> SynthesisRequest {
        let model = self.model_for(voice);
        let stability = if model.discrete_stability() {
            snap_stability(params.stability)
        } else {
            params.stability
        };
        let style = self.style_for(voice).unwrap_or(params.style);
        SynthesisRequest {
            text: text.to_string(),
            voice_id: voice.id.clone(),
            voice_name: voice.name.clone(),
            model,
            stability,
            similarity_boost: params.similarity_boost,
            style: model.supports_style().then_some(style),
            output_format: output_format.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> VoiceCatalog {
        VoiceCatalog::new(vec![Voice::new("Alice", "id-a"), Voice::new("bob", "id-b")])
            .with_model("bob", SynthesisModel::Turbo)
            .with_style("bob", 0.3)
            .with_modifiers("alice", ["reverb"])
    }

    #[test]
    fn stability_snaps_to_legal_values() {
        assert_eq!(snap_stability(0.0), 0.0);
        assert_eq!(snap_stability(0.24), 0.0);
        assert_eq!(snap_stability(0.25), 0.5);
        assert_eq!(snap_stability(0.40), 0.5);
        assert_eq!(snap_stability(0.75), 1.0);
        assert_eq!(snap_stability(1.0), 1.0);
    }

    #[test]
    fn resolve_is_case_insensitive_and_first_is_default() {
        let c = catalog();
        assert_eq!(c.resolve("ALICE").map(|v| v.id.as_str()), Some("id-a"));
        assert_eq!(c.default_voice().map(|v| v.name.as_str()), Some("Alice"));
        assert_eq!(
            c.resolve_or_default(Some("nobody")).map(|v| v.name),
            Some("Alice".to_string())
        );
    }

    #[test]
    fn v3_request_drops_style_and_snaps_stability() {
        let c = catalog();
        let alice = c.resolve("alice").cloned().unwrap();
        let req = c.synthesis_request(&alice, "hi", &SynthesisParams::default(), "mp3_44100_128");
        assert_eq!(req.model, SynthesisModel::V3);
        assert_eq!(req.stability, 0.5);
        assert_eq!(req.style, None);
    }

    #[test]
    fn voice_style_override_wins() {
        let c = catalog();
        let bob = c.resolve("bob").cloned().unwrap();
        let params = SynthesisParams {
            stability: 0.4,
            similarity_boost: 0.9,
            style: 0.8,
        };
        let req = c.synthesis_request(&bob, "hi", &params, "mp3_44100_128");
        assert_eq!(req.model.model_id(), "eleven_turbo_v2");
        assert_eq!(req.stability, 0.4);
        assert_eq!(req.style, Some(0.3));
    }

    #[test]
    fn voice_modifiers_merge_with_tags() {
        let c = catalog();
        let alice = c.resolve("alice").cloned().unwrap();
        assert_eq!(c.modifiers_for(&alice, &["reverb".to_string()]), vec!["reverb"]);
        let bob = c.resolve("bob").cloned().unwrap();
        assert!(c.modifiers_for(&bob, &[]).is_empty());
    }

    #[test]
    fn entries_accept_string_and_numeric_styles() {
        let styles: Vec<VoiceStyleEntry> =
            serde_json::from_str(r#"[{"name":"alice","style":"0.25"},{"name":"bob","style":0.5},{"name":"x","style":"bad"}]"#)
                .unwrap();
        let c = VoiceCatalog::from_entries(
            vec![Voice::new("alice", "a"), Voice::new("bob", "b")],
            &[],
            &styles,
            &[],
        );
        assert_eq!(c.style_for(&Voice::new("alice", "a")), Some(0.25));
        assert_eq!(c.style_for(&Voice::new("bob", "b")), Some(0.5));
    }
}
