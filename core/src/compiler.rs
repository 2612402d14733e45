//! Segment compiler
//!
//! Turns message text with inline tags into an ordered list of audio segments.
//! Tags are written in parentheses:
//!
//! ```text
//! (alice) hello there (reverb) from the void (reverb-end) (airhorn)
//! ```
//!
//! Square brackets are passed through untouched; the synthesis provider uses
//! them for its own delivery cues.
//!
//! Classification order for a tag body:
//! 1. legacy prefixes `v-<voice>` and `e-<effect>`
//! 2. `<modifier>-end` closing an active modifier
//! 3. known voice name
//! 4. known modifier name
//! 5. known effect name
//!
//! Anything else fails the whole compile.

use std::collections::BTreeSet;

use serde::Serialize;
use thiserror::Error;

use crate::providers::EffectLibrary;
use crate::voices::{Voice, VoiceCatalog};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Message is empty")]
    Empty,

    #[error("Invalid voice: {0}")]
    InvalidVoice(String),

    #[error("Unknown effect: {0}")]
    UnknownEffect(String),

    #[error("Modifier closed without being opened: {0}")]
    UnmatchedClose(String),

    #[error("Unknown tag: {0}")]
    UnknownTag(String),

    #[error("No voices configured")]
    NoVoices,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpeechSegment {
    pub voice: Voice,
    /// Snapshot of the active modifiers when the segment was flushed
    pub modifiers: Vec<String>,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EffectSegment {
    pub effect: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AudioSegment {
    Speech(SpeechSegment),
    Effect(EffectSegment),
}

impl AudioSegment {
    pub fn is_speech(&self) -> bool {
        matches!(self, AudioSegment::Speech(_))
    }

    pub fn label(&self) -> String {
        match self {
            AudioSegment::Speech(s) => format!("speech[{}]", s.voice.name),
            AudioSegment::Effect(e) => format!("effect[{}]", e.effect),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Tag {
    Voice(Voice),
    Modifier(String),
    ModifierEnd(String),
    Effect(String),
}

/// Byte range of one `(...)` span and its inner body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TagSpan {
    start: usize,
    end: usize,
}

/// Locate `(body)` spans with a non-empty body. An unclosed `(` and `()` are
/// treated as plain text.
fn tag_spans(text: &str) -> Vec<TagSpan> {
    let bytes = text.as_bytes();
    let mut spans = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'(' {
            i += 1;
            continue;
        }
        match text[i + 1..].find(')') {
            Some(0) => i += 1,
            Some(offset) => {
                let close = i + 1 + offset;
                spans.push(TagSpan {
                    start: i,
                    end: close + 1,
                });
                i = close + 1;
            }
            None => break,
        }
    }
    spans
}

struct Flusher {
    voice: Voice,
    modifiers: BTreeSet<String>,
    pending: String,
    segments: Vec<AudioSegment>,
}

impl Flusher {
    fn push_text(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        if !self.pending.is_empty() {
            self.pending.push(' ');
        }
        self.pending.push_str(text);
    }

    fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let text = std::mem::take(&mut self.pending);
        self.segments.push(AudioSegment::Speech(SpeechSegment {
            voice: self.voice.clone(),
            modifiers: self.modifiers.iter().cloned().collect(),
            text,
        }));
    }
}

pub struct SegmentCompiler<'a> {
    catalog: &'a VoiceCatalog,
    effects: &'a dyn EffectLibrary,
}

impl<'a> SegmentCompiler<'a> {
    pub fn new(catalog: &'a VoiceCatalog, effects: &'a dyn EffectLibrary) -> Self {
        Self { catalog, effects }
    }

    /// Compile `text` into segments. Either every tag resolves and the full
    /// list is returned, or nothing is.
    pub fn compile(
        &self,
        text: &str,
        default_voice: &Voice,
    ) -> Result<Vec<AudioSegment>, ParseError> {
        if text.trim().is_empty() {
            return Err(ParseError::Empty);
        }

        let mut state = Flusher {
            voice: default_voice.clone(),
            modifiers: BTreeSet::new(),
            pending: String::new(),
            segments: Vec::new(),
        };

        let mut cursor = 0;
        for span in tag_spans(text) {
            state.push_text(&text[cursor..span.start]);
            cursor = span.end;

            let tag = self.classify(&text[span.start + 1..span.end - 1])?;
            state.flush();
            match tag {
                Tag::Voice(voice) => state.voice = voice,
                Tag::Modifier(name) => {
                    state.modifiers.insert(name);
                }
                Tag::ModifierEnd(name) => {
                    if !state.modifiers.remove(&name) {
                        return Err(ParseError::UnmatchedClose(name));
                    }
                }
                Tag::Effect(effect) => state
                    .segments
                    .push(AudioSegment::Effect(EffectSegment { effect })),
            }
        }
        state.push_text(&text[cursor..]);
        state.flush();

        if state.segments.is_empty() {
            return Err(ParseError::Empty);
        }
        Ok(state.segments)
    }

    fn classify(&self, body: &str) -> Result<Tag, ParseError> {
        let body = body.trim();
        let lower = body.to_lowercase();

        if let Some(name) = lower.strip_prefix("v-") {
            return self
                .catalog
                .resolve(name)
                .cloned()
                .map(Tag::Voice)
                .ok_or_else(|| ParseError::InvalidVoice(name.to_string()));
        }
        if let Some(name) = lower.strip_prefix("e-") {
            return if self.effects.contains(name) {
                Ok(Tag::Effect(name.to_string()))
            } else {
                Err(ParseError::UnknownEffect(name.to_string()))
            };
        }
        if let Some(name) = lower.strip_suffix("-end") {
            if self.catalog.is_modifier(name) {
                return Ok(Tag::ModifierEnd(name.to_string()));
            }
        }
        if let Some(voice) = self.catalog.resolve(body) {
            return Ok(Tag::Voice(voice.clone()));
        }
        if self.catalog.is_modifier(&lower) {
            return Ok(Tag::Modifier(lower));
        }
        if self.effects.contains(&lower) {
            return Ok(Tag::Effect(lower));
        }
        Err(ParseError::UnknownTag(body.to_string()))
    }
}
