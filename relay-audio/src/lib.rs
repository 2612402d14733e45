// Audio collaborators for the relay runtime

// Shared process/path helpers
pub(crate) mod utils;

pub mod alerts;
pub mod effects;
pub mod elevenlabs;
pub mod modifiers;

pub use alerts::{AlertConfig, DirectoryAlertSource};
pub use effects::DirectoryEffectLibrary;
pub use elevenlabs::{ElevenLabsConfig, ElevenLabsSynthesizer};
pub use modifiers::{FfmpegConfig, FfmpegPostProcessor};
