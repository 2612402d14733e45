//! ffmpeg-backed audio modifiers
//!
//! Supported modifiers:
//! - `reverb`: convolution with an impulse-response file, mixed 90/10 dry/wet
//!
//! Env overrides:
//! - FFMPEG_ENABLED (default true), FFMPEG_BIN
//! - REVERB_IMPULSE (default `static/reverb.wav`)
//! - FFMPEG_TIMEOUT_MS, FFMPEG_TEMP_DIR

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use relay_core::{PostProcessor, RelayError, Result};
use tokio::process::Command;
use tracing::{debug, info};

use crate::utils::{get_from_env_or_path, run_command};

const REVERB_FILTER: &str = "[0:a]volume=0.25,apad=pad_dur=2,aformat=channel_layouts=stereo[dry];\
[0:a]volume=0.25,apad=pad_dur=2,aformat=channel_layouts=stereo,afir=dry=10:wet=10[wet];\
[dry][wet]amix=inputs=2:weights='0.9 0.1'";

#[derive(Clone, Debug)]
pub struct FfmpegConfig {
    pub enabled: bool,
    pub ffmpeg_bin: Option<PathBuf>,
    pub reverb_impulse: PathBuf,
    pub timeout_ms: u64,
    pub temp_dir: PathBuf,
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            enabled: std::env::var("FFMPEG_ENABLED")
                .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
                .unwrap_or(true),
            ffmpeg_bin: get_from_env_or_path("FFMPEG_BIN", "ffmpeg"),
            reverb_impulse: std::env::var("REVERB_IMPULSE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("static/reverb.wav")),
            timeout_ms: std::env::var("FFMPEG_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(30_000),
            temp_dir: std::env::var("FFMPEG_TEMP_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| std::env::temp_dir()),
        }
    }
}

pub struct FfmpegPostProcessor {
    cfg: FfmpegConfig,
}

impl FfmpegPostProcessor {
    pub fn new(cfg: FfmpegConfig) -> Self {
        if let Some(ref bin) = cfg.ffmpeg_bin {
            info!(target: "audio", bin = ?bin, enabled = cfg.enabled, "Detected ffmpeg binary");
        }
        Self { cfg }
    }

    fn ffmpeg(&self) -> Result<&PathBuf> {
        if !self.cfg.enabled {
            return Err(RelayError::PostProcess("ffmpeg is disabled".into()));
        }
        self.cfg
            .ffmpeg_bin
            .as_ref()
            .ok_or_else(|| RelayError::PostProcess("ffmpeg binary not found".into()))
    }

    async fn reverb(&self, audio: Vec<u8>, channel: &str) -> Result<Vec<u8>> {
        let ffmpeg = self.ffmpeg()?.clone();
        if !self.cfg.reverb_impulse.exists() {
            return Err(RelayError::PostProcess(format!(
                "impulse response not found: {}",
                self.cfg.reverb_impulse.display()
            )));
        }

        let workdir = tempfile::Builder::new()
            .prefix("relay-reverb-")
            .tempdir_in(&self.cfg.temp_dir)?;
        let input = workdir.path().join("input.mp3");
        let output = workdir.path().join("output.mp3");
        tokio::fs::write(&input, &audio).await?;

        let mut cmd = Command::new(ffmpeg);
        cmd.arg("-y")
            .arg("-loglevel")
            .arg("error")
            .arg("-i")
            .arg(&input)
            .arg("-i")
            .arg(&self.cfg.reverb_impulse)
            .arg("-filter_complex")
            .arg(REVERB_FILTER)
            .arg("-b:a")
            .arg("320k")
            .arg(&output);

        let result = run_command(cmd, Duration::from_millis(self.cfg.timeout_ms)).await?;
        if !result.status.success() {
            return Err(RelayError::PostProcess(format!(
                "ffmpeg failed: {}",
                String::from_utf8_lossy(&result.stderr)
            )));
        }
        let processed = tokio::fs::read(&output).await?;
        debug!(target: "audio", channel = %channel, before = audio.len(), after = processed.len(), "Applied reverb");
        Ok(processed)
    }
}

#[async_trait]
impl PostProcessor for FfmpegPostProcessor {
    async fn apply(&self, audio: Vec<u8>, modifier: &str, channel: &str) -> Result<Vec<u8>> {
        match modifier {
            "reverb" => self.reverb(audio, channel).await,
            other => Err(RelayError::PostProcess(format!("unknown modifier: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disabled() -> FfmpegPostProcessor {
        FfmpegPostProcessor::new(FfmpegConfig {
            enabled: false,
            ffmpeg_bin: None,
            reverb_impulse: PathBuf::from("missing.wav"),
            timeout_ms: 1_000,
            temp_dir: std::env::temp_dir(),
        })
    }

    #[tokio::test]
    async fn unknown_modifier_is_rejected() {
        let err = disabled().apply(vec![1], "chorus", "chan").await.unwrap_err();
        assert!(err.to_string().contains("unknown modifier"));
    }

    #[tokio::test]
    async fn disabled_ffmpeg_fails_reverb() {
        let err = disabled().apply(vec![1], "reverb", "chan").await.unwrap_err();
        assert!(matches!(err, RelayError::PostProcess(_)));
    }
}
