// Alert pre-roll sounds, one directory per channel: `<root>/<channel>/*.mp3`
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use relay_core::{AlertSound, AlertSource, Result};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::utils::{get_from_env_or_path, run_command};

#[derive(Clone, Debug)]
pub struct AlertConfig {
    pub root: PathBuf,
    pub ffprobe_bin: Option<PathBuf>,
    pub probe_timeout_ms: u64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            root: std::env::var("ALERTS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("alerts")),
            ffprobe_bin: get_from_env_or_path("FFPROBE_BIN", "ffprobe"),
            probe_timeout_ms: 5_000,
        }
    }
}

pub struct DirectoryAlertSource {
    cfg: AlertConfig,
}

impl DirectoryAlertSource {
    pub fn new(cfg: AlertConfig) -> Self {
        Self { cfg }
    }

    fn candidates(&self, channel: &str) -> Vec<PathBuf> {
        if channel.is_empty() || channel.contains(['/', '\\']) || channel.contains("..") {
            return Vec::new();
        }
        let Ok(entries) = std::fs::read_dir(self.cfg.root.join(channel)) else {
            return Vec::new();
        };
        entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.is_file()
                    && p.extension()
                        .and_then(|x| x.to_str())
                        .is_some_and(|x| x.eq_ignore_ascii_case("mp3"))
            })
            .collect()
    }

    async fn probe_duration(&self, path: &Path) -> Option<Duration> {
        let ffprobe = self.cfg.ffprobe_bin.as_ref()?;
        let mut cmd = Command::new(ffprobe);
        cmd.arg("-v")
            .arg("error")
            .arg("-show_entries")
            .arg("format=duration")
            .arg("-of")
            .arg("default=noprint_wrappers=1:nokey=1")
            .arg(path);
        let output = match run_command(cmd, Duration::from_millis(self.cfg.probe_timeout_ms)).await {
            Ok(o) if o.status.success() => o,
            Ok(o) => {
                warn!(target: "audio", path = ?path, stderr = %String::from_utf8_lossy(&o.stderr), "ffprobe failed");
                return None;
            }
            Err(e) => {
                warn!(target: "audio", path = ?path, error = %e, "ffprobe failed");
                return None;
            }
        };
        parse_duration(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Parse ffprobe's bare `seconds` output
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let secs = raw.trim().parse::<f64>().ok()?;
    if secs > 0.0 {
        Duration::try_from_secs_f64(secs).ok()
    } else {
        None
    }
}

#[async_trait]
impl AlertSource for DirectoryAlertSource {
    async fn pick(&self, channel: &str) -> Result<Option<AlertSound>> {
        let chosen = {
            let candidates = self.candidates(channel);
            candidates.choose(&mut rand::thread_rng()).cloned()
        };
        let Some(path) = chosen else {
            debug!(target: "audio", channel = %channel, "No alert sounds for channel");
            return Ok(None);
        };

        let audio = tokio::fs::read(&path).await?;
        let duration = self.probe_duration(&path).await;
        debug!(target: "audio", channel = %channel, path = ?path, duration = ?duration, "Picked alert sound");
        Ok(Some(AlertSound { audio, duration }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_probe_output() {
        assert_eq!(parse_duration("2.500000\n"), Some(Duration::from_millis(2_500)));
        assert_eq!(parse_duration("N/A"), None);
        assert_eq!(parse_duration("0"), None);
        assert_eq!(parse_duration("1e20"), None);
        assert_eq!(parse_duration("inf"), None);
    }
}
