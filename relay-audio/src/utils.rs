use std::path::PathBuf;
use std::process::Output;
use std::time::Duration;

use relay_core::{RelayError, Result};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

/// Binary from `env_key` if it points at an existing file, else `default_bin` on PATH
pub(crate) fn get_from_env_or_path(env_key: &str, default_bin: &str) -> Option<PathBuf> {
    if let Ok(p) = std::env::var(env_key) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return Some(pb);
        }
    }
    get_from_path(default_bin)
}

pub(crate) fn get_from_path(bin: &str) -> Option<PathBuf> {
    // Path-like strings are taken as-is
    if bin.contains(std::path::MAIN_SEPARATOR) {
        let p = PathBuf::from(bin);
        return if p.exists() { Some(p) } else { None };
    }

    if let Some(paths_os) = std::env::var_os("PATH") {
        for dir in std::env::split_paths(&paths_os) {
            let candidate = dir.join(bin);
            if candidate.exists() {
                return Some(candidate);
            }
        }
    }
    None
}

/// Run a command bounded by `limit`. The child is killed if the limit is hit.
pub(crate) async fn run_command(mut cmd: Command, limit: Duration) -> Result<Output> {
    debug!(target: "audio", command = ?cmd, "Running external tool");
    cmd.kill_on_drop(true);
    match timeout(limit, cmd.output()).await {
        Ok(output) => output.map_err(RelayError::IoError),
        Err(_) => Err(RelayError::PostProcess(format!(
            "external tool timed out after {}ms",
            limit.as_millis()
        ))),
    }
}
