// Client asset fingerprint used as the protocol version
use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::{info, warn};

/// Hex SHA-256 of the file contents
pub fn fingerprint(path: &Path) -> std::io::Result<String> {
    let bytes = std::fs::read(path)?;
    let digest = Sha256::digest(&bytes);
    Ok(digest.iter().map(|b| format!("{b:02x}")).collect())
}

/// Fingerprint of the client page, or the package version when it cannot be read
pub fn asset_version(path: &Path) -> String {
    match fingerprint(path) {
        Ok(version) => {
            info!(target: "http", path = ?path, version = %version, "Client asset version");
            version
        }
        Err(e) => {
            let fallback = env!("CARGO_PKG_VERSION").to_string();
            warn!(target: "http", path = ?path, error = %e, version = %fallback, "Client asset unreadable; using package version");
            fallback
        }
    }
}
