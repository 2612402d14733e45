// Directory-backed sound effects
//
// Every `.mp3` in the directory is an effect named after its file stem. The
// directory is rescanned on each lookup so effects can be dropped in while the
// server runs.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use relay_core::{EffectLibrary, RelayError, Result};
use tracing::{debug, warn};

pub struct DirectoryEffectLibrary {
    dir: PathBuf,
}

impl DirectoryEffectLibrary {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        if !dir.is_dir() {
            warn!(target: "audio", dir = ?dir, "Effects directory not found");
        }
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn scan(&self) -> Vec<(String, PathBuf)> {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        let mut found: Vec<(String, PathBuf)> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.is_file()
                    && p.extension()
                        .and_then(|x| x.to_str())
                        .is_some_and(|x| x.eq_ignore_ascii_case("mp3"))
            })
            .filter_map(|p| {
                let stem = p.file_stem()?.to_str()?.to_lowercase();
                Some((stem, p))
            })
            .collect();
        found.sort_by(|a, b| a.0.cmp(&b.0));
        found
    }

    fn find(&self, name: &str) -> Option<PathBuf> {
        let name = name.trim().to_lowercase();
        self.scan()
            .into_iter()
            .find(|(stem, _)| *stem == name)
            .map(|(_, path)| path)
    }
}

#[async_trait]
impl EffectLibrary for DirectoryEffectLibrary {
    fn contains(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    fn names(&self) -> Vec<String> {
        self.scan().into_iter().map(|(stem, _)| stem).collect()
    }

    async fn load(&self, name: &str) -> Result<Vec<u8>> {
        let path = self
            .find(name)
            .ok_or_else(|| RelayError::EffectNotFound(name.to_string()))?;
        debug!(target: "audio", effect = %name, path = ?path, "Loading effect");
        Ok(tokio::fs::read(&path).await?)
    }
}
