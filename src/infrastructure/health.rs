use crate::shared::error::WatcherError;
use crate::Result;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Single-byte marker rewritten after every tick so an external probe can
/// tell the watcher is still making progress.
pub struct LivenessFile {
    path: PathBuf,
}

impl LivenessFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn mark_alive(&self) -> Result<()> {
        tokio::fs::write(&self.path, b"1").await.map_err(WatcherError::Io)?;
        debug!("Liveness marker written to {}", self.path.display());
        Ok(())
    }
}
