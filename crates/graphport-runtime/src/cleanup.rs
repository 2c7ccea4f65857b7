use std::io;
use std::path::{Path, PathBuf};

use tracing::warn;

/// Deletes an artifact file when dropped, unless disarmed first.
#[derive(Debug)]
pub struct ArtifactRemover {
    path: PathBuf,
    armed: bool,
}

impl ArtifactRemover {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            armed: true,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Keep the file and hand back its path.
    pub fn keep(mut self) -> PathBuf {
        self.armed = false;
        std::mem::take(&mut self.path)
    }
}

impl Drop for ArtifactRemover {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "could not remove artifact"),
        }
    }
}
