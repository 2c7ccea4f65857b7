use std::io::{self, Write};
use std::path::{Path, PathBuf};

use graphport_core::CompiledArtifact;
use tempfile::NamedTempFile;
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum EmitError {
    #[error("artifact already exists at {}", .0.display())]
    Collision(PathBuf),
    #[error("encoding artifact: {0}")]
    Encode(#[from] graphport_core::Error),
    #[error("writing {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
}

/// Write `artifact` to `path` through a temporary file in the same
/// directory, so a failed write never leaves a partial artifact behind.
/// An existing file is only replaced when `overwrite` is set.
pub fn write_artifact(
    path: &Path,
    artifact: &CompiledArtifact,
    overwrite: bool,
) -> Result<(), EmitError> {
    let io_err = |source: io::Error| EmitError::Io {
        path: path.to_path_buf(),
        source,
    };

    let exists = path.try_exists().map_err(io_err)?;
    if exists && !overwrite {
        return Err(EmitError::Collision(path.to_path_buf()));
    }

    let bytes = artifact.encode()?;
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir).map_err(io_err)?;
    tmp.write_all(&bytes).map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;

    if overwrite {
        if exists {
            warn!(path = %path.display(), "replacing existing artifact");
        }
        tmp.persist(path).map_err(|e| io_err(e.error))?;
    } else {
        // Another writer may have created the file since the check above.
        tmp.persist_noclobber(path).map_err(|e| match e.error.kind() {
            io::ErrorKind::AlreadyExists => EmitError::Collision(path.to_path_buf()),
            _ => io_err(e.error),
        })?;
    }
    Ok(())
}
