use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::Result;

/// A stage output on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    /// `true` when an existing file was reused instead of rebuilt
    pub reused: bool,
}

/// Return `path` unchanged if it already exists, otherwise run `build` to
/// create it.
///
/// Presence is the only check: a file left over from other inputs is reused
/// as is.
pub fn reuse_or_build<F>(path: &Path, stage: &str, build: F) -> Result<Artifact>
where
    F: FnOnce(&Path) -> Result<()>,
{
    if path.exists() {
        info!("{}: reusing existing {:?}", stage, path);
        return Ok(Artifact {
            path: path.to_path_buf(),
            reused: true,
        });
    }
    build(path)?;
    Ok(Artifact {
        path: path.to_path_buf(),
        reused: false,
    })
}
