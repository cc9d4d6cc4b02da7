use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::{Result, StorageError};

/// Leave exactly one empty directory at `path`.
///
/// Existing content is removed first, so re-running a request never sees the
/// output of an earlier attempt.
pub async fn reset_directory(path: &Path) -> Result<()> {
    if tokio::fs::try_exists(path)
        .await
        .map_err(|e| StorageError::io(path, e))?
    {
        debug!(path = %path.display(), "Removing stale output directory");
        tokio::fs::remove_dir_all(path)
            .await
            .map_err(|e| StorageError::io(path, e))?;
    }

    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| StorageError::io(path, e))
}

/// Create the directory named by each environment variable in `names`.
///
/// Every variable must be set; directories that already exist are left alone.
pub fn ensure_directories_from_env<F>(names: &[String], lookup: F) -> Result<Vec<PathBuf>>
where
    F: Fn(&str) -> Option<String>,
{
    let mut created = Vec::with_capacity(names.len());

    for name in names {
        let dir = lookup(name)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .ok_or_else(|| StorageError::MissingEnv(name.clone()))?;

        if !dir.exists() {
            std::fs::create_dir_all(&dir).map_err(|e| StorageError::io(&dir, e))?;
            info!(env = %name, path = %dir.display(), "Created working directory");
        }
        created.push(dir);
    }

    Ok(created)
}
