use crate::error::{IndexerError, Result};
use crate::layout::ProjectLayout;
use fs2::FileExt;

/// Exclusive cross-process lock guarding a project's index artifacts.
/// Released when dropped.
pub struct IndexWriteLock {
    #[allow(dead_code)]
    file: std::fs::File,
}

impl Drop for IndexWriteLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

pub async fn acquire_index_write_lock(layout: &ProjectLayout) -> Result<IndexWriteLock> {
    let path = layout.lock_path();
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let lock = tokio::task::spawn_blocking(move || -> Result<IndexWriteLock> {
        use std::fs::OpenOptions;

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|err| {
                IndexerError::Other(format!("open index lock {}: {err}", path.display()))
            })?;

        file.lock_exclusive().map_err(|err| {
            IndexerError::Other(format!("acquire index lock {}: {err}", path.display()))
        })?;

        Ok(IndexWriteLock { file })
    })
    .await
    .map_err(|err| IndexerError::Other(format!("join index lock task: {err}")))??;

    Ok(lock)
}
