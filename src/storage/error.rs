use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("comic {0} not found")]
    ComicNotFound(u64),
    #[error("chapter {0} not found")]
    ChapterNotFound(String),
    #[error("chapter directory not found: {}", .0.display())]
    ChapterDirMissing(PathBuf),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("metadata store is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StorageError::ComicNotFound(_)
                | StorageError::ChapterNotFound(_)
                | StorageError::ChapterDirMissing(_)
        )
    }
}
