use daw_sample::Cancelled;
use daw_storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum ClipError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("incompatible clips: {0}")]
    IncompatibleClips(String),

    #[error("resampling failed: {0}")]
    Resample(#[source] anyhow::Error),

    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

impl ClipError {
    /// Whether the user cancelled, at any layer.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            ClipError::Cancelled(_) | ClipError::Storage(StorageError::Cancelled(_))
        )
    }
}
