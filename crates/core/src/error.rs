use daw_clip::{ClipError, ClipId};
use daw_sample::Cancelled;
use daw_storage::StorageError;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum TrackError {
    #[error(transparent)]
    Clip(#[from] ClipError),

    #[error("not enough space to place audio at {start:.6}s..{end:.6}s")]
    Overlap { start: f64, end: f64 },

    #[error("incompatible clips: {0}")]
    IncompatibleClips(String),

    #[error("no clip with id {0:?}")]
    NoSuchClip(ClipId),

    #[error("track has no clip to append to")]
    NoClip,

    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

impl From<StorageError> for TrackError {
    fn from(err: StorageError) -> Self {
        TrackError::Clip(ClipError::Storage(err))
    }
}

impl TrackError {
    /// Whether the user cancelled, at any layer.
    pub fn is_cancelled(&self) -> bool {
        match self {
            TrackError::Cancelled(_) => true,
            TrackError::Clip(err) => err.is_cancelled(),
            _ => false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to encode config: {0}")]
    Encode(#[from] toml::ser::Error),

    #[error("no configuration directory on this platform")]
    NoConfigDir,
}
