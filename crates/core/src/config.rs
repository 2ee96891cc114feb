use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Editing preferences threaded through timeline operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditConfig {
    /// Whether clearing or pasting moves the clips after the edit point.
    pub edit_clips_can_move: bool,
    /// Clip boundaries closer than this, in seconds, are merged by
    /// `clear_and_paste`.
    pub merge_point_tolerance: f64,
    /// Samples with magnitude at or below this count as silence when
    /// disjoining.
    pub silence_threshold: f32,
    /// Shortest silence, in seconds, that disjoining cuts out.
    pub min_silence_duration: f64,
}

impl Default for EditConfig {
    fn default() -> Self {
        Self {
            edit_clips_can_move: true,
            merge_point_tolerance: 0.01,
            silence_threshold: 0.0,
            min_silence_duration: 0.01,
        }
    }
}

impl EditConfig {
    fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("daw").join("edit.toml"))
    }

    /// Load from the user's config directory, falling back to defaults.
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }

        match Self::load_from(&path) {
            Ok(config) => config,
            Err(err) => {
                log::warn!("using default edit settings: {err}");
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::config_path().ok_or(ConfigError::NoConfigDir)?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents).map_err(io_err)
    }
}
