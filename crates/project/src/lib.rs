mod disk;
mod load;
mod save;

use daw_clip::{ClipError, Envelope};
use daw_core::TrackError;
use daw_sample::SampleFormats;
use daw_storage::StorageError;
use serde::{Deserialize, Serialize};

pub use disk::DiskBlockFactory;
pub use load::{LoadedProject, MissingBlock, ProjectMetadata, load_project, load_project_metadata};
pub use save::{project_from_tracks, save_project};

/// Version written into every project file.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub version: u32,
    pub name: String,
    pub tracks: Vec<TrackData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackData {
    pub id: u64,
    pub name: String,
    pub rate: u32,
    pub width: usize,
    pub formats: SampleFormats,
    pub gain: f32,
    pub pan: f32,
    pub color_index: i32,
    pub mute: bool,
    pub solo: bool,
    pub clips: Vec<ClipData>,
}

/// A clip's attributes and per-channel block lists. Cut lines nest, with
/// offsets relative to the parent's sequence start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClipData {
    pub offset: f64,
    pub trim_left: f64,
    pub trim_right: f64,
    pub name: String,
    pub color_index: i32,
    pub rate: u32,
    pub stretch_ratio: f64,
    pub formats: SampleFormats,
    pub envelope: Envelope,
    pub channels: Vec<SequenceData>,
    #[serde(default)]
    pub cut_lines: Vec<ClipData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceData {
    pub max_block_samples: usize,
    pub blocks: Vec<BlockData>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockData {
    pub id: u64,
    pub start: u64,
    pub len: u64,
    #[serde(default)]
    pub silent: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] rmp_serde::encode::Error),

    #[error("Deserialization error: {0}")]
    Deserialize(#[from] rmp_serde::decode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Clip(#[from] ClipError),

    #[error(transparent)]
    Track(#[from] TrackError),

    #[error("Invalid project data: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use daw_clip::EnvPoint;
    use daw_sample::SampleFormat;

    fn sample_clip() -> ClipData {
        let mut envelope = Envelope::gain();
        envelope.set_points([EnvPoint { t: 0.0, value: 1.0 }, EnvPoint { t: 0.5, value: 0.25 }]);
        ClipData {
            offset: 1.5,
            trim_left: 0.25,
            trim_right: 0.0,
            name: "Take 1".to_string(),
            color_index: 3,
            rate: 48_000,
            stretch_ratio: 1.0,
            formats: SampleFormats::new(SampleFormat::Int16, SampleFormat::Float),
            envelope,
            channels: vec![SequenceData {
                max_block_samples: 262_144,
                blocks: vec![
                    BlockData {
                        id: 7,
                        start: 0,
                        len: 1000,
                        silent: false,
                    },
                    BlockData {
                        id: 8,
                        start: 1000,
                        len: 500,
                        silent: true,
                    },
                ],
            }],
            cut_lines: Vec::new(),
        }
    }

    fn sample_project() -> Project {
        Project {
            version: FORMAT_VERSION,
            name: "Test Project".to_string(),
            tracks: vec![TrackData {
                id: 1,
                name: "Vocals".to_string(),
                rate: 48_000,
                width: 1,
                formats: SampleFormat::Float.into(),
                gain: 0.8,
                pan: -0.5,
                color_index: 2,
                mute: false,
                solo: true,
                clips: vec![sample_clip()],
            }],
        }
    }

    #[test]
    fn test_project_serialization_roundtrip() {
        let project = sample_project();

        let bytes = rmp_serde::encode::to_vec(&project).expect("serialize");
        let decoded: Project = rmp_serde::decode::from_slice(&bytes).expect("deserialize");

        assert_eq!(decoded.name, project.name);
        assert_eq!(decoded.version, FORMAT_VERSION);
        assert_eq!(decoded.tracks.len(), 1);
        assert_eq!(decoded.tracks[0].gain, 0.8);
        assert!(decoded.tracks[0].solo);
    }

    #[test]
    fn test_clip_data_json_keeps_attributes() {
        let clip = sample_clip();

        let json = serde_json::to_string(&clip).expect("serialize");
        let decoded: ClipData = serde_json::from_str(&json).expect("deserialize");

        assert_eq!(decoded.offset, 1.5);
        assert_eq!(decoded.trim_left, 0.25);
        assert_eq!(decoded.formats, clip.formats);
        assert_eq!(decoded.envelope, clip.envelope);
        assert_eq!(decoded.channels[0].blocks, clip.channels[0].blocks);
    }

    #[test]
    fn test_cut_lines_default_to_empty() {
        let mut value = serde_json::to_value(sample_clip()).expect("serialize");
        value.as_object_mut().expect("object").remove("cut_lines");

        let decoded: ClipData = serde_json::from_value(value).expect("deserialize");
        assert!(decoded.cut_lines.is_empty());
    }

    #[test]
    fn test_nested_cut_lines() {
        let mut clip = sample_clip();
        let mut cut = sample_clip();
        cut.offset = 0.125;
        clip.cut_lines.push(cut);

        let bytes = rmp_serde::encode::to_vec(&clip).expect("serialize");
        let decoded: ClipData = rmp_serde::decode::from_slice(&bytes).expect("deserialize");

        assert_eq!(decoded.cut_lines.len(), 1);
        assert_eq!(decoded.cut_lines[0].offset, 0.125);
    }
}
