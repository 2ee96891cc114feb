use crate::{BlockData, ClipData, Project, ProjectError, SequenceData, TrackData};
use daw_clip::WaveClip;
use daw_core::{TrackId, WaveTrack};
use daw_sample::SampleFormats;
use daw_storage::{BlockArray, BlockId, BlockRef, BlockSizes, SampleBlockFactoryPtr, Sequence};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// A block the project refers to that the factory could not provide. Its
/// samples were replaced by silence.
#[derive(Debug, Clone)]
pub struct MissingBlock {
    /// The track the block belongs to
    pub track_id: TrackId,
    /// Name of the clip (or cut line) holding the block
    pub clip_name: String,
    pub block: BlockId,
    pub len: u64,
    /// Why the block could not be fetched
    pub error: String,
}

#[derive(Debug)]
pub struct LoadedProject {
    pub name: String,
    pub tracks: Vec<WaveTrack>,
    /// Blocks substituted with silence because they could not be loaded
    pub missing_blocks: Vec<MissingBlock>,
}

#[derive(Debug, Clone)]
pub struct ProjectMetadata {
    pub name: String,
    pub version: u32,
    pub track_count: usize,
    pub clip_count: usize,
}

fn load_project_data(path: &Path) -> Result<Project, ProjectError> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);

    // Try JSON first, fall back to MessagePack
    serde_json::from_reader(reader).or_else(|_| {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        rmp_serde::decode::from_read(reader).map_err(ProjectError::from)
    })
}

pub fn load_project_metadata(path: &Path) -> Result<ProjectMetadata, ProjectError> {
    let project = load_project_data(path)?;

    let clip_count = project.tracks.iter().map(|t| t.clips.len()).sum();

    Ok(ProjectMetadata {
        name: project.name,
        version: project.version,
        track_count: project.tracks.len(),
        clip_count,
    })
}

/// Rebuilds tracks from project data, fetching blocks from one factory.
struct Loader<'a> {
    factory: &'a SampleBlockFactoryPtr,
    track_id: TrackId,
    missing: Vec<MissingBlock>,
}

impl Loader<'_> {
    fn block(&mut self, data: &BlockData, formats: SampleFormats, clip_name: &str) -> Result<BlockRef, ProjectError> {
        let len = data.len as usize;
        if data.silent {
            return Ok(self.factory.create_silent(len, formats.stored())?);
        }
        let id = BlockId(data.id);
        let error = match self.factory.fetch(id) {
            Ok(block) if block.sample_count() == len => return Ok(block),
            Ok(block) => format!("block holds {} samples, expected {len}", block.sample_count()),
            Err(err) => err.to_string(),
        };

        log::warn!("block {id} of clip '{clip_name}' is missing, substituting silence: {error}");
        self.missing.push(MissingBlock {
            track_id: self.track_id,
            clip_name: clip_name.to_string(),
            block: id,
            len: data.len,
            error,
        });
        Ok(self.factory.create_silent(len, formats.stored())?)
    }

    fn sequence(&mut self, data: &SequenceData, formats: SampleFormats, clip_name: &str) -> Result<Sequence, ProjectError> {
        if data.max_block_samples == 0 {
            return Err(ProjectError::Invalid(format!("clip '{clip_name}' has a zero block size")));
        }
        let mut blocks = BlockArray::new();
        for block in &data.blocks {
            if block.start != blocks.sample_count() {
                return Err(ProjectError::Invalid(format!(
                    "clip '{clip_name}': block {} starts at {} but the previous block ends at {}",
                    block.id,
                    block.start,
                    blocks.sample_count()
                )));
            }
            let block = self.block(block, formats, clip_name)?;
            blocks.append(block);
        }
        let sizes = BlockSizes::with_max(data.max_block_samples);
        Ok(Sequence::from_blocks(self.factory.clone(), formats, sizes, blocks)?)
    }

    fn clip(&mut self, data: &ClipData) -> Result<WaveClip, ProjectError> {
        if data.rate == 0 || data.stretch_ratio <= 0.0 || data.channels.is_empty() {
            return Err(ProjectError::Invalid(format!(
                "clip '{}' has rate {}, stretch {} and {} channels",
                data.name,
                data.rate,
                data.stretch_ratio,
                data.channels.len()
            )));
        }
        let sequences = data
            .channels
            .iter()
            .map(|channel| self.sequence(channel, data.formats, &data.name))
            .collect::<Result<Vec<_>, _>>()?;
        let len = sequences[0].sample_count();
        if sequences.iter().any(|s| s.sample_count() != len) {
            return Err(ProjectError::Invalid(format!(
                "channels of clip '{}' differ in length",
                data.name
            )));
        }
        let raw_duration = len as f64 / f64::from(data.rate) * data.stretch_ratio;
        let trims = data.trim_left + data.trim_right;
        if !(data.trim_left >= 0.0 && data.trim_right >= 0.0) || (trims > 0.0 && trims >= raw_duration) {
            return Err(ProjectError::Invalid(format!(
                "clip '{}' trims {} and {} leave nothing of its {raw_duration}s",
                data.name, data.trim_left, data.trim_right
            )));
        }

        let mut clip = WaveClip::from_sequences(sequences, data.rate, data.offset);
        clip.set_stretch_ratio(data.stretch_ratio);
        clip.set_trim_left(data.trim_left);
        clip.set_trim_right(data.trim_right);
        clip.set_name(data.name.clone());
        clip.set_color_index(data.color_index);
        clip.set_envelope(data.envelope.clone());
        for cut in &data.cut_lines {
            let cut = self.clip(cut)?;
            clip.add_cut_line(cut);
        }
        Ok(clip)
    }

    fn track(&mut self, data: &TrackData) -> Result<WaveTrack, ProjectError> {
        if data.rate == 0 || data.width == 0 {
            return Err(ProjectError::Invalid(format!(
                "track '{}' has rate {} and width {}",
                data.name, data.rate, data.width
            )));
        }
        self.track_id = TrackId(data.id);

        let mut track = WaveTrack::new(self.factory.clone(), data.width, data.rate, data.formats);
        track.set_id(self.track_id);
        track.set_name(data.name.clone());
        track.set_gain(data.gain);
        track.set_pan(data.pan);
        track.set_color_index(data.color_index);
        track.set_mute(data.mute);
        track.set_solo(data.solo);

        for clip_data in &data.clips {
            if clip_data.channels.len() != data.width {
                return Err(ProjectError::Invalid(format!(
                    "clip '{}' has {} channels on a track of width {}",
                    clip_data.name,
                    clip_data.channels.len(),
                    data.width
                )));
            }
            let clip = self.clip(clip_data)?;
            track.add_clip(clip)?;
        }
        Ok(track)
    }
}

/// Read a project saved as JSON or MessagePack and rebuild its tracks on
/// `factory`.
///
/// Blocks the factory cannot provide are replaced by silent blocks of the
/// same length and listed in [`LoadedProject::missing_blocks`].
pub fn load_project(path: &Path, factory: &SampleBlockFactoryPtr) -> Result<LoadedProject, ProjectError> {
    let project = load_project_data(path)?;

    let mut loader = Loader {
        factory,
        track_id: TrackId(0),
        missing: Vec::new(),
    };
    let tracks = project
        .tracks
        .iter()
        .map(|data| loader.track(data))
        .collect::<Result<Vec<_>, _>>()?;

    log::info!(
        "loaded project '{}' with {} tracks from {} ({} missing blocks)",
        project.name,
        tracks.len(),
        path.display(),
        loader.missing.len()
    );
    Ok(LoadedProject {
        name: project.name,
        tracks,
        missing_blocks: loader.missing,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DiskBlockFactory, FORMAT_VERSION, project_from_tracks, save_project};
    use daw_clip::EnvPoint;
    use daw_core::EditConfig;
    use daw_sample::SampleFormat;
    use daw_storage::MemoryBlockFactory;
    use tempfile::tempdir;

    fn ramp(len: usize) -> Vec<f32> {
        (0..len).map(|i| (i as f32 / len as f32) - 0.5).collect()
    }

    fn build_track(factory: &SampleBlockFactoryPtr) -> WaveTrack {
        let mut track = WaveTrack::new(factory.clone(), 2, 100, SampleFormat::Float.into());
        track.set_name("Drums");
        track.set_pan(0.25);
        track.set_mute(true);
        track.set_color_index(4);

        let left = ramp(300);
        let right: Vec<f32> = left.iter().map(|s| -s).collect();
        let mut clip = WaveClip::new(factory, 2, 100, track.formats());
        clip.append(&[left.as_slice(), right.as_slice()], SampleFormat::Float).expect("append");
        clip.flush().expect("flush");
        clip.set_sequence_start_time(0.5);
        clip.set_name("Loop");
        clip.set_trim_left(0.1);
        clip.set_trim_right(0.2);
        clip.envelope_mut().set_points([EnvPoint { t: 0.0, value: 1.0 }, EnvPoint { t: 2.0, value: 0.5 }]);
        track.add_clip(clip).expect("add");

        track
            .clear_and_add_cut_line(1.0, 1.5, &EditConfig::default())
            .expect("cut line");
        track
    }

    fn channel_samples(clip: &WaveClip, channel: usize) -> Vec<f32> {
        clip.sequence(channel)
            .get_floats(0, clip.sample_count() as usize, true)
            .expect("read")
    }

    fn assert_same_clip(a: &WaveClip, b: &WaveClip) {
        assert_eq!(a.sequence_start_time(), b.sequence_start_time());
        assert_eq!(a.trim_left(), b.trim_left());
        assert_eq!(a.trim_right(), b.trim_right());
        assert_eq!(a.stretch_ratio(), b.stretch_ratio());
        assert_eq!(a.name(), b.name());
        assert_eq!(a.formats(), b.formats());
        assert_eq!(a.envelope(), b.envelope());
        assert_eq!(a.num_cut_lines(), b.num_cut_lines());
        for channel in 0..a.width() {
            assert_eq!(channel_samples(a, channel), channel_samples(b, channel));
        }
        for (ca, cb) in a.cut_lines().iter().zip(b.cut_lines()) {
            assert_same_clip(ca, cb);
        }
    }

    #[test]
    fn test_load_project_file_not_found() {
        let factory = MemoryBlockFactory::new().into_ptr();
        let result = load_project(Path::new("/nonexistent/project.dawproj"), &factory);
        assert!(matches!(result.unwrap_err(), ProjectError::Io(_)));
    }

    #[test]
    fn test_load_project_invalid_format() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("invalid.dawproj");
        std::fs::write(&path, b"not valid json or msgpack").expect("write");

        let factory = MemoryBlockFactory::new().into_ptr();
        let result = load_project(&path, &factory);
        assert!(matches!(result.unwrap_err(), ProjectError::Deserialize(_)));
    }

    #[test]
    fn test_roundtrip_is_bit_identical() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("roundtrip.dawproj");
        let factory = MemoryBlockFactory::new().into_ptr();
        let track = build_track(&factory);
        assert_eq!(track.clips()[0].num_cut_lines(), 1);

        save_project(&path, "Round Trip", std::slice::from_ref(&track)).expect("save");
        let loaded = load_project(&path, &factory).expect("load");

        assert_eq!(loaded.name, "Round Trip");
        assert!(loaded.missing_blocks.is_empty());
        let restored = &loaded.tracks[0];
        assert_eq!(restored.id(), track.id());
        assert_eq!(restored.name(), "Drums");
        assert_eq!(restored.pan(), 0.25);
        assert!(restored.mute());
        assert_eq!(restored.color_index(), 4);
        assert_eq!(restored.num_clips(), 1);
        assert_same_clip(&track.clips()[0], &restored.clips()[0]);
    }

    #[test]
    fn test_load_messagepack_project() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("packed.dawproj");
        let factory = MemoryBlockFactory::new().into_ptr();
        let track = build_track(&factory);

        let project = project_from_tracks("Packed", std::slice::from_ref(&track)).expect("snapshot");
        let bytes = rmp_serde::encode::to_vec(&project).expect("encode");
        std::fs::write(&path, bytes).expect("write");

        let loaded = load_project(&path, &factory).expect("load");
        assert_eq!(loaded.name, "Packed");
        assert_same_clip(&track.clips()[0], &loaded.tracks[0].clips()[0]);
    }

    #[test]
    fn test_disk_blocks_survive_a_new_session() {
        let dir = tempdir().expect("tempdir");
        let blocks_dir = dir.path().join("blocks");
        let path = dir.path().join("session.dawproj");

        let expected = {
            let factory = DiskBlockFactory::open(&blocks_dir).expect("open").into_ptr();
            let track = build_track(&factory);
            save_project(&path, "Session", std::slice::from_ref(&track)).expect("save");
            track
                .clips()
                .iter()
                .map(|c| channel_samples(c, 1))
                .collect::<Vec<_>>()
        };

        let factory = DiskBlockFactory::open(&blocks_dir).expect("reopen").into_ptr();
        let loaded = load_project(&path, &factory).expect("load");

        assert!(loaded.missing_blocks.is_empty());
        let restored: Vec<_> = loaded.tracks[0]
            .clips()
            .iter()
            .map(|c| channel_samples(c, 1))
            .collect();
        assert_eq!(restored, expected);
    }

    #[test]
    fn test_missing_blocks_become_silence() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("missing.dawproj");
        let factory = MemoryBlockFactory::new().into_ptr();
        let track = build_track(&factory);
        save_project(&path, "Missing", std::slice::from_ref(&track)).expect("save");

        // A fresh memory factory knows none of the saved blocks
        let empty = MemoryBlockFactory::new().into_ptr();
        let loaded = load_project(&path, &empty).expect("load");

        assert!(!loaded.missing_blocks.is_empty());
        assert!(loaded.missing_blocks.iter().all(|m| m.track_id == track.id()));
        let clip = &loaded.tracks[0].clips()[0];
        assert_eq!(clip.sample_count(), track.clips()[0].sample_count());
        assert!(channel_samples(clip, 0).iter().all(|&s| s == 0.0));
        assert_eq!(clip.play_start_time(), track.clips()[0].play_start_time());
    }

    #[test]
    fn test_inconsistent_channels_are_rejected() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("bad.dawproj");
        let factory = MemoryBlockFactory::new().into_ptr();
        let track = build_track(&factory);

        let mut project = project_from_tracks("Bad", std::slice::from_ref(&track)).expect("snapshot");
        project.tracks[0].clips[0].channels.pop();
        std::fs::write(&path, serde_json::to_vec(&project).expect("encode")).expect("write");

        let result = load_project(&path, &factory);
        assert!(matches!(result.unwrap_err(), ProjectError::Invalid(_)));
    }

    #[test]
    fn test_trims_covering_the_clip_are_rejected() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("trims.dawproj");
        let factory = MemoryBlockFactory::new().into_ptr();
        let track = build_track(&factory);

        let mut project = project_from_tracks("Trims", std::slice::from_ref(&track)).expect("snapshot");
        project.tracks[0].clips[0].trim_left = 2.0;
        project.tracks[0].clips[0].trim_right = 2.0;
        std::fs::write(&path, serde_json::to_vec(&project).expect("encode")).expect("write");

        let result = load_project(&path, &factory);
        assert!(matches!(result.unwrap_err(), ProjectError::Invalid(_)));

        project.tracks[0].clips[0].trim_left = -0.5;
        project.tracks[0].clips[0].trim_right = 0.0;
        std::fs::write(&path, serde_json::to_vec(&project).expect("encode")).expect("write");

        let result = load_project(&path, &factory);
        assert!(matches!(result.unwrap_err(), ProjectError::Invalid(_)));
    }

    #[test]
    fn test_load_metadata() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("meta.dawproj");
        let factory = MemoryBlockFactory::new().into_ptr();
        save_project(&path, "Meta", &[build_track(&factory)]).expect("save");

        let metadata = load_project_metadata(&path).expect("metadata");
        assert_eq!(metadata.name, "Meta");
        assert_eq!(metadata.version, FORMAT_VERSION);
        assert_eq!(metadata.track_count, 1);
        assert_eq!(metadata.clip_count, 1);
    }
}
