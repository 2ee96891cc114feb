use crate::{BlockData, ClipData, FORMAT_VERSION, Project, ProjectError, SequenceData, TrackData};
use daw_clip::WaveClip;
use daw_core::WaveTrack;
use daw_storage::Sequence;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

fn sequence_data(sequence: &Sequence) -> SequenceData {
    let blocks = sequence.blocks();
    SequenceData {
        max_block_samples: sequence.max_block_size(),
        blocks: blocks
            .iter()
            .map(|entry| BlockData {
                id: entry.block.id().0,
                start: entry.start,
                len: entry.len(),
                silent: entry.block.is_silent(),
            })
            .collect(),
    }
}

fn clip_data(clip: &WaveClip) -> ClipData {
    ClipData {
        offset: clip.sequence_start_time(),
        trim_left: clip.trim_left(),
        trim_right: clip.trim_right(),
        name: clip.name().to_string(),
        color_index: clip.color_index(),
        rate: clip.rate(),
        stretch_ratio: clip.stretch_ratio(),
        formats: clip.formats(),
        envelope: clip.envelope().clone(),
        channels: clip.sequences().iter().map(sequence_data).collect(),
        cut_lines: clip.cut_lines().iter().map(clip_data).collect(),
    }
}

/// Snapshot `tracks` as project data. Appended audio is flushed first so
/// every sample lives in a block.
pub fn project_from_tracks(name: &str, tracks: &[WaveTrack]) -> Result<Project, ProjectError> {
    let mut data = Vec::with_capacity(tracks.len());
    for track in tracks {
        track.flush()?;
        data.push(TrackData {
            id: track.id().0,
            name: track.name().to_string(),
            rate: track.rate(),
            width: track.width(),
            formats: track.formats(),
            gain: track.gain(),
            pan: track.pan(),
            color_index: track.color_index(),
            mute: track.mute(),
            solo: track.solo(),
            clips: track
                .clips()
                .iter()
                .filter(|clip| !clip.is_placeholder())
                .map(clip_data)
                .collect(),
        });
    }
    Ok(Project {
        version: FORMAT_VERSION,
        name: name.to_string(),
        tracks: data,
    })
}

/// Write `tracks` to `path` as pretty JSON. Sample data stays in the blocks'
/// factory; the file refers to blocks by id.
pub fn save_project(path: &Path, name: &str, tracks: &[WaveTrack]) -> Result<(), ProjectError> {
    let project = project_from_tracks(name, tracks)?;

    let file = File::create(path)?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, &project)?;

    log::info!("saved project '{name}' with {} tracks to {}", tracks.len(), path.display());
    Ok(())
}
