//! Safe unpack of a speaker-track archive.
//!
//! Archive entries follow the `{track_index}-{display_name}.{ext}` naming
//! convention. Entries that don't match are skipped; an entry whose resolved
//! destination would escape the target directory rejects the whole archive
//! before anything is written.

use crate::recording::{AudioTrack, SpeakerInfo};
use crate::source::SourceError;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

/// Parse `{track_index}-{display_name}.{ext}` from an archive entry name.
///
/// Returns `None` for anything that doesn't match: no extension, no dash,
/// non-numeric index, zero index, or an empty display name.
pub fn parse_entry_name(name: &str) -> Option<(u32, String)> {
    // Entries are expected at the archive root; anything nested is not ours.
    if name.contains('/') || name.contains('\\') {
        return None;
    }

    let (base, ext) = name.rsplit_once('.')?;
    if ext.is_empty() {
        return None;
    }

    let (index_str, display_name) = base.split_once('-')?;
    let track_index: u32 = index_str.parse().ok()?;
    if track_index == 0 || display_name.is_empty() {
        return None;
    }

    Some((track_index, display_name.to_string()))
}

/// Unpack the archive at `archive_path` into `into`, mapping entries to the
/// given speaker metadata.
///
/// Two-phase: the whole entry list is validated before the first byte is
/// written, so a malicious entry never leaves partial output behind.
pub fn extract_tracks(
    archive_path: &Path,
    into: &Path,
    speakers: &[SpeakerInfo],
) -> Result<Vec<AudioTrack>, SourceError> {
    let file = std::fs::File::open(archive_path)?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| SourceError::Archive(format!("unreadable archive: {}", e)))?;

    let by_index: HashMap<u32, &SpeakerInfo> =
        speakers.iter().map(|s| (s.track_index, s)).collect();

    // Phase 1: validate and plan.
    let mut plan: Vec<(usize, u32, PathBuf)> = Vec::new();
    let mut seen: HashMap<u32, String> = HashMap::new();
    for i in 0..archive.len() {
        let entry = archive
            .by_index(i)
            .map_err(|e| SourceError::Archive(format!("unreadable archive entry: {}", e)))?;

        if entry.is_dir() {
            continue;
        }

        let name = entry.name().to_string();
        let enclosed = match entry.enclosed_name() {
            Some(p) => p,
            None => {
                return Err(SourceError::Archive(format!(
                    "entry {:?} escapes the extraction directory",
                    name
                )));
            }
        };

        let (track_index, _display_name) = match parse_entry_name(&name) {
            Some(parsed) => parsed,
            None => {
                log::debug!("Archive: skipping unrecognized entry {:?}", name);
                continue;
            }
        };

        if !by_index.contains_key(&track_index) {
            return Err(SourceError::Metadata(format!(
                "archive entry {:?} references track {} absent from speaker metadata",
                name, track_index
            )));
        }

        if let Some(first) = seen.get(&track_index) {
            log::warn!(
                "Archive: duplicate entry for track {} ({:?}); keeping {:?}",
                track_index,
                name,
                first
            );
            continue;
        }
        seen.insert(track_index, name.clone());

        plan.push((i, track_index, into.join(enclosed)));
    }

    if plan.is_empty() {
        return Err(SourceError::Archive(
            "archive contains no speaker-track entries".to_string(),
        ));
    }

    // Phase 2: extract.
    let mut tracks = Vec::with_capacity(plan.len());
    for (entry_index, track_index, dest) in plan {
        let mut entry = archive
            .by_index(entry_index)
            .map_err(|e| SourceError::Archive(format!("unreadable archive entry: {}", e)))?;

        let mut out = std::fs::File::create(&dest)?;
        io::copy(&mut entry, &mut out)?;

        let speaker = by_index[&track_index];
        tracks.push(AudioTrack {
            speaker: (*speaker).clone(),
            file_path: dest,
        });
    }

    tracks.sort_by_key(|t| t.speaker.track_index);
    Ok(tracks)
}

/// Read speaker metadata out of an archive's entry names, without extracting.
///
/// This is the authoritative metadata for drive-sourced archives, which have
/// no accompanying speaker endpoint.
pub fn list_archive_speakers(archive_path: &Path) -> Result<Vec<SpeakerInfo>, SourceError> {
    let file = std::fs::File::open(archive_path)?;
    let archive = zip::ZipArchive::new(file)
        .map_err(|e| SourceError::Archive(format!("unreadable archive: {}", e)))?;

    let mut speakers: Vec<SpeakerInfo> = Vec::new();
    for name in archive.file_names() {
        if let Some((track_index, display_name)) = parse_entry_name(name) {
            if speakers.iter().any(|s| s.track_index == track_index) {
                continue;
            }
            speakers.push(SpeakerInfo {
                track_index,
                display_name,
                // Archive names carry no platform user ids.
                user_id: 0,
            });
        }
    }

    if speakers.is_empty() {
        return Err(SourceError::Metadata(
            "archive contains no speaker-track entries".to_string(),
        ));
    }

    speakers.sort_by_key(|s| s.track_index);
    Ok(speakers)
}
