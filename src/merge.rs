//! Pure interleaver of per-speaker transcripts into one chronological text.
//!
//! Lines come out as `[MM:SS] {display_name}: {text}`, ordered by start time
//! with ties broken by ascending track index. Consecutive segments of the
//! same speaker can be coalesced when the gap between them is small.

use crate::transcribe::SpeakerTranscript;

#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    #[error("No speaker transcripts to merge")]
    Empty,
}

#[derive(Debug, Clone)]
struct Line {
    track_index: u32,
    display_name: String,
    start_sec: f64,
    end_sec: f64,
    text: String,
}

/// Format seconds as `[MM:SS]`. Minutes keep counting past the hour.
pub fn format_timestamp(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    format!("[{:02}:{:02}]", total / 60, total % 60)
}

/// Merge per-speaker transcripts into one chronological transcript.
///
/// `gap_merge_threshold_sec` controls same-speaker coalescing; `0` disables
/// it. Empty-text segments are dropped. Fails only when `transcripts` itself
/// is empty; a recording where nobody spoke merges to an empty string.
pub fn merge(
    transcripts: &[SpeakerTranscript],
    gap_merge_threshold_sec: f64,
) -> Result<String, MergeError> {
    if transcripts.is_empty() {
        return Err(MergeError::Empty);
    }

    let mut lines: Vec<Line> = transcripts
        .iter()
        .flat_map(|transcript| {
            transcript
                .segments
                .iter()
                .filter(|segment| !segment.text.trim().is_empty())
                .map(|segment| Line {
                    track_index: transcript.speaker.track_index,
                    display_name: transcript.speaker.display_name.clone(),
                    start_sec: segment.start_sec,
                    end_sec: segment.end_sec,
                    text: segment.text.trim().to_string(),
                })
        })
        .collect();

    // Stable: equal keys keep each speaker's own emission order.
    lines.sort_by(|a, b| {
        a.start_sec
            .partial_cmp(&b.start_sec)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.track_index.cmp(&b.track_index))
    });

    if gap_merge_threshold_sec > 0.0 {
        lines = coalesce(lines, gap_merge_threshold_sec);
    }

    let rendered: Vec<String> = lines
        .iter()
        .map(|line| {
            format!(
                "{} {}: {}",
                format_timestamp(line.start_sec),
                line.display_name,
                line.text
            )
        })
        .collect();

    Ok(rendered.join("\n"))
}

/// Join consecutive same-speaker lines whose gap is under the threshold.
fn coalesce(lines: Vec<Line>, threshold_sec: f64) -> Vec<Line> {
    let mut out: Vec<Line> = Vec::with_capacity(lines.len());

    for line in lines {
        match out.last_mut() {
            Some(last)
                if last.track_index == line.track_index
                    && line.start_sec - last.end_sec < threshold_sec =>
            {
                last.text.push(' ');
                last.text.push_str(&line.text);
                last.end_sec = last.end_sec.max(line.end_sec);
            }
            _ => out.push(line),
        }
    }

    out
}
