use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::media_format::TrackKind;

/// Per-track statistics of a finalized container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackSummary {
    pub index: usize,
    pub kind: TrackKind,
    pub mime: String,
    pub sample_count: u64,
    pub first_pts_us: i64,
    pub last_pts_us: i64,
}

/// Span between the earliest and the latest sample over all tracks.
pub fn span_us(tracks: &[TrackSummary]) -> i64 {
    let with_samples = || tracks.iter().filter(|t| t.sample_count > 0);
    let first = with_samples().map(|t| t.first_pts_us).min();
    let last = with_samples().map(|t| t.last_pts_us).max();
    match (first, last) {
        (Some(first), Some(last)) => last - first,
        _ => 0,
    }
}

/// Result returned when a recording completes.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingResult {
    pub file_path: PathBuf,
    pub duration_secs: f64,
    pub tracks: Vec<TrackSummary>,
    pub metadata: RecordingMetadata,
    pub checksum: String,
}

/// Metadata stored alongside a recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingMetadata {
    pub id: String,
    pub duration_secs: f64,
    pub file_path: String,
    pub checksum: String,
    pub created_at: String,
    pub tracks: Vec<TrackSummary>,
}

impl RecordingMetadata {
    pub fn new(duration_secs: f64, file_path: &str, checksum: &str, tracks: Vec<TrackSummary>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            duration_secs,
            file_path: file_path.to_string(),
            checksum: checksum.to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
            tracks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(kind: TrackKind, count: u64, first: i64, last: i64) -> TrackSummary {
        TrackSummary {
            index: 0,
            kind,
            mime: "x".into(),
            sample_count: count,
            first_pts_us: first,
            last_pts_us: last,
        }
    }

    #[test]
    fn span_covers_all_tracks() {
        let tracks = [
            track(TrackKind::Video, 3, 0, 80_000),
            track(TrackKind::Audio, 5, 10_000, 120_000),
        ];
        assert_eq!(span_us(&tracks), 120_000);
    }

    #[test]
    fn span_ignores_empty_tracks() {
        let tracks = [track(TrackKind::Video, 0, 0, 0), track(TrackKind::Audio, 2, 500, 1500)];
        assert_eq!(span_us(&tracks), 1000);
        assert_eq!(span_us(&[]), 0);
    }
}
