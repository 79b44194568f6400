use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::models::error::RecorderError;
use crate::models::media_format::{BufferInfo, MediaFormat, TrackKind};
use crate::models::recording_result::TrackSummary;
use crate::traits::container::{ContainerFormat, ContainerWriter};

/// What the coordinator needs from a track encoder.
pub trait MuxedTrack: Send + Sync {
    fn kind(&self) -> TrackKind;

    /// Begin capturing and spawn the drain thread.
    fn start_recording(&self) -> Result<(), RecorderError>;

    /// Request the drain thread to finish. Does not wait.
    fn stop_recording(&self);

    /// Wait for the drain thread to terminate.
    fn join(&self);

    /// Tear down the codec and everything attached to it. Idempotent.
    fn release(&self);
}

/// Finalized container returned by [`MuxerCoordinator::finish`].
#[derive(Debug, Clone, PartialEq)]
pub struct FinishedContainer {
    pub path: PathBuf,
    pub tracks: Vec<TrackSummary>,
}

struct MuxerState {
    writer: Option<Box<dyn ContainerWriter>>,
    path: Option<PathBuf>,
    encoders: Vec<Weak<dyn MuxedTrack>>,
    expected_tracks: usize,
    registered_tracks: usize,
    started_tracks: usize,
    is_started: bool,
    ever_started: bool,
    is_released: bool,
    dropped_samples: u64,
}

/// Owns the container writer and gates it behind a start barrier.
///
/// The writer starts exactly once, when every expected track has
/// registered its negotiated format and called [`start`](Self::start).
/// Writes before that, or after release, are dropped.
pub struct MuxerCoordinator {
    format: Arc<dyn ContainerFormat>,
    output_directory: PathBuf,
    file_prefix: String,
    state: Mutex<MuxerState>,
    started: Condvar,
}

impl MuxerCoordinator {
    pub fn new(format: Arc<dyn ContainerFormat>, output_directory: &Path, file_prefix: &str) -> Self {
        Self {
            format,
            output_directory: output_directory.to_path_buf(),
            file_prefix: file_prefix.to_string(),
            state: Mutex::new(MuxerState {
                writer: None,
                path: None,
                encoders: Vec::new(),
                expected_tracks: 0,
                registered_tracks: 0,
                started_tracks: 0,
                is_started: false,
                ever_started: false,
                is_released: false,
                dropped_samples: 0,
            }),
            started: Condvar::new(),
        }
    }

    /// Register a prepared encoder. Each one adds an expected track.
    pub fn add_encoder(&self, encoder: Weak<dyn MuxedTrack>) {
        let mut s = self.state.lock();
        s.encoders.push(encoder);
        s.expected_tracks += 1;
        log::debug!("muxer: expecting {} tracks", s.expected_tracks);
    }

    pub fn expected_tracks(&self) -> usize {
        self.state.lock().expected_tracks
    }

    /// Create the output container at a fresh path.
    pub fn prepare(&self) -> Result<PathBuf, RecorderError> {
        let mut s = self.state.lock();
        if s.is_released {
            return Err(RecorderError::InvalidState("muxer already released".into()));
        }
        if let Some(path) = &s.path {
            return Ok(path.clone());
        }

        let path = self.output_directory.join(format!(
            "{}_{}_{}.{}",
            self.file_prefix,
            chrono::Local::now().format("%Y-%m-%d-%H-%M-%S"),
            uuid::Uuid::new_v4().simple(),
            self.format.extension()
        ));
        let writer = self.format.create(&path)?;
        log::info!("muxer: output file {}", path.display());
        s.writer = Some(writer);
        s.path = Some(path.clone());
        Ok(path)
    }

    pub fn output_path(&self) -> Option<PathBuf> {
        self.state.lock().path.clone()
    }

    /// Register one track's negotiated format. Only valid before start.
    pub fn add_track(&self, format: &MediaFormat) -> Result<usize, RecorderError> {
        let mut s = self.state.lock();
        if s.is_started || s.is_released {
            return Err(RecorderError::InvalidState("muxer already started".into()));
        }
        let writer = s
            .writer
            .as_mut()
            .ok_or_else(|| RecorderError::InvalidState("muxer not prepared".into()))?;
        let index = writer.add_track(format)?;
        s.registered_tracks += 1;
        log::info!(
            "muxer: added {} track {} ({}/{})",
            format.kind,
            index,
            s.registered_tracks,
            s.expected_tracks
        );
        Ok(index)
    }

    /// Count one started track. Starts the writer when every expected
    /// track has arrived. Returns whether the writer is running.
    pub fn start(&self) -> bool {
        let mut s = self.state.lock();
        if s.is_released {
            return false;
        }
        s.started_tracks += 1;
        if s.expected_tracks > 0 && s.started_tracks == s.expected_tracks && !s.is_started {
            let result = match s.writer.as_mut() {
                Some(writer) => writer.start(),
                None => Err(RecorderError::InvalidState("muxer not prepared".into())),
            };
            match result {
                Ok(()) => {
                    s.is_started = true;
                    s.ever_started = true;
                    log::info!("muxer: started with {} tracks", s.started_tracks);
                }
                Err(e) => {
                    log::error!("muxer: failed to start writer: {}", e);
                    s.is_released = true;
                }
            }
            self.started.notify_all();
        }
        s.is_started
    }

    /// Block up to `timeout` for the writer to start.
    pub fn wait_started(&self, timeout: Duration) -> bool {
        let mut s = self.state.lock();
        if !s.is_started && !s.is_released {
            self.started.wait_for(&mut s, timeout);
        }
        s.is_started
    }

    pub fn is_started(&self) -> bool {
        self.state.lock().is_started
    }

    pub fn is_released(&self) -> bool {
        self.state.lock().is_released
    }

    /// Samples rejected because the writer was not running.
    pub fn dropped_samples(&self) -> u64 {
        self.state.lock().dropped_samples
    }

    /// Forward one sample to the writer. Returns whether it was written.
    pub fn write_sample_data(&self, track_index: usize, data: &[u8], info: &BufferInfo) -> bool {
        let mut s = self.state.lock();
        if !s.is_started || s.is_released {
            s.dropped_samples += 1;
            log::warn!(
                "muxer: dropping sample for track {} at {}us, writer not running",
                track_index,
                info.presentation_time_us
            );
            return false;
        }
        let Some(writer) = s.writer.as_mut() else {
            return false;
        };
        match writer.write_sample_data(track_index, data, info) {
            Ok(()) => true,
            Err(e) => {
                log::error!("muxer: write failed on track {}: {}", track_index, e);
                false
            }
        }
    }

    /// One started track finished.
    pub fn stop_track(&self) {
        let mut s = self.state.lock();
        s.started_tracks = s.started_tracks.saturating_sub(1);
        log::debug!("muxer: track stopped, {} still running", s.started_tracks);
    }

    fn live_encoders(&self) -> Vec<Arc<dyn MuxedTrack>> {
        self.state.lock().encoders.iter().filter_map(Weak::upgrade).collect()
    }

    /// Start every registered encoder.
    pub fn start_recording(&self) -> Result<(), RecorderError> {
        for encoder in self.live_encoders() {
            encoder.start_recording()?;
        }
        Ok(())
    }

    /// Stop every encoder, wait for their drain threads and finalize the
    /// container.
    pub fn stop_recording(&self) -> Result<Option<FinishedContainer>, RecorderError> {
        let encoders = self.live_encoders();
        for encoder in &encoders {
            encoder.stop_recording();
        }
        for encoder in &encoders {
            encoder.join();
        }
        for encoder in &encoders {
            encoder.release();
        }
        self.finish()
    }

    /// Release the writer. Returns the finalized container, or None when
    /// the writer never started, in which case the empty file is removed.
    pub fn finish(&self) -> Result<Option<FinishedContainer>, RecorderError> {
        let (writer, path, ever_started) = {
            let mut s = self.state.lock();
            s.is_released = true;
            s.is_started = false;
            self.started.notify_all();
            (s.writer.take(), s.path.clone(), s.ever_started)
        };

        let (Some(mut writer), Some(path)) = (writer, path) else {
            return Ok(None);
        };

        if !ever_started {
            drop(writer);
            if let Err(e) = fs::remove_file(&path) {
                log::warn!("muxer: failed to remove unused file {}: {}", path.display(), e);
            } else {
                log::info!("muxer: no track produced output, removed {}", path.display());
            }
            return Ok(None);
        }

        let tracks = writer.stop()?;
        Ok(Some(FinishedContainer { path, tracks }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::media_format::{BufferFlags, MIME_AUDIO_AAC, MIME_VIDEO_AVC};
    use crate::storage::container_file::{read_container, MrecFormat};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::thread;

    fn temp_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("media_recorder_muxer_{}_{}", std::process::id(), name))
    }

    #[derive(Default)]
    struct FakeTrack {
        kind: Option<TrackKind>,
        stops: AtomicU32,
        joins: AtomicU32,
        releases: AtomicU32,
    }

    impl MuxedTrack for FakeTrack {
        fn kind(&self) -> TrackKind {
            self.kind.unwrap_or(TrackKind::Audio)
        }

        fn start_recording(&self) -> Result<(), RecorderError> {
            Ok(())
        }

        fn stop_recording(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }

        fn join(&self) {
            self.joins.fetch_add(1, Ordering::SeqCst);
        }

        fn release(&self) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn coordinator_with_tracks(dir: &Path, tracks: &[Arc<FakeTrack>]) -> MuxerCoordinator {
        let muxer = MuxerCoordinator::new(Arc::new(MrecFormat), dir, "test");
        for track in tracks {
            let weak: Weak<dyn MuxedTrack> = Arc::downgrade(track) as Weak<FakeTrack>;
            muxer.add_encoder(weak);
        }
        muxer
    }

    fn sample(pts: i64) -> BufferInfo {
        BufferInfo {
            offset: 0,
            size: 4,
            presentation_time_us: pts,
            flags: BufferFlags::NONE,
        }
    }

    #[test]
    fn writer_starts_only_after_every_track() {
        let dir = temp_dir("barrier");
        let tracks = [Arc::new(FakeTrack::default()), Arc::new(FakeTrack::default())];
        let muxer = coordinator_with_tracks(&dir, &tracks);
        let path = muxer.prepare().unwrap();
        assert!(path.to_string_lossy().ends_with(".mrec"));

        let video = muxer.add_track(&MediaFormat::video(MIME_VIDEO_AVC, 640, 480)).unwrap();
        assert!(!muxer.start());
        assert!(!muxer.write_sample_data(video, &[1, 2, 3, 4], &sample(0)));
        assert_eq!(muxer.dropped_samples(), 1);
        assert!(!muxer.wait_started(Duration::from_millis(10)));

        let audio = muxer.add_track(&MediaFormat::audio(MIME_AUDIO_AAC, 44100, 1)).unwrap();
        assert!(muxer.start());
        assert!(muxer.is_started());
        assert!(muxer.add_track(&MediaFormat::audio(MIME_AUDIO_AAC, 44100, 1)).is_err());

        assert!(muxer.write_sample_data(video, &[1, 2, 3, 4], &sample(0)));
        assert!(muxer.write_sample_data(audio, &[5, 6, 7, 8], &sample(0)));

        let finished = muxer.finish().unwrap().unwrap();
        assert_eq!(finished.tracks.len(), 2);
        assert!(!muxer.write_sample_data(video, &[1, 2, 3, 4], &sample(40_000)));

        let contents = read_container(&finished.path).unwrap();
        assert_eq!(contents.samples.len(), 2);
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn waiter_is_woken_by_last_track() {
        let dir = temp_dir("waiter");
        let tracks = [Arc::new(FakeTrack::default()), Arc::new(FakeTrack::default())];
        let muxer = Arc::new(coordinator_with_tracks(&dir, &tracks));
        muxer.prepare().unwrap();
        muxer.add_track(&MediaFormat::video(MIME_VIDEO_AVC, 320, 240)).unwrap();
        assert!(!muxer.start());

        let waiter = {
            let muxer = Arc::clone(&muxer);
            thread::spawn(move || {
                let mut started = false;
                for _ in 0..50 {
                    if muxer.wait_started(Duration::from_millis(100)) {
                        started = true;
                        break;
                    }
                }
                started
            })
        };

        thread::sleep(Duration::from_millis(30));
        muxer.add_track(&MediaFormat::audio(MIME_AUDIO_AAC, 44100, 1)).unwrap();
        assert!(muxer.start());
        assert!(waiter.join().unwrap());

        muxer.finish().unwrap();
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn never_started_file_is_removed() {
        let dir = temp_dir("never_started");
        let tracks = [Arc::new(FakeTrack::default())];
        let muxer = coordinator_with_tracks(&dir, &tracks);
        assert_eq!(muxer.output_path(), None);
        let path = muxer.prepare().unwrap();
        assert!(path.exists());
        assert_eq!(muxer.output_path(), Some(path.clone()));

        assert_eq!(muxer.stop_recording().unwrap(), None);
        assert!(!path.exists());
        assert!(muxer.is_released());
        assert!(!muxer.start());
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn stop_fans_out_before_finishing() {
        let dir = temp_dir("fan_out");
        let tracks = [
            Arc::new(FakeTrack {
                kind: Some(TrackKind::Video),
                ..Default::default()
            }),
            Arc::new(FakeTrack::default()),
        ];
        let muxer = coordinator_with_tracks(&dir, &tracks);
        muxer.prepare().unwrap();
        muxer.start_recording().unwrap();
        muxer.stop_recording().unwrap();

        for track in &tracks {
            assert_eq!(track.stops.load(Ordering::SeqCst), 1);
            assert_eq!(track.joins.load(Ordering::SeqCst), 1);
            assert_eq!(track.releases.load(Ordering::SeqCst), 1);
        }
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn unwritable_directory_fails_prepare() {
        let blocker = temp_dir("blocker_file");
        fs::write(&blocker, b"not a directory").unwrap();
        let muxer = MuxerCoordinator::new(Arc::new(MrecFormat), &blocker.join("nested"), "test");
        assert!(matches!(muxer.prepare(), Err(RecorderError::StorageError(_))));
        assert_eq!(muxer.output_path(), None);
        fs::remove_file(&blocker).ok();
    }
}
