use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};
use std::time::Instant;

use parking_lot::{Condvar, Mutex, ReentrantMutex};

use crate::encoder::audio::{AudioInput, AudioSource};
use crate::encoder::track::TrackEncoder;
use crate::encoder::video::VideoSource;
use crate::models::config::RecorderConfiguration;
use crate::models::error::RecorderError;
use crate::models::media_format::TrackKind;
use crate::models::recording_result::{span_us, RecordingMetadata, RecordingResult};
use crate::models::state::SessionState;
use crate::muxer::coordinator::{MuxedTrack, MuxerCoordinator};
use crate::render::offscreen::FrameSource;
use crate::storage::container_file::sha256_file;
use crate::storage::metadata;
use crate::traits::codec::CodecProvider;
use crate::traits::container::ContainerFormat;
use crate::traits::listener::RecorderListener;

struct SessionInner {
    state: SessionState,
    coordinator: Option<Arc<MuxerCoordinator>>,
    video: Option<Arc<TrackEncoder>>,
    audio: Option<Arc<TrackEncoder>>,
    audio_input: Option<AudioInput>,
    started_at: Option<Instant>,
    /// Thread running the stop that moved the session into `Stopping`.
    stopper: Option<ThreadId>,
}

impl SessionInner {
    /// True when the calling thread is one the in-flight stop waits on.
    fn stop_depends_on_current_thread(&self) -> bool {
        let current = thread::current().id();
        self.stopper == Some(current)
            || self
                .video
                .iter()
                .chain(self.audio.iter())
                .any(|encoder| encoder.is_drain_thread(current))
    }
}

/// Wires one multiplexer coordinator to a video and an audio track encoder.
///
/// Data flow:
/// ```text
/// [OffscreenRenderer] → [RenderWorker] → [video codec] ─┐
///                                                       ├→ [MuxerCoordinator] → [container]
/// [AudioInput] → [PcmRingBuffer] → [audio codec] ───────┘
/// ```
///
/// All methods take `&self`; share the session behind an `Arc` to stop it
/// from another thread.
pub struct RecordingSession {
    config: RecorderConfiguration,
    codecs: Arc<dyn CodecProvider>,
    container: Arc<dyn ContainerFormat>,
    frames: Option<FrameSource>,
    listener: Option<Arc<dyn RecorderListener>>,
    /// Serializes prepare/start and the entry into `Stopping`. Reentrant so a
    /// listener called during prepare may call back into the session.
    /// Listeners run without `inner` held.
    lifecycle: ReentrantMutex<()>,
    inner: Mutex<SessionInner>,
    /// Signalled when the session reaches a terminal state.
    settled: Condvar,
}

impl RecordingSession {
    pub fn new(
        config: RecorderConfiguration,
        codecs: Arc<dyn CodecProvider>,
        container: Arc<dyn ContainerFormat>,
        frames: Option<FrameSource>,
        listener: Option<Arc<dyn RecorderListener>>,
    ) -> Self {
        Self {
            config,
            codecs,
            container,
            frames,
            listener,
            lifecycle: ReentrantMutex::new(()),
            inner: Mutex::new(SessionInner {
                state: SessionState::Idle,
                coordinator: None,
                video: None,
                audio: None,
                audio_input: None,
                started_at: None,
                stopper: None,
            }),
            settled: Condvar::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state.clone()
    }

    /// Handle for pushing PCM, available once the audio track is prepared.
    pub fn audio_input(&self) -> Option<AudioInput> {
        self.inner.lock().audio_input.clone()
    }

    /// Tracks that survived preparation.
    pub fn active_tracks(&self) -> Vec<TrackKind> {
        let inner = self.inner.lock();
        let mut tracks = Vec::new();
        if inner.video.is_some() {
            tracks.push(TrackKind::Video);
        }
        if inner.audio.is_some() {
            tracks.push(TrackKind::Audio);
        }
        tracks
    }

    fn report_error(&self, track: TrackKind, error: &RecorderError) {
        log::error!("session: {} track failed: {}", track, error);
        if let Some(listener) = &self.listener {
            listener.on_error(track, error);
        }
    }

    fn prepare_track(&self, encoder: &Arc<TrackEncoder>, coordinator: &MuxerCoordinator) -> Result<(), RecorderError> {
        encoder.prepare(self.codecs.as_ref())?;
        let weak: Weak<dyn MuxedTrack> = Arc::downgrade(encoder) as Weak<TrackEncoder>;
        coordinator.add_encoder(weak);
        Ok(())
    }

    /// Prepare every configured track and create the container.
    ///
    /// A track that fails is reported through the listener and dropped; the
    /// call fails only when no track survives or the file cannot be created,
    /// in which case nothing is left on disk.
    pub fn prepare(&self) -> Result<(), RecorderError> {
        let _lifecycle = self.lifecycle.lock();
        match self.state() {
            SessionState::Idle => {}
            SessionState::Prepared => return Ok(()),
            other => {
                log::warn!("session: prepare ignored in state {:?}", other);
                return Ok(());
            }
        }

        if let Err(msg) = self.config.validate() {
            return Err(self.fail(RecorderError::ConfigurationFailed(msg)));
        }

        let coordinator = Arc::new(MuxerCoordinator::new(
            Arc::clone(&self.container),
            &self.config.output_directory,
            &self.config.file_prefix,
        ));
        let mut last_error = None;
        let mut video = None;
        let mut audio = None;
        let mut audio_input = None;

        if let Some(video_config) = &self.config.video {
            match &self.frames {
                Some(frames) => {
                    let source = VideoSource::new(video_config.clone(), self.config.render, frames.clone());
                    let encoder = TrackEncoder::new(
                        Box::new(source),
                        Arc::clone(&coordinator),
                        self.listener.clone(),
                        self.config.drain,
                    );
                    match self.prepare_track(&encoder, &coordinator) {
                        Ok(()) => video = Some(encoder),
                        Err(e) => {
                            self.report_error(TrackKind::Video, &e);
                            last_error = Some(e);
                        }
                    }
                }
                None => {
                    let e = RecorderError::ConfigurationFailed("video track needs a frame source".into());
                    self.report_error(TrackKind::Video, &e);
                    last_error = Some(e);
                }
            }
        }

        if let Some(audio_config) = &self.config.audio {
            let source = AudioSource::new(audio_config.clone());
            let staging = source.staging();
            let encoder = TrackEncoder::new(
                Box::new(source),
                Arc::clone(&coordinator),
                self.listener.clone(),
                self.config.drain,
            );
            match self.prepare_track(&encoder, &coordinator) {
                Ok(()) => {
                    audio_input = Some(AudioInput::new(&encoder, staging, audio_config));
                    audio = Some(encoder);
                }
                Err(e) => {
                    self.report_error(TrackKind::Audio, &e);
                    last_error = Some(e);
                }
            }
        }

        if video.is_none() && audio.is_none() {
            let error = last_error.unwrap_or_else(|| RecorderError::ConfigurationFailed("no track enabled".into()));
            return Err(self.fail(error));
        }

        if let Err(e) = coordinator.prepare() {
            log::error!("session: failed to create container: {}", e);
            for encoder in video.iter().chain(audio.iter()) {
                encoder.release();
            }
            return Err(self.fail(e));
        }

        let track_count = video.iter().count() + audio.iter().count();
        let mut inner = self.inner.lock();
        inner.coordinator = Some(coordinator);
        inner.video = video;
        inner.audio = audio;
        inner.audio_input = audio_input;
        inner.state = SessionState::Prepared;
        log::info!("session prepared with {} track(s)", track_count);
        Ok(())
    }

    fn fail(&self, error: RecorderError) -> RecorderError {
        self.settle(SessionState::Failed(error.clone()));
        error
    }

    fn settle(&self, state: SessionState) {
        let encoders = {
            let mut inner = self.inner.lock();
            inner.state = state;
            inner.stopper = None;
            self.settled.notify_all();
            (inner.video.take(), inner.audio.take())
        };
        // Dropped outside the lock: a last reference releases its encoder,
        // which calls the listener.
        drop(encoders);
    }

    /// Start every prepared track. A no-op outside the prepared state.
    pub fn start_recording(&self) -> Result<(), RecorderError> {
        let _lifecycle = self.lifecycle.lock();
        let coordinator = {
            let inner = self.inner.lock();
            if !matches!(inner.state, SessionState::Prepared) {
                log::warn!("session: start ignored in state {:?}", inner.state);
                return Ok(());
            }
            inner
                .coordinator
                .clone()
                .ok_or_else(|| RecorderError::InvalidState("no coordinator".into()))?
        };

        coordinator.start_recording()?;
        let mut inner = self.inner.lock();
        inner.started_at = Some(Instant::now());
        inner.state = SessionState::Recording;
        log::info!("session: recording started");
        Ok(())
    }

    /// Stop and finalize. Safe from any thread and idempotent: later calls
    /// return the result of the first.
    ///
    /// A stop issued while another one is finalizing waits for it, unless
    /// it comes from a thread that stop is itself waiting on (a drain thread
    /// calling back through the listener); that call returns `Ok(None)`.
    pub fn stop_recording(&self) -> Result<Option<RecordingResult>, RecorderError> {
        let lifecycle = self.lifecycle.lock();
        let mut inner = self.inner.lock();
        if matches!(inner.state, SessionState::Stopping) {
            if inner.stop_depends_on_current_thread() {
                log::debug!("session: stop re-entered from the pipeline, not waiting");
                return Ok(None);
            }
            drop(lifecycle);
            while matches!(inner.state, SessionState::Stopping) {
                self.settled.wait(&mut inner);
            }
            return match &inner.state {
                SessionState::Failed(e) => Err(e.clone()),
                SessionState::Completed(result) => Ok(result.as_deref().cloned()),
                _ => Ok(None),
            };
        }
        match &inner.state {
            SessionState::Completed(result) => return Ok(result.as_deref().cloned()),
            SessionState::Prepared | SessionState::Recording => {}
            other => {
                log::warn!("session: stop ignored in state {:?}", other);
                return Ok(None);
            }
        }
        inner.state = SessionState::Stopping;
        inner.stopper = Some(thread::current().id());
        inner.audio_input = None;
        let coordinator = inner.coordinator.take();
        let started_at = inner.started_at;
        drop(inner);
        drop(lifecycle);

        let finished = match coordinator.map(|c| c.stop_recording()).transpose() {
            Ok(finished) => finished.flatten(),
            Err(e) => return Err(self.fail(e)),
        };

        let Some(finished) = finished else {
            log::info!("session: stopped without output");
            self.settle(SessionState::Completed(None));
            return Ok(None);
        };

        let checksum = match sha256_file(&finished.path) {
            Ok(checksum) => checksum,
            Err(e) => return Err(self.fail(e)),
        };
        let duration_secs = span_us(&finished.tracks) as f64 / 1_000_000.0;
        let recording_metadata = RecordingMetadata::new(
            duration_secs,
            &finished.path.to_string_lossy(),
            &checksum,
            finished.tracks.clone(),
        );
        if self.config.write_metadata {
            if let Err(e) = metadata::write_metadata(&recording_metadata, &finished.path) {
                log::warn!("session: {}", e);
            }
        }

        let result = RecordingResult {
            file_path: finished.path,
            duration_secs,
            tracks: finished.tracks,
            metadata: recording_metadata,
            checksum,
        };
        log::info!(
            "session: recording finished, {:.2}s in {} (wall clock {:.2}s)",
            result.duration_secs,
            result.file_path.display(),
            started_at.map(|t| t.elapsed().as_secs_f64()).unwrap_or(0.0)
        );
        self.settle(SessionState::Completed(Some(Box::new(result.clone()))));
        Ok(Some(result))
    }
}

impl Drop for RecordingSession {
    fn drop(&mut self) {
        let active = matches!(self.inner.lock().state, SessionState::Prepared | SessionState::Recording);
        if active {
            if let Err(e) = self.stop_recording() {
                log::warn!("session: stop on drop failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::HeadlessContext;
    use crate::backend::software::SoftwareCodecProvider;
    use crate::models::config::{AudioEncoderConfig, VideoEncoderConfig};
    use crate::render::offscreen::OffscreenRenderer;
    use crate::storage::container_file::{read_container, MrecFormat};
    use crate::traits::graphics::Renderer;
    use std::path::PathBuf;
    use std::thread;
    use std::time::Duration;

    #[derive(Default)]
    struct Events {
        log: Mutex<Vec<String>>,
    }

    impl Events {
        fn contains(&self, event: &str) -> bool {
            self.log.lock().iter().any(|e| e == event)
        }
    }

    impl RecorderListener for Events {
        fn on_prepared(&self, track: TrackKind) {
            self.log.lock().push(format!("prepared:{}", track));
        }

        fn on_stopped(&self, track: TrackKind) {
            self.log.lock().push(format!("stopped:{}", track));
        }

        fn on_error(&self, track: TrackKind, _error: &RecorderError) {
            self.log.lock().push(format!("error:{}", track));
        }
    }

    struct Fixture {
        dir: PathBuf,
        renderer: OffscreenRenderer,
        events: Arc<Events>,
        session: RecordingSession,
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            std::fs::remove_dir_all(&self.dir).ok();
        }
    }

    fn fixture(name: &str, configure: impl FnOnce(&mut RecorderConfiguration)) -> Fixture {
        let dir = std::env::temp_dir().join(format!("media_recorder_session_{}_{}", std::process::id(), name));
        let context = Arc::new(HeadlessContext::new());
        let mut renderer = OffscreenRenderer::new(context);
        renderer.on_surface_created().unwrap();
        renderer.on_surface_changed(640, 480).unwrap();

        let mut config = RecorderConfiguration {
            output_directory: dir.clone(),
            video: Some(VideoEncoderConfig::default()),
            audio: Some(AudioEncoderConfig::default()),
            ..Default::default()
        };
        configure(&mut config);

        let events = Arc::new(Events::default());
        let listener: Arc<dyn RecorderListener> = events.clone();
        let session = RecordingSession::new(
            config,
            Arc::new(SoftwareCodecProvider::new()),
            Arc::new(MrecFormat),
            Some(renderer.frame_source().unwrap()),
            Some(listener),
        );
        Fixture {
            dir,
            renderer,
            events,
            session,
        }
    }

    fn files_in(dir: &PathBuf) -> usize {
        std::fs::read_dir(dir).map(|entries| entries.count()).unwrap_or(0)
    }

    const FRAME_US: i64 = 40_000;
    const AUDIO_FRAME_US: i64 = 1024 * 1_000_000 / 44_100;

    #[test]
    fn records_video_and_audio_into_one_container() {
        let mut f = fixture("two_tracks", |_| {});
        f.session.prepare().unwrap();
        assert_eq!(f.session.state(), SessionState::Prepared);
        assert_eq!(f.session.active_tracks(), vec![TrackKind::Video, TrackKind::Audio]);
        f.session.start_recording().unwrap();

        let audio = f.session.audio_input().unwrap();
        for i in 0..50 {
            f.renderer.on_draw_frame(i * FRAME_US);
            assert_eq!(audio.push(&[0.1; 1024], 1, i * AUDIO_FRAME_US), 1);
            thread::sleep(Duration::from_millis(5));
        }
        thread::sleep(Duration::from_millis(200));

        let result = f.session.stop_recording().unwrap().unwrap();
        assert!(f.session.state().is_terminal());

        let contents = read_container(&result.file_path).unwrap();
        assert_eq!(contents.tracks.len(), 2);
        for track in &contents.tracks {
            assert!(track.summary.sample_count > 0, "{} track is empty", track.format.kind);
            let times: Vec<i64> = contents.samples_of(track.index).map(|s| s.presentation_time_us).collect();
            assert!(times.windows(2).all(|w| w[0] <= w[1]));
        }

        let last_submitted = 49 * FRAME_US;
        let span = span_us(&result.tracks);
        assert!((span - last_submitted).abs() <= FRAME_US, "span {} vs {}", span, last_submitted);

        assert_eq!(result.checksum, sha256_file(&result.file_path).unwrap());
        assert_eq!(metadata::read_metadata(&result.file_path).unwrap(), result.metadata);
        assert!(f.events.contains("stopped:video"));
        assert!(f.events.contains("stopped:audio"));
    }

    #[test]
    fn second_stop_returns_the_first_result() {
        let f = fixture("idempotent", |c| c.video = None);
        f.session.prepare().unwrap();
        f.session.start_recording().unwrap();
        let audio = f.session.audio_input().unwrap();
        for i in 0..5 {
            audio.push(&[0.2; 1024], 1, i * AUDIO_FRAME_US);
        }
        thread::sleep(Duration::from_millis(50));

        let first = f.session.stop_recording().unwrap();
        let second = f.session.stop_recording().unwrap();
        assert!(first.is_some());
        assert_eq!(first, second);
        let stopped = f.events.log.lock().iter().filter(|e| e.starts_with("stopped")).count();
        assert_eq!(stopped, 1);
    }

    #[test]
    fn concurrent_stops_agree() {
        let f = fixture("concurrent", |c| c.video = None);
        f.session.prepare().unwrap();
        f.session.start_recording().unwrap();
        f.session.audio_input().unwrap().push(&[0.3; 2048], 1, 0);
        thread::sleep(Duration::from_millis(30));

        let session = &f.session;
        let (a, b) = thread::scope(|s| {
            let a = s.spawn(|| session.stop_recording().unwrap());
            let b = s.spawn(|| session.stop_recording().unwrap());
            (a.join().unwrap(), b.join().unwrap())
        });
        assert!(a.is_some());
        assert_eq!(a, b);
    }

    #[test]
    fn unsupported_format_fails_without_a_file() {
        let f = fixture("unsupported", |c| {
            c.audio = None;
            if let Some(video) = c.video.as_mut() {
                video.mime = "video/x-unknown".into();
            }
        });
        let err = f.session.prepare().unwrap_err();
        assert!(matches!(err, RecorderError::CodecNotFound { .. }));
        assert_eq!(f.session.state(), SessionState::Failed(err));
        assert!(f.events.contains("error:video"));
        assert_eq!(files_in(&f.dir), 0);
    }

    #[test]
    fn failed_video_track_degrades_to_audio_only() {
        let f = fixture("degraded", |c| {
            if let Some(video) = c.video.as_mut() {
                video.mime = "video/x-unknown".into();
            }
        });
        f.session.prepare().unwrap();
        assert_eq!(f.session.active_tracks(), vec![TrackKind::Audio]);
        assert!(f.events.contains("error:video"));
        assert!(f.events.contains("prepared:audio"));

        f.session.start_recording().unwrap();
        f.session.audio_input().unwrap().push(&[0.1; 4096], 1, 0);
        thread::sleep(Duration::from_millis(50));

        let result = f.session.stop_recording().unwrap().unwrap();
        assert_eq!(result.tracks.len(), 1);
        assert_eq!(result.tracks[0].kind, TrackKind::Audio);
        assert_eq!(result.tracks[0].sample_count, 4);
    }

    #[test]
    fn stop_without_samples_leaves_no_file() {
        let f = fixture("empty", |_| {});
        f.session.prepare().unwrap();
        assert_eq!(files_in(&f.dir), 1);
        assert_eq!(f.session.stop_recording().unwrap(), None);
        assert_eq!(f.session.state(), SessionState::Completed(None));
        assert_eq!(files_in(&f.dir), 0);
    }

    #[test]
    fn lifecycle_calls_out_of_order_are_no_ops() {
        let f = fixture("order", |_| {});
        f.session.start_recording().unwrap();
        assert_eq!(f.session.state(), SessionState::Idle);
        assert_eq!(f.session.stop_recording().unwrap(), None);
        assert!(f.session.audio_input().is_none());

        f.session.prepare().unwrap();
        f.session.prepare().unwrap();
        assert_eq!(f.session.state(), SessionState::Prepared);
        f.session.stop_recording().unwrap();
        f.session.prepare().unwrap();
        assert!(f.session.state().is_terminal());
    }

    #[test]
    fn invalid_configuration_is_rejected() {
        let f = fixture("invalid", |c| {
            c.video = None;
            c.audio = None;
        });
        assert!(matches!(f.session.prepare(), Err(RecorderError::ConfigurationFailed(_))));
        assert_eq!(files_in(&f.dir), 0);
    }

    /// Stops the session it is attached to from its own `on_stopped`.
    #[derive(Default)]
    struct StopOnStopped {
        session: Mutex<Weak<RecordingSession>>,
        nested: Mutex<Vec<Result<Option<RecordingResult>, RecorderError>>>,
    }

    impl RecorderListener for StopOnStopped {
        fn on_prepared(&self, _track: TrackKind) {}

        fn on_stopped(&self, _track: TrackKind) {
            let session = self.session.lock().upgrade();
            if let Some(session) = session {
                let result = session.stop_recording();
                self.nested.lock().push(result);
            }
        }

        fn on_error(&self, _track: TrackKind, _error: &RecorderError) {}
    }

    #[test]
    fn listener_may_stop_the_session_from_on_stopped() {
        let dir = std::env::temp_dir().join(format!("media_recorder_session_{}_reentrant", std::process::id()));
        let listener = Arc::new(StopOnStopped::default());
        let session = Arc::new(RecordingSession::new(
            RecorderConfiguration {
                output_directory: dir.clone(),
                video: None,
                audio: Some(AudioEncoderConfig::default()),
                ..Default::default()
            },
            Arc::new(SoftwareCodecProvider::new()),
            Arc::new(MrecFormat),
            None,
            Some(listener.clone() as Arc<dyn RecorderListener>),
        ));
        *listener.session.lock() = Arc::downgrade(&session);

        session.prepare().unwrap();
        session.start_recording().unwrap();
        session.audio_input().unwrap().push(&[0.1; 2048], 1, 0);
        thread::sleep(Duration::from_millis(30));

        let (tx, rx) = std::sync::mpsc::channel();
        let stopper = Arc::clone(&session);
        let handle = thread::spawn(move || {
            tx.send(stopper.stop_recording()).ok();
        });
        let result = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("stop did not return")
            .unwrap();
        handle.join().unwrap();

        assert!(result.is_some());
        assert_eq!(*listener.nested.lock(), vec![Ok(None)]);
        assert_eq!(session.stop_recording().unwrap(), result);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn trailing_partial_audio_frame_is_recorded() {
        let f = fixture("partial_frame", |c| c.video = None);
        f.session.prepare().unwrap();
        f.session.start_recording().unwrap();
        assert_eq!(f.session.audio_input().unwrap().push(&[0.25; 1536], 1, 0), 1);
        thread::sleep(Duration::from_millis(30));

        let result = f.session.stop_recording().unwrap().unwrap();
        let contents = read_container(&result.file_path).unwrap();
        let audio = contents.track(TrackKind::Audio).unwrap();
        assert_eq!(audio.summary.sample_count, 2);
        let times: Vec<i64> = contents.samples_of(audio.index).map(|s| s.presentation_time_us).collect();
        assert_eq!(times, vec![0, AUDIO_FRAME_US]);
    }

    #[test]
    fn video_without_frame_source_is_reported() {
        let dir = std::env::temp_dir().join(format!("media_recorder_session_{}_nosource", std::process::id()));
        let events = Arc::new(Events::default());
        let listener: Arc<dyn RecorderListener> = events.clone();
        let session = RecordingSession::new(
            RecorderConfiguration {
                output_directory: dir.clone(),
                video: Some(VideoEncoderConfig::default()),
                audio: None,
                ..Default::default()
            },
            Arc::new(SoftwareCodecProvider::new()),
            Arc::new(MrecFormat),
            None,
            Some(listener),
        );
        assert!(matches!(session.prepare(), Err(RecorderError::ConfigurationFailed(_))));
        assert!(events.contains("error:video"));
        assert_eq!(files_in(&dir), 0);
    }
}
