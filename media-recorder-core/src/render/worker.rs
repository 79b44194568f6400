use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::models::error::RecorderError;
use crate::traits::codec::InputSurface;
use crate::traits::graphics::{GraphicsContext, Renderer, SharedContext, WindowSurface};

/// Lifecycle of a [`RenderWorker`] thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Running,
    Exiting,
    Terminated,
}

/// Receives a notification after every frame swapped into the encoder surface.
pub trait FrameSink: Send + Sync {
    /// Returns whether the sink still accepts frames.
    fn frame_rendered(&self) -> bool;
}

struct WorkerControl {
    state: WorkerState,
    pending: u32,
    latest_pts_us: i64,
    exit: bool,
    redraws: u64,
}

struct WorkerShared {
    control: Mutex<WorkerControl>,
    cond: Condvar,
}

/// Everything the worker thread takes ownership of when it starts.
struct WorkerSetup {
    context: Arc<dyn SharedContext>,
    stage: Box<dyn Renderer>,
    target: Arc<dyn InputSurface>,
    owner: Weak<dyn FrameSink>,
    width: u32,
    height: u32,
    wait_timeout: Duration,
}

/// Dedicated thread that redraws the shared texture into the encoder's
/// input surface.
///
/// Render requests are coalesced into a counter: a burst of requests that
/// arrives while a draw is in progress results in a single follow-up draw
/// of the latest picture.
pub struct RenderWorker {
    shared: Arc<WorkerShared>,
    setup: Option<WorkerSetup>,
    handle: Option<thread::JoinHandle<()>>,
}

impl RenderWorker {
    pub fn new(
        context: Arc<dyn SharedContext>,
        stage: Box<dyn Renderer>,
        target: Arc<dyn InputSurface>,
        owner: Weak<dyn FrameSink>,
        size: (u32, u32),
        wait_timeout: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(WorkerShared {
                control: Mutex::new(WorkerControl {
                    state: WorkerState::Idle,
                    pending: 0,
                    latest_pts_us: 0,
                    exit: false,
                    redraws: 0,
                }),
                cond: Condvar::new(),
            }),
            setup: Some(WorkerSetup {
                context,
                stage,
                target,
                owner,
                width: size.0,
                height: size.1,
                wait_timeout,
            }),
            handle: None,
        }
    }

    /// Spawn the worker thread. A second call is a no-op.
    pub fn start(&mut self) -> Result<(), RecorderError> {
        let Some(setup) = self.setup.take() else {
            return Ok(());
        };
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("encoder-render-worker".into())
            .spawn(move || run(shared, setup))
            .map_err(|e| RecorderError::Unknown(format!("failed to spawn render worker: {}", e)))?;
        self.handle = Some(handle);
        Ok(())
    }

    /// Ask for one redraw of the picture presented at `presentation_time_us`.
    pub fn request_render(&self, presentation_time_us: i64) {
        let mut c = self.shared.control.lock();
        if c.exit {
            return;
        }
        c.pending = c.pending.saturating_add(1);
        c.latest_pts_us = presentation_time_us;
        self.shared.cond.notify_all();
    }

    /// Ask the thread to tear down and terminate. Does not wait.
    pub fn exit(&self) {
        let mut c = self.shared.control.lock();
        c.exit = true;
        self.shared.cond.notify_all();
    }

    /// Wait until the thread has terminated. Called on the worker thread
    /// itself (the last owner dropped from a frame callback), it detaches
    /// instead; the thread still exits once `exit` was requested.
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() == thread::current().id() {
                log::debug!("render worker: join from its own thread, detaching");
                return;
            }
            if handle.join().is_err() {
                log::error!("render worker panicked");
                self.shared.control.lock().state = WorkerState::Terminated;
            }
        }
    }

    pub fn state(&self) -> WorkerState {
        self.shared.control.lock().state
    }

    pub fn redraw_count(&self) -> u64 {
        self.shared.control.lock().redraws
    }

    pub fn pending_requests(&self) -> u32 {
        self.shared.control.lock().pending
    }
}

impl Drop for RenderWorker {
    fn drop(&mut self) {
        self.exit();
        self.join();
    }
}

fn init_surface(
    setup: &WorkerSetup,
) -> Result<(Box<dyn GraphicsContext>, Box<dyn WindowSurface>), RecorderError> {
    let mut context = setup.context.create_shared_context()?;
    match context.create_window_surface(Arc::clone(&setup.target)) {
        Ok(mut surface) => {
            if let Err(e) = surface.make_current() {
                surface.release();
                context.release();
                return Err(e);
            }
            Ok((context, surface))
        }
        Err(e) => {
            context.release();
            Err(e)
        }
    }
}

fn run(shared: Arc<WorkerShared>, mut setup: WorkerSetup) {
    shared.control.lock().state = WorkerState::Running;

    let (mut context, mut surface) = match init_surface(&setup) {
        Ok(pair) => pair,
        Err(e) => {
            log::error!("render worker: graphics init failed: {}", e);
            shared.control.lock().state = WorkerState::Terminated;
            return;
        }
    };

    let mut stage_ready = true;
    if let Err(e) = setup.stage.on_surface_created() {
        log::error!("render worker: stage setup failed: {}", e);
        stage_ready = false;
    } else if let Err(e) = setup.stage.on_surface_changed(setup.width, setup.height) {
        log::error!("render worker: stage resize failed: {}", e);
    }

    let mut owner = Some(setup.owner.clone());
    loop {
        let job = {
            let mut c = shared.control.lock();
            if c.exit {
                break;
            }
            if c.pending > 0 {
                c.pending = 0;
                Some(c.latest_pts_us)
            } else {
                shared.cond.wait_for(&mut c, setup.wait_timeout);
                None
            }
        };

        let Some(pts) = job else {
            continue;
        };
        if !stage_ready {
            continue;
        }

        if let Err(e) = surface.make_current() {
            log::warn!("render worker: make current failed: {}", e);
            continue;
        }
        setup.stage.on_draw_frame(pts);
        surface.set_presentation_time(pts);
        if let Err(e) = surface.swap_buffers() {
            log::warn!("render worker: swap failed: {}", e);
            continue;
        }
        shared.control.lock().redraws += 1;

        if let Some(sink) = owner.as_ref().and_then(Weak::upgrade) {
            sink.frame_rendered();
        }
    }

    shared.control.lock().state = WorkerState::Exiting;
    setup.stage.on_surface_destroy();
    surface.release();
    context.release();
    owner.take();
    shared.control.lock().state = WorkerState::Terminated;
    log::debug!("render worker terminated");
}
