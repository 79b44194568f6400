use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::matrix::Transform;
use super::quad::{CLEAR_COLOR, FRAGMENT_SHADER, TEXTURE_COORDS, VERTEX_COORDS, VERTEX_SHADER};
use crate::models::error::RecorderError;
use crate::traits::graphics::{
    FrameAvailableListener, FramebufferId, GlApi, ProgramId, QuadBuffers, Renderer, SharedContext, TextureId,
};

/// Holder of the (single) frame-available listener.
///
/// Keeps only a weak handle so a released encoder is never kept alive or
/// called back by the renderer.
#[derive(Clone, Default)]
pub struct FrameListenerSlot {
    inner: Arc<Mutex<Option<Weak<dyn FrameAvailableListener>>>>,
}

impl FrameListenerSlot {
    pub fn set(&self, listener: Weak<dyn FrameAvailableListener>) {
        *self.inner.lock() = Some(listener);
    }

    pub fn clear(&self) {
        *self.inner.lock() = None;
    }

    pub fn is_set(&self) -> bool {
        self.inner.lock().as_ref().is_some_and(|w| w.strong_count() > 0)
    }

    /// Call the listener, if still alive. Returns whether a listener ran.
    pub fn notify(&self, presentation_time_us: i64) -> bool {
        let listener = self.inner.lock().as_ref().and_then(Weak::upgrade);
        match listener {
            Some(listener) => {
                listener.on_frame_available(presentation_time_us);
                true
            }
            None => false,
        }
    }
}

/// What the video encoder needs from the upstream renderer.
#[derive(Clone)]
pub struct FrameSource {
    pub texture: TextureId,
    pub width: u32,
    pub height: u32,
    pub context: Arc<dyn SharedContext>,
    pub listener: FrameListenerSlot,
}

/// Renders the upstream picture into an offscreen framebuffer, notifies the
/// frame listener and blits the framebuffer texture to the default surface.
pub struct OffscreenRenderer {
    gl: Arc<dyn GlApi>,
    context: Arc<dyn SharedContext>,
    transform: Transform,
    program: Option<ProgramId>,
    quad: Option<QuadBuffers>,
    framebuffer: Option<FramebufferId>,
    texture: Option<TextureId>,
    default_framebuffer: FramebufferId,
    viewport: (u32, u32),
    listener: FrameListenerSlot,
}

impl OffscreenRenderer {
    pub fn new(context: Arc<dyn SharedContext>) -> Self {
        Self {
            gl: context.gl(),
            context,
            transform: Transform::default(),
            program: None,
            quad: None,
            framebuffer: None,
            texture: None,
            default_framebuffer: FramebufferId::DEFAULT,
            viewport: (0, 0),
            listener: FrameListenerSlot::default(),
        }
    }

    pub fn set_transform(&mut self, transform: Transform) {
        self.transform = transform;
    }

    pub fn set_frame_listener(&self, listener: Weak<dyn FrameAvailableListener>) {
        self.listener.set(listener);
    }

    pub fn viewport_size(&self) -> (u32, u32) {
        self.viewport
    }

    pub fn texture(&self) -> Option<TextureId> {
        self.texture
    }

    pub fn framebuffer(&self) -> Option<FramebufferId> {
        self.framebuffer
    }

    /// Snapshot for the video encoder. Available once the surface has a size.
    pub fn frame_source(&self) -> Result<FrameSource, RecorderError> {
        let texture = self
            .texture
            .ok_or_else(|| RecorderError::InvalidState("offscreen framebuffer not allocated".into()))?;
        Ok(FrameSource {
            texture,
            width: self.viewport.0,
            height: self.viewport.1,
            context: Arc::clone(&self.context),
            listener: self.listener.clone(),
        })
    }

    /// Bind the offscreen framebuffer so the upstream producer draws into it.
    pub fn on_pre_draw_frame(&mut self) {
        self.default_framebuffer = self.gl.bound_framebuffer();
        if let Some(framebuffer) = self.framebuffer {
            self.gl.bind_framebuffer(framebuffer);
        }
        self.gl.clear(CLEAR_COLOR);
    }

    fn allocate_framebuffer(&mut self, width: u32, height: u32) -> Result<(), RecorderError> {
        let framebuffer = match self.framebuffer {
            Some(framebuffer) => framebuffer,
            None => {
                let framebuffer = self.gl.create_framebuffer()?;
                self.framebuffer = Some(framebuffer);
                framebuffer
            }
        };
        if let Some(old) = self.texture.take() {
            self.gl.delete_texture(old);
        }

        self.gl.bind_framebuffer(framebuffer);
        let texture = self.gl.create_texture(width, height)?;
        self.texture = Some(texture);
        let attached = self.gl.attach_texture(framebuffer, texture);
        self.gl.bind_framebuffer(FramebufferId::DEFAULT);
        if let Err(e) = &attached {
            log::error!("offscreen framebuffer incomplete: {}", e);
        }
        attached
    }
}

impl Renderer for OffscreenRenderer {
    fn on_surface_created(&mut self) -> Result<(), RecorderError> {
        log::debug!("offscreen renderer: surface created");
        let program = self.gl.create_program(VERTEX_SHADER, FRAGMENT_SHADER)?;
        self.program = Some(program);
        self.quad = Some(self.gl.create_quad(&VERTEX_COORDS, &TEXTURE_COORDS)?);
        Ok(())
    }

    fn on_surface_changed(&mut self, width: u32, height: u32) -> Result<(), RecorderError> {
        log::debug!("offscreen renderer: surface changed {}x{}", width, height);
        self.gl.viewport(width, height);
        if self.viewport != (width, height) {
            self.viewport = (width, height);
            self.allocate_framebuffer(width, height)?;
        }
        Ok(())
    }

    fn on_draw_frame(&mut self, presentation_time_us: i64) {
        // Consumers read the framebuffer before it reaches the screen.
        self.listener.notify(presentation_time_us);

        self.gl.bind_framebuffer(self.default_framebuffer);
        if let (Some(program), Some(quad), Some(texture)) = (self.program, self.quad, self.texture) {
            self.gl.draw_textured_quad(program, quad, texture, &self.transform.matrix());
        }
        self.gl.bind_framebuffer(FramebufferId::DEFAULT);
    }

    fn on_surface_destroy(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::HeadlessContext;
    use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};

    #[derive(Default)]
    struct CountingListener {
        calls: AtomicU32,
        last: AtomicI64,
    }

    impl FrameAvailableListener for CountingListener {
        fn on_frame_available(&self, presentation_time_us: i64) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.last.store(presentation_time_us, Ordering::SeqCst);
        }
    }

    fn renderer() -> (Arc<HeadlessContext>, OffscreenRenderer) {
        let context = Arc::new(HeadlessContext::new());
        let renderer = OffscreenRenderer::new(context.clone());
        (context, renderer)
    }

    #[test]
    fn framebuffer_is_only_reallocated_on_size_change() {
        let (context, mut renderer) = renderer();
        renderer.on_surface_created().unwrap();
        renderer.on_surface_changed(640, 480).unwrap();
        let first = renderer.texture().unwrap();
        assert_eq!(context.stats().textures_created, 1);

        renderer.on_surface_changed(640, 480).unwrap();
        assert_eq!(renderer.texture(), Some(first));
        assert_eq!(context.stats().textures_created, 1);

        renderer.on_surface_changed(1280, 720).unwrap();
        assert_ne!(renderer.texture(), Some(first));
        assert_eq!(context.stats().textures_created, 2);
        assert_eq!(context.stats().framebuffers_created, 1);
        assert_eq!(context.stats().live_textures, 1);
        assert_eq!(renderer.viewport_size(), (1280, 720));
    }

    #[test]
    fn draw_notifies_before_blitting() {
        let (context, mut renderer) = renderer();
        renderer.on_surface_created().unwrap();
        renderer.on_surface_changed(320, 240).unwrap();

        let listener = Arc::new(CountingListener::default());
        let as_dyn: Arc<dyn FrameAvailableListener> = listener.clone();
        renderer.set_frame_listener(Arc::downgrade(&as_dyn));

        renderer.on_pre_draw_frame();
        renderer.on_draw_frame(40_000);

        assert_eq!(listener.calls.load(Ordering::SeqCst), 1);
        assert_eq!(listener.last.load(Ordering::SeqCst), 40_000);
        assert_eq!(context.stats().draw_calls, 1);
        assert_eq!(context.gl_handle().bound_framebuffer(), FramebufferId::DEFAULT);
    }

    #[test]
    fn dropped_listener_is_not_called() {
        let (_context, mut renderer) = renderer();
        renderer.on_surface_created().unwrap();
        renderer.on_surface_changed(320, 240).unwrap();

        let listener: Arc<dyn FrameAvailableListener> = Arc::new(CountingListener::default());
        renderer.set_frame_listener(Arc::downgrade(&listener));
        drop(listener);

        let source = renderer.frame_source().unwrap();
        assert!(!source.listener.is_set());
        assert!(!source.listener.notify(0));
        renderer.on_draw_frame(0);
    }

    #[test]
    fn frame_source_requires_a_sized_surface() {
        let (_context, mut renderer) = renderer();
        renderer.on_surface_created().unwrap();
        assert!(matches!(renderer.frame_source(), Err(RecorderError::InvalidState(_))));

        renderer.on_surface_changed(640, 480).unwrap();
        let source = renderer.frame_source().unwrap();
        assert_eq!((source.width, source.height), (640, 480));
    }
}
