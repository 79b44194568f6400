//! Headless graphics backend.
//!
//! Implements the graphics traits without a GPU: object handles are plain
//! counters and draw calls are recorded. Used by tests and by hosts that
//! only need the encode pipeline (e.g. synthetic sources).

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::models::error::RecorderError;
use crate::render::matrix::Mat4;
use crate::traits::codec::InputSurface;
use crate::traits::graphics::{
    FramebufferId, GlApi, GraphicsContext, ProgramId, QuadBuffers, SharedContext, TextureId, WindowSurface,
};

/// Snapshot of the objects and calls seen by a [`HeadlessGl`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GlStats {
    pub programs_created: u32,
    pub textures_created: u32,
    pub framebuffers_created: u32,
    pub quads_created: u32,
    pub live_programs: u32,
    pub live_textures: u32,
    pub live_framebuffers: u32,
    pub live_quads: u32,
    pub draw_calls: u64,
    pub last_drawn_texture: Option<TextureId>,
    pub contexts_created: u32,
    pub live_contexts: u32,
    pub live_surfaces: u32,
    pub swaps: u64,
}

#[derive(Default)]
struct GlState {
    stats: GlStats,
    bound: FramebufferId,
    programs: HashSet<u32>,
    textures: HashSet<u32>,
    framebuffers: HashSet<u32>,
    quads: HashSet<u32>,
    fail_programs: bool,
}

/// Recording [`GlApi`] implementation.
pub struct HeadlessGl {
    next_id: AtomicU32,
    state: Mutex<GlState>,
}

impl Default for HeadlessGl {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessGl {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU32::new(1),
            state: Mutex::new(GlState::default()),
        }
    }

    pub fn stats(&self) -> GlStats {
        self.state.lock().stats.clone()
    }

    /// Make subsequent `create_program` calls fail, as a broken shader would.
    pub fn set_fail_programs(&self, fail: bool) {
        self.state.lock().fail_programs = fail;
    }

    fn next(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

impl GlApi for HeadlessGl {
    fn create_program(&self, vertex_src: &str, fragment_src: &str) -> Result<ProgramId, RecorderError> {
        if vertex_src.is_empty() || fragment_src.is_empty() {
            return Err(RecorderError::GraphicsError("empty shader source".into()));
        }
        let id = self.next();
        let mut s = self.state.lock();
        if s.fail_programs {
            return Err(RecorderError::GraphicsError("program link failed".into()));
        }
        s.programs.insert(id);
        s.stats.programs_created += 1;
        s.stats.live_programs = s.programs.len() as u32;
        Ok(ProgramId(id))
    }

    fn delete_program(&self, program: ProgramId) {
        let mut s = self.state.lock();
        s.programs.remove(&program.0);
        s.stats.live_programs = s.programs.len() as u32;
    }

    fn create_quad(&self, vertices: &[f32], tex_coords: &[f32]) -> Result<QuadBuffers, RecorderError> {
        if vertices.len() != tex_coords.len() {
            return Err(RecorderError::GraphicsError("vertex / texture coordinate mismatch".into()));
        }
        let quad = QuadBuffers {
            vbo: self.next(),
            vao: self.next(),
        };
        let mut s = self.state.lock();
        s.quads.insert(quad.vao);
        s.stats.quads_created += 1;
        s.stats.live_quads = s.quads.len() as u32;
        Ok(quad)
    }

    fn delete_quad(&self, quad: QuadBuffers) {
        let mut s = self.state.lock();
        s.quads.remove(&quad.vao);
        s.stats.live_quads = s.quads.len() as u32;
    }

    fn create_framebuffer(&self) -> Result<FramebufferId, RecorderError> {
        let id = self.next();
        let mut s = self.state.lock();
        s.framebuffers.insert(id);
        s.stats.framebuffers_created += 1;
        s.stats.live_framebuffers = s.framebuffers.len() as u32;
        Ok(FramebufferId(id))
    }

    fn delete_framebuffer(&self, framebuffer: FramebufferId) {
        let mut s = self.state.lock();
        s.framebuffers.remove(&framebuffer.0);
        s.stats.live_framebuffers = s.framebuffers.len() as u32;
    }

    fn create_texture(&self, width: u32, height: u32) -> Result<TextureId, RecorderError> {
        if width == 0 || height == 0 {
            return Err(RecorderError::GraphicsError(format!("invalid texture size {}x{}", width, height)));
        }
        let id = self.next();
        let mut s = self.state.lock();
        s.textures.insert(id);
        s.stats.textures_created += 1;
        s.stats.live_textures = s.textures.len() as u32;
        Ok(TextureId(id))
    }

    fn delete_texture(&self, texture: TextureId) {
        let mut s = self.state.lock();
        s.textures.remove(&texture.0);
        s.stats.live_textures = s.textures.len() as u32;
    }

    fn attach_texture(&self, framebuffer: FramebufferId, texture: TextureId) -> Result<(), RecorderError> {
        let s = self.state.lock();
        if !s.framebuffers.contains(&framebuffer.0) || !s.textures.contains(&texture.0) {
            return Err(RecorderError::GraphicsError("framebuffer incomplete".into()));
        }
        Ok(())
    }

    fn bound_framebuffer(&self) -> FramebufferId {
        self.state.lock().bound
    }

    fn bind_framebuffer(&self, framebuffer: FramebufferId) {
        self.state.lock().bound = framebuffer;
    }

    fn viewport(&self, _width: u32, _height: u32) {}

    fn clear(&self, _rgba: [f32; 4]) {}

    fn draw_textured_quad(&self, _program: ProgramId, _quad: QuadBuffers, texture: TextureId, _mvp: &Mat4) {
        let mut s = self.state.lock();
        s.stats.draw_calls += 1;
        s.stats.last_drawn_texture = Some(texture);
    }
}

/// UI-side context of the headless backend.
pub struct HeadlessContext {
    gl: Arc<HeadlessGl>,
}

impl Default for HeadlessContext {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessContext {
    pub fn new() -> Self {
        Self {
            gl: Arc::new(HeadlessGl::new()),
        }
    }

    pub fn stats(&self) -> GlStats {
        self.gl.stats()
    }

    pub fn gl_handle(&self) -> Arc<HeadlessGl> {
        Arc::clone(&self.gl)
    }
}

impl SharedContext for HeadlessContext {
    fn create_shared_context(&self) -> Result<Box<dyn GraphicsContext>, RecorderError> {
        {
            let mut s = self.gl.state.lock();
            s.stats.contexts_created += 1;
            s.stats.live_contexts += 1;
        }
        Ok(Box::new(HeadlessGraphicsContext {
            gl: Arc::clone(&self.gl),
            released: false,
        }))
    }

    fn gl(&self) -> Arc<dyn GlApi> {
        self.gl.clone()
    }
}

struct HeadlessGraphicsContext {
    gl: Arc<HeadlessGl>,
    released: bool,
}

impl GraphicsContext for HeadlessGraphicsContext {
    fn create_window_surface(&mut self, target: Arc<dyn InputSurface>) -> Result<Box<dyn WindowSurface>, RecorderError> {
        if self.released {
            return Err(RecorderError::GraphicsError("context released".into()));
        }
        if target.is_released() {
            return Err(RecorderError::GraphicsError("target surface already released".into()));
        }
        self.gl.state.lock().stats.live_surfaces += 1;
        Ok(Box::new(HeadlessWindowSurface {
            gl: Arc::clone(&self.gl),
            target,
            presentation_time_us: 0,
            released: false,
        }))
    }

    fn gl(&self) -> Arc<dyn GlApi> {
        self.gl.clone()
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            let mut s = self.gl.state.lock();
            s.stats.live_contexts = s.stats.live_contexts.saturating_sub(1);
        }
    }
}

struct HeadlessWindowSurface {
    gl: Arc<HeadlessGl>,
    target: Arc<dyn InputSurface>,
    presentation_time_us: i64,
    released: bool,
}

impl WindowSurface for HeadlessWindowSurface {
    fn make_current(&mut self) -> Result<(), RecorderError> {
        if self.released {
            return Err(RecorderError::GraphicsError("surface released".into()));
        }
        Ok(())
    }

    fn set_presentation_time(&mut self, presentation_time_us: i64) {
        self.presentation_time_us = presentation_time_us;
    }

    fn swap_buffers(&mut self) -> Result<(), RecorderError> {
        if self.released {
            return Err(RecorderError::GraphicsError("surface released".into()));
        }
        self.target.queue_frame(self.presentation_time_us)?;
        self.gl.state.lock().stats.swaps += 1;
        Ok(())
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            let mut s = self.gl.state.lock();
            s.stats.live_surfaces = s.stats.live_surfaces.saturating_sub(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[derive(Default)]
    struct NullSurface {
        frames: Mutex<Vec<i64>>,
        released: AtomicBool,
    }

    impl InputSurface for NullSurface {
        fn queue_frame(&self, presentation_time_us: i64) -> Result<(), RecorderError> {
            self.frames.lock().push(presentation_time_us);
            Ok(())
        }

        fn release(&self) {
            self.released.store(true, Ordering::SeqCst);
        }

        fn is_released(&self) -> bool {
            self.released.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn swap_forwards_presentation_time() {
        let context = HeadlessContext::new();
        let target = Arc::new(NullSurface::default());
        let mut shared = context.create_shared_context().unwrap();
        let mut surface = shared.create_window_surface(target.clone()).unwrap();

        surface.make_current().unwrap();
        surface.set_presentation_time(1234);
        surface.swap_buffers().unwrap();

        assert_eq!(*target.frames.lock(), vec![1234]);
        assert_eq!(context.stats().swaps, 1);

        surface.release();
        surface.release();
        shared.release();
        let stats = context.stats();
        assert_eq!(stats.live_surfaces, 0);
        assert_eq!(stats.live_contexts, 0);
        assert!(surface.swap_buffers().is_err());
    }

    #[test]
    fn failing_programs() {
        let gl = HeadlessGl::new();
        gl.set_fail_programs(true);
        assert!(gl.create_program("v", "f").is_err());
        gl.set_fail_programs(false);
        assert!(gl.create_program("v", "f").is_ok());
    }

    #[test]
    fn released_target_is_rejected() {
        let context = HeadlessContext::new();
        let target = Arc::new(NullSurface::default());
        target.release();
        let mut shared = context.create_shared_context().unwrap();
        assert!(shared.create_window_surface(target).is_err());
    }
}
