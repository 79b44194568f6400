use std::sync::Arc;

use crate::models::error::RecorderError;
use crate::render::matrix::Mat4;
use crate::traits::codec::InputSurface;

/// Linked shader program handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ProgramId(pub u32);

/// Texture handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TextureId(pub u32);

/// Framebuffer handle. `FramebufferId::DEFAULT` is the window surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FramebufferId(pub u32);

impl FramebufferId {
    pub const DEFAULT: Self = Self(0);
}

/// Vertex buffer + vertex array of a full-screen quad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct QuadBuffers {
    pub vbo: u32,
    pub vao: u32,
}

/// Draw primitives the renderers need from the graphics API.
///
/// Calls act on whichever context is current on the calling thread.
pub trait GlApi: Send + Sync {
    fn create_program(&self, vertex_src: &str, fragment_src: &str) -> Result<ProgramId, RecorderError>;

    fn delete_program(&self, program: ProgramId);

    /// Upload interleaved position / texture coordinates into a VBO + VAO.
    fn create_quad(&self, vertices: &[f32], tex_coords: &[f32]) -> Result<QuadBuffers, RecorderError>;

    fn delete_quad(&self, quad: QuadBuffers);

    fn create_framebuffer(&self) -> Result<FramebufferId, RecorderError>;

    fn delete_framebuffer(&self, framebuffer: FramebufferId);

    /// Allocate an RGBA texture of the given size.
    fn create_texture(&self, width: u32, height: u32) -> Result<TextureId, RecorderError>;

    fn delete_texture(&self, texture: TextureId);

    /// Attach `texture` as color attachment and check completeness.
    fn attach_texture(&self, framebuffer: FramebufferId, texture: TextureId) -> Result<(), RecorderError>;

    fn bound_framebuffer(&self) -> FramebufferId;

    fn bind_framebuffer(&self, framebuffer: FramebufferId);

    fn viewport(&self, width: u32, height: u32);

    fn clear(&self, rgba: [f32; 4]);

    fn draw_textured_quad(&self, program: ProgramId, quad: QuadBuffers, texture: TextureId, mvp: &Mat4);
}

/// Graphics context owned by the UI thread, able to spawn sibling contexts
/// that share its textures.
pub trait SharedContext: Send + Sync {
    fn create_shared_context(&self) -> Result<Box<dyn GraphicsContext>, RecorderError>;

    fn gl(&self) -> Arc<dyn GlApi>;
}

/// A context private to one thread.
pub trait GraphicsContext: Send {
    /// Wrap a codec input surface as a drawable window surface.
    fn create_window_surface(&mut self, target: Arc<dyn InputSurface>) -> Result<Box<dyn WindowSurface>, RecorderError>;

    fn gl(&self) -> Arc<dyn GlApi>;

    fn release(&mut self);
}

/// Drawable surface bound to a [`GraphicsContext`].
pub trait WindowSurface: Send {
    fn make_current(&mut self) -> Result<(), RecorderError>;

    fn set_presentation_time(&mut self, presentation_time_us: i64);

    /// Present the drawn frame to the surface's consumer.
    fn swap_buffers(&mut self) -> Result<(), RecorderError>;

    fn release(&mut self);
}

/// Surface lifecycle hooks of a renderer.
pub trait Renderer: Send {
    fn on_surface_created(&mut self) -> Result<(), RecorderError>;

    fn on_surface_changed(&mut self, width: u32, height: u32) -> Result<(), RecorderError>;

    fn on_draw_frame(&mut self, presentation_time_us: i64);

    fn on_surface_destroy(&mut self);
}

/// Notified synchronously on the render thread whenever a frame was produced.
/// Implementations must not block.
pub trait FrameAvailableListener: Send + Sync {
    fn on_frame_available(&self, presentation_time_us: i64);
}
