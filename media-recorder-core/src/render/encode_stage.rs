use std::sync::Arc;

use super::matrix::Transform;
use super::quad::{CLEAR_COLOR, FRAGMENT_SHADER, TEXTURE_COORDS, VERTEX_COORDS, VERTEX_SHADER};
use crate::models::error::RecorderError;
use crate::traits::graphics::{GlApi, ProgramId, QuadBuffers, Renderer, TextureId};

/// Redraws the upstream texture into whatever surface the caller has made
/// current (the encoder input surface).
///
/// Owns its program and quad buffers; `on_surface_destroy` deletes them so
/// repeated recordings do not leak GPU objects.
pub struct EncodeRenderStage {
    gl: Arc<dyn GlApi>,
    texture: TextureId,
    transform: Transform,
    program: Option<ProgramId>,
    quad: Option<QuadBuffers>,
}

impl EncodeRenderStage {
    pub fn new(gl: Arc<dyn GlApi>, texture: TextureId, transform: Transform) -> Self {
        Self {
            gl,
            texture,
            transform,
            program: None,
            quad: None,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.program.is_some() && self.quad.is_some()
    }
}

impl Renderer for EncodeRenderStage {
    fn on_surface_created(&mut self) -> Result<(), RecorderError> {
        self.program = Some(self.gl.create_program(VERTEX_SHADER, FRAGMENT_SHADER)?);
        self.quad = Some(self.gl.create_quad(&VERTEX_COORDS, &TEXTURE_COORDS)?);
        Ok(())
    }

    fn on_surface_changed(&mut self, width: u32, height: u32) -> Result<(), RecorderError> {
        self.gl.viewport(width, height);
        Ok(())
    }

    fn on_draw_frame(&mut self, _presentation_time_us: i64) {
        self.gl.clear(CLEAR_COLOR);
        if let (Some(program), Some(quad)) = (self.program, self.quad) {
            self.gl
                .draw_textured_quad(program, quad, self.texture, &self.transform.matrix());
        }
    }

    fn on_surface_destroy(&mut self) {
        if let Some(program) = self.program.take() {
            self.gl.delete_program(program);
            log::debug!("encode stage: deleted program {}", program.0);
        }
        if let Some(quad) = self.quad.take() {
            self.gl.delete_quad(quad);
            log::debug!("encode stage: deleted quad buffers vbo={} vao={}", quad.vbo, quad.vao);
        }
    }
}
