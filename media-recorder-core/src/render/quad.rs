//! Full-screen quad geometry and the textured-quad shader pair.

pub const VERTEX_COORDS: [f32; 12] = [
    -1.0, -1.0, 0.0, //
    1.0, -1.0, 0.0, //
    -1.0, 1.0, 0.0, //
    1.0, 1.0, 0.0,
];

pub const TEXTURE_COORDS: [f32; 12] = [
    0.0, 1.0, 0.0, //
    1.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, //
    1.0, 0.0, 0.0,
];

pub const VERTEX_SHADER: &str = r#"#version 300 es
layout(location = 0) in vec4 a_position;
layout(location = 1) in vec2 a_texCoord;
uniform mat4 u_MVPMatrix;
out vec2 v_texCoord;
void main() {
    gl_Position = u_MVPMatrix * a_position;
    v_texCoord = a_texCoord;
}
"#;

pub const FRAGMENT_SHADER: &str = r#"#version 300 es
precision mediump float;
in vec2 v_texCoord;
layout(location = 0) out vec4 outColor;
uniform sampler2D s_texture;
void main() {
    outColor = texture(s_texture, v_texCoord);
}
"#;

/// Clear color of the offscreen and encoder passes.
pub const CLEAR_COLOR: [f32; 4] = [1.0, 1.0, 1.0, 1.0];
