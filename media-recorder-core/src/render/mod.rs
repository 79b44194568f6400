pub mod encode_stage;
pub mod matrix;
pub mod offscreen;
pub mod quad;
pub mod worker;
