//! Bundled collaborators: a headless GL and a software codec.

pub mod headless;
pub mod software;
