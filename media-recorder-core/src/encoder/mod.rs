pub mod audio;
pub mod track;
pub mod video;
