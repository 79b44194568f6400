pub mod container_file;
pub mod metadata;
