pub mod codec;
pub mod container;
pub mod graphics;
pub mod listener;
