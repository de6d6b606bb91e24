pub mod chunk;
pub mod error;
pub mod parallel_processor;
pub mod pixel;
pub mod pixel_buffer;
pub mod position;
pub mod smart_pixel;
