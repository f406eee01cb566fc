//! Texture assets: decoding and content-addressed handles.
//!
//! Images are decoded into tightly packed RGBA8 buffers ready for upload.
//! The registry hands back the same backend handle for identical pixel data,
//! so a texture loaded twice is uploaded once.

mod image_data;
mod registry;

pub use image_data::ImageData;
pub use registry::{AssetId, TextureRegistry};

/// Errors from asset operations.
#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("image decode error: {0}")]
    Decode(#[from] image::ImageError),
    #[error("invalid image dimensions {width}x{height} for {len} bytes")]
    InvalidDimensions { width: u32, height: u32, len: usize },
}
