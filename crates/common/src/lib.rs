//! Shared value types for the quadbatch renderers.
//!
//! Everything here is a plain `Copy` value with no GPU identity of its own.

mod types;

pub use types::{Color, TextureId, Transform, UvRect};
