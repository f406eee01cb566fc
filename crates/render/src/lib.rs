//! Backend-agnostic 2D quad batching.
//!
//! Quads are accumulated client-side into one batch per texture and drawn
//! with one indexed draw call per batch. A batch that fills up is flushed on
//! the spot; everything else is flushed when the frame ends.
//!
//! # Invariants
//! - A batch holds `6 * quads` indices and `4 * quads` vertices.
//! - Flushing never drops a submitted quad.
//! - Draw order inside a batch is submission order; batches are drawn in the
//!   order their texture was first used.
//!
//! The GPU sits behind [`GfxBackend`]. [`RecordingBackend`] implements it
//! without a GPU for tests and headless tooling.

mod backend;
mod batch;
mod config;
mod error;
mod recording;
mod renderer;
mod vertex;

pub use backend::{GfxBackend, TextureDesc, TextureFilter, TextureWrap};
pub use batch::{Batch, FrameStats, QuadBatcher};
pub use config::{ConfigError, DEFAULT_MAX_QUADS, QuadAnchor, RendererConfig};
pub use error::RenderError;
pub use recording::{BackendCall, RecordingBackend};
pub use renderer::{BatchRenderer, FrameState};
pub use vertex::{INDICES_PER_QUAD, VERTICES_PER_QUAD, Vertex, quad_indices};

pub use quadbatch_assets::ImageData;
pub use quadbatch_common::{Color, TextureId, UvRect};

pub fn crate_info() -> &'static str {
    "quadbatch-render v0.1.0"
}
