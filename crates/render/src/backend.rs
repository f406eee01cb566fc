use quadbatch_common::{Color, TextureId};

use crate::RenderError;
use crate::vertex::Vertex;

/// Texture sampling filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum TextureFilter {
    #[default]
    Nearest,
    Linear,
}

/// Texture addressing outside `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum TextureWrap {
    #[default]
    Repeat,
    ClampToEdge,
}

/// Decoded RGBA8 pixels plus sampling state for a new texture.
#[derive(Debug, Clone, Copy)]
pub struct TextureDesc<'a> {
    pub width: u32,
    pub height: u32,
    pub pixels: &'a [u8],
    pub filter: TextureFilter,
    pub wrap: TextureWrap,
}

/// The graphics context a batch renderer draws through.
///
/// Calls are synchronous. Only creation can fail; once a pipeline and its
/// textures exist, clearing, drawing and presenting always succeed from the
/// caller's point of view. Backends log and drop frames they cannot present.
pub trait GfxBackend {
    /// Create the static quad index buffer and a dynamic vertex buffer able to
    /// hold `max_vertices` vertices. Called once, before any other draw call.
    fn init_quad_pipeline(&mut self, indices: &[u32], max_vertices: usize)
    -> Result<(), RenderError>;

    fn create_texture(&mut self, desc: &TextureDesc<'_>) -> Result<TextureId, RenderError>;

    fn destroy_texture(&mut self, texture: TextureId);

    /// Current viewport size in pixels.
    fn surface_size(&self) -> (u32, u32);

    fn clear(&mut self, color: Color);

    /// Upload `vertices` and issue one indexed draw of `index_count` indices
    /// sampling `texture`.
    fn draw_quads(&mut self, texture: TextureId, vertices: &[Vertex], index_count: u32);

    fn present(&mut self);

    /// Release every GPU resource the backend still owns.
    fn shutdown(&mut self);
}
