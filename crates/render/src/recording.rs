use quadbatch_common::{Color, TextureId};

use crate::RenderError;
use crate::backend::{GfxBackend, TextureDesc, TextureFilter, TextureWrap};
use crate::vertex::Vertex;

/// A call received by a [`RecordingBackend`].
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    InitQuadPipeline {
        index_count: usize,
        max_vertices: usize,
    },
    CreateTexture {
        texture: TextureId,
        width: u32,
        height: u32,
        filter: TextureFilter,
        wrap: TextureWrap,
    },
    DestroyTexture(TextureId),
    Clear(Color),
    Draw {
        texture: TextureId,
        vertices: Vec<Vertex>,
        index_count: u32,
    },
    Present,
    Shutdown,
}

/// GPU-less backend that records every call it receives.
///
/// Used by tests and the headless CLI to observe exactly what a renderer
/// would upload and draw.
#[derive(Debug)]
pub struct RecordingBackend {
    calls: Vec<BackendCall>,
    size: (u32, u32),
    next_texture: u64,
    indices: Vec<u32>,
}

impl RecordingBackend {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            calls: Vec::new(),
            size: (width, height),
            next_texture: 0,
            indices: Vec::new(),
        }
    }

    pub fn set_surface_size(&mut self, width: u32, height: u32) {
        self.size = (width, height);
    }

    pub fn calls(&self) -> &[BackendCall] {
        &self.calls
    }

    /// Forget everything recorded so far.
    pub fn take_calls(&mut self) -> Vec<BackendCall> {
        std::mem::take(&mut self.calls)
    }

    /// The index pattern passed to `init_quad_pipeline`.
    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    /// Every draw call as `(texture, vertices, index_count)`, in issue order.
    pub fn draws(&self) -> impl Iterator<Item = (TextureId, &[Vertex], u32)> {
        self.calls.iter().filter_map(|call| match call {
            BackendCall::Draw {
                texture,
                vertices,
                index_count,
            } => Some((*texture, vertices.as_slice(), *index_count)),
            _ => None,
        })
    }

    pub fn draw_count(&self) -> usize {
        self.draws().count()
    }

    pub fn present_count(&self) -> usize {
        self.calls
            .iter()
            .filter(|c| matches!(c, BackendCall::Present))
            .count()
    }
}

impl GfxBackend for RecordingBackend {
    fn init_quad_pipeline(
        &mut self,
        indices: &[u32],
        max_vertices: usize,
    ) -> Result<(), RenderError> {
        self.indices = indices.to_vec();
        self.calls.push(BackendCall::InitQuadPipeline {
            index_count: indices.len(),
            max_vertices,
        });
        Ok(())
    }

    fn create_texture(&mut self, desc: &TextureDesc<'_>) -> Result<TextureId, RenderError> {
        let expected = desc.width as usize * desc.height as usize * 4;
        if desc.pixels.len() != expected {
            return Err(RenderError::Backend(format!(
                "texture {}x{} needs {expected} bytes, got {}",
                desc.width,
                desc.height,
                desc.pixels.len()
            )));
        }
        let texture = TextureId(self.next_texture);
        self.next_texture += 1;
        self.calls.push(BackendCall::CreateTexture {
            texture,
            width: desc.width,
            height: desc.height,
            filter: desc.filter,
            wrap: desc.wrap,
        });
        Ok(texture)
    }

    fn destroy_texture(&mut self, texture: TextureId) {
        self.calls.push(BackendCall::DestroyTexture(texture));
    }

    fn surface_size(&self) -> (u32, u32) {
        self.size
    }

    fn clear(&mut self, color: Color) {
        self.calls.push(BackendCall::Clear(color));
    }

    fn draw_quads(&mut self, texture: TextureId, vertices: &[Vertex], index_count: u32) {
        self.calls.push(BackendCall::Draw {
            texture,
            vertices: vertices.to_vec(),
            index_count,
        });
    }

    fn present(&mut self) {
        self.calls.push(BackendCall::Present);
    }

    fn shutdown(&mut self) {
        self.calls.push(BackendCall::Shutdown);
    }
}
