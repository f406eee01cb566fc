use bytemuck::{Pod, Zeroable};

/// One corner of a batched quad, already in device space.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub uv: [f32; 2],
    pub color: [f32; 4],
}

pub const VERTICES_PER_QUAD: usize = 4;
pub const INDICES_PER_QUAD: usize = 6;

/// Index pattern for `quads` quads: `0,1,2, 2,3,0`, offset by 4 per quad.
pub fn quad_indices(quads: usize) -> Vec<u32> {
    let mut indices = Vec::with_capacity(quads * INDICES_PER_QUAD);
    for quad in 0..quads as u32 {
        let offset = quad * VERTICES_PER_QUAD as u32;
        indices.extend_from_slice(&[
            offset,
            offset + 1,
            offset + 2,
            offset + 2,
            offset + 3,
            offset,
        ]);
    }
    indices
}
