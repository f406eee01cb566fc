use glam::{Mat4, Vec2, Vec3, Vec4};
use quadbatch_common::{Color, TextureId, UvRect};
use std::collections::HashMap;

use crate::backend::GfxBackend;
use crate::config::{QuadAnchor, RendererConfig};
use crate::vertex::{INDICES_PER_QUAD, VERTICES_PER_QUAD, Vertex};

/// Unit quad corners, top-left first, clockwise on screen.
const CENTERED_CORNERS: [Vec2; 4] = [
    Vec2::new(-0.5, -0.5),
    Vec2::new(0.5, -0.5),
    Vec2::new(0.5, 0.5),
    Vec2::new(-0.5, 0.5),
];

const TOP_LEFT_CORNERS: [Vec2; 4] = [
    Vec2::new(0.0, 0.0),
    Vec2::new(1.0, 0.0),
    Vec2::new(1.0, 1.0),
    Vec2::new(0.0, 1.0),
];

/// Quads sharing one bound texture, in submission order.
///
/// `index_count` always equals `6 * vertices.len() / 4` between flushes.
#[derive(Debug, Clone)]
pub struct Batch {
    texture: TextureId,
    vertices: Vec<Vertex>,
    index_count: u32,
}

impl Batch {
    fn new(texture: TextureId) -> Self {
        Self {
            texture,
            vertices: Vec::new(),
            index_count: 0,
        }
    }

    fn push_quad(&mut self, corners: [Vertex; 4]) {
        self.vertices.extend_from_slice(&corners);
        self.index_count += INDICES_PER_QUAD as u32;
    }

    fn clear(&mut self) {
        self.vertices.clear();
        self.index_count = 0;
    }

    pub fn texture(&self) -> TextureId {
        self.texture
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub fn quad_count(&self) -> usize {
        self.vertices.len() / VERTICES_PER_QUAD
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }
}

/// Counters for the work done since they were last taken.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Quads submitted.
    pub quads: usize,
    /// Indexed draw calls issued.
    pub draw_calls: usize,
    /// Flushes forced by a full batch rather than the end of the frame.
    pub auto_flushes: usize,
    pub vertices_uploaded: usize,
}

impl std::fmt::Display for FrameStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "quads={} draw_calls={} auto_flushes={} vertices={}",
            self.quads, self.draw_calls, self.auto_flushes, self.vertices_uploaded
        )
    }
}

/// Groups quad submissions into one batch per texture and flushes them
/// through a [`GfxBackend`].
///
/// Batches are kept in the order their texture was first used and are never
/// destroyed by a flush, only emptied.
#[derive(Debug)]
pub struct QuadBatcher {
    max_quads: usize,
    anchor: QuadAnchor,
    projection: Mat4,
    default_texture: TextureId,
    batches: Vec<Batch>,
    lookup: HashMap<TextureId, usize>,
    stats: FrameStats,
}

impl QuadBatcher {
    /// `default_texture` backs untextured quads; its batch exists up front.
    pub fn new(config: &RendererConfig, default_texture: TextureId) -> Self {
        let mut batcher = Self {
            max_quads: config.max_quads,
            anchor: config.anchor,
            projection: Mat4::IDENTITY,
            default_texture,
            batches: Vec::new(),
            lookup: HashMap::new(),
            stats: FrameStats::default(),
        };
        batcher.batch_index(default_texture);
        batcher
    }

    /// Recompute the pixel-space projection: origin top-left, Y down.
    ///
    /// Pending batch contents are left alone.
    pub fn reset_for_new_frame(&mut self, width: u32, height: u32) {
        self.projection =
            Mat4::orthographic_rh_gl(0.0, width as f32, height as f32, 0.0, -1.0, 1.0);
    }

    pub fn projection(&self) -> Mat4 {
        self.projection
    }

    pub fn default_texture(&self) -> TextureId {
        self.default_texture
    }

    /// Append one quad covering the whole texture.
    pub fn submit_quad<B: GfxBackend>(
        &mut self,
        backend: &mut B,
        texture: Option<TextureId>,
        position: Vec2,
        size: Vec2,
        tint: Color,
    ) {
        self.submit_quad_uv(backend, texture, position, size, UvRect::FULL, tint);
    }

    /// Append one quad sampling `uv` of its texture.
    ///
    /// `None` selects the default batch. A batch already holding `max_quads`
    /// quads is flushed before the new quad goes in.
    pub fn submit_quad_uv<B: GfxBackend>(
        &mut self,
        backend: &mut B,
        texture: Option<TextureId>,
        position: Vec2,
        size: Vec2,
        uv: UvRect,
        tint: Color,
    ) {
        let texture = texture.unwrap_or(self.default_texture);
        let index = self.batch_index(texture);

        if self.batches[index].quad_count() >= self.max_quads {
            tracing::debug!(
                "batch for texture {} full at {} quads, flushing",
                texture.0,
                self.max_quads
            );
            Self::flush_batch(&mut self.batches[index], backend, &mut self.stats);
            self.stats.auto_flushes += 1;
        }

        let corners = self.quad_vertices(position, size, uv, tint);
        self.batches[index].push_quad(corners);
        self.stats.quads += 1;
    }

    /// Draw and empty every non-empty batch, in first-use order.
    pub fn flush_all<B: GfxBackend>(&mut self, backend: &mut B) {
        for batch in &mut self.batches {
            Self::flush_batch(batch, backend, &mut self.stats);
        }
    }

    /// Return the counters gathered since the last call and reset them.
    pub fn take_stats(&mut self) -> FrameStats {
        std::mem::take(&mut self.stats)
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    pub fn batches(&self) -> &[Batch] {
        &self.batches
    }

    pub fn batch(&self, texture: TextureId) -> Option<&Batch> {
        self.lookup.get(&texture).map(|&i| &self.batches[i])
    }

    pub fn batch_count(&self) -> usize {
        self.batches.len()
    }

    /// Quads waiting across all batches.
    pub fn pending_quads(&self) -> usize {
        self.batches.iter().map(Batch::quad_count).sum()
    }

    /// Drop the batch for `texture`, returning whatever it still held.
    ///
    /// The default batch is never removed.
    pub fn remove_batch(&mut self, texture: TextureId) -> Option<Batch> {
        if texture == self.default_texture {
            return None;
        }
        let index = self.lookup.remove(&texture)?;
        let batch = self.batches.remove(index);
        for slot in self.lookup.values_mut() {
            if *slot > index {
                *slot -= 1;
            }
        }
        Some(batch)
    }

    fn batch_index(&mut self, texture: TextureId) -> usize {
        if let Some(&index) = self.lookup.get(&texture) {
            return index;
        }
        let index = self.batches.len();
        self.batches.push(Batch::new(texture));
        self.lookup.insert(texture, index);
        tracing::debug!("new batch {index} for texture {}", texture.0);
        index
    }

    fn quad_vertices(&self, position: Vec2, size: Vec2, uv: UvRect, tint: Color) -> [Vertex; 4] {
        let mvp = self.projection
            * Mat4::from_translation(position.extend(0.0))
            * Mat4::from_scale(Vec3::new(size.x, size.y, 1.0));
        let unit = match self.anchor {
            QuadAnchor::Center => CENTERED_CORNERS,
            QuadAnchor::TopLeft => TOP_LEFT_CORNERS,
        };
        let uvs = uv.corners();
        let color = tint.to_array();

        std::array::from_fn(|i| {
            let p = mvp * Vec4::new(unit[i].x, unit[i].y, 0.0, 1.0);
            Vertex {
                position: p.truncate().to_array(),
                uv: uvs[i].to_array(),
                color,
            }
        })
    }

    fn flush_batch<B: GfxBackend>(batch: &mut Batch, backend: &mut B, stats: &mut FrameStats) {
        if batch.is_empty() {
            return;
        }
        backend.draw_quads(batch.texture, &batch.vertices, batch.index_count);
        stats.draw_calls += 1;
        stats.vertices_uploaded += batch.vertices.len();
        tracing::trace!(
            "flushed {} quads for texture {}",
            batch.quad_count(),
            batch.texture.0
        );
        batch.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::RecordingBackend;

    const WHITE_TEX: TextureId = TextureId(0);

    fn batcher(max_quads: usize) -> (QuadBatcher, RecordingBackend) {
        let mut batcher = QuadBatcher::new(&RendererConfig::with_max_quads(max_quads), WHITE_TEX);
        batcher.reset_for_new_frame(800, 600);
        (batcher, RecordingBackend::new(800, 600))
    }

    fn quad(batcher: &mut QuadBatcher, backend: &mut RecordingBackend, tex: Option<u64>) {
        batcher.submit_quad(
            backend,
            tex.map(TextureId),
            Vec2::new(10.0, 10.0),
            Vec2::splat(4.0),
            Color::WHITE,
        );
    }

    #[test]
    fn default_batch_exists_up_front() {
        let (batcher, _) = batcher(8);
        assert_eq!(batcher.batch_count(), 1);
        assert_eq!(batcher.batches()[0].texture(), WHITE_TEX);
        assert!(batcher.batch(WHITE_TEX).unwrap().is_empty());
    }

    #[test]
    fn below_capacity_never_flushes() {
        let (mut batcher, mut backend) = batcher(8);
        for _ in 0..7 {
            quad(&mut batcher, &mut backend, None);
        }
        assert_eq!(backend.draw_count(), 0);
        let batch = batcher.batch(WHITE_TEX).unwrap();
        assert_eq!(batch.quad_count(), 7);
        assert_eq!(batch.index_count(), 42);
        assert_eq!(batch.vertices().len(), 28);
    }

    #[test]
    fn overflow_flushes_once_then_starts_fresh() {
        let (mut batcher, mut backend) = batcher(4);
        for _ in 0..5 {
            quad(&mut batcher, &mut backend, Some(3));
        }
        assert_eq!(backend.draw_count(), 1);
        let (tex, verts, count) = backend.draws().next().unwrap();
        assert_eq!(tex, TextureId(3));
        assert_eq!(verts.len(), 16);
        assert_eq!(count, 24);

        let batch = batcher.batch(TextureId(3)).unwrap();
        assert_eq!(batch.quad_count(), 1);
        assert_eq!(batch.index_count(), 6);
        assert_eq!(batcher.stats().auto_flushes, 1);
    }

    #[test]
    fn flush_all_empties_everything_and_skips_empty() {
        let (mut batcher, mut backend) = batcher(16);
        quad(&mut batcher, &mut backend, Some(1));
        quad(&mut batcher, &mut backend, Some(2));
        quad(&mut batcher, &mut backend, Some(1));

        batcher.flush_all(&mut backend);
        // The default batch was empty and produced no draw.
        let draws: Vec<_> = backend.draws().map(|(t, _, n)| (t, n)).collect();
        assert_eq!(draws, vec![(TextureId(1), 12), (TextureId(2), 6)]);
        for batch in batcher.batches() {
            assert!(batch.is_empty());
            assert_eq!(batch.index_count(), 0);
        }
        assert_eq!(batcher.pending_quads(), 0);
    }

    #[test]
    fn alternating_textures_share_two_batches() {
        let (mut batcher, mut backend) = batcher(64);
        for i in 0..20 {
            quad(&mut batcher, &mut backend, Some(if i % 2 == 0 { 10 } else { 11 }));
        }
        // Default batch plus A and B, in first-use order.
        let order: Vec<_> = batcher.batches().iter().map(Batch::texture).collect();
        assert_eq!(order, vec![WHITE_TEX, TextureId(10), TextureId(11)]);
        assert_eq!(batcher.batch(TextureId(10)).unwrap().quad_count(), 10);
    }

    #[test]
    fn submission_order_is_preserved() {
        let (mut batcher, mut backend) = batcher(8);
        batcher.submit_quad(&mut backend, None, Vec2::new(100.0, 0.0), Vec2::ONE, Color::RED);
        batcher.submit_quad(&mut backend, None, Vec2::new(200.0, 0.0), Vec2::ONE, Color::BLUE);
        batcher.flush_all(&mut backend);

        let (_, verts, _) = backend.draws().next().unwrap();
        assert_eq!(verts[0].color, Color::RED.to_array());
        assert_eq!(verts[4].color, Color::BLUE.to_array());
        assert!(verts[0].position[0] < verts[4].position[0]);
    }

    #[test]
    fn reset_keeps_pending_quads() {
        let (mut batcher, mut backend) = batcher(8);
        quad(&mut batcher, &mut backend, None);
        batcher.reset_for_new_frame(1024, 768);
        assert_eq!(batcher.pending_quads(), 1);
    }

    #[test]
    fn unit_uvs_ignore_screen_position() {
        let (mut batcher, mut backend) = batcher(8);
        batcher.submit_quad(
            &mut backend,
            Some(TextureId(5)),
            Vec2::new(300.0, 200.0),
            Vec2::new(50.0, 25.0),
            Color::WHITE,
        );
        let uvs: Vec<_> = batcher
            .batch(TextureId(5))
            .unwrap()
            .vertices()
            .iter()
            .map(|v| v.uv)
            .collect();
        assert_eq!(uvs, vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]]);
    }

    #[test]
    fn atlas_region_uvs() {
        let (mut batcher, mut backend) = batcher(8);
        let uv = UvRect::from_pixels(16.0, 16.0, 16.0, 16.0, 64, 64);
        batcher.submit_quad_uv(
            &mut backend,
            Some(TextureId(5)),
            Vec2::ZERO,
            Vec2::splat(32.0),
            uv,
            Color::WHITE,
        );
        let verts = batcher.batch(TextureId(5)).unwrap().vertices();
        assert_eq!(verts[0].uv, [0.25, 0.25]);
        assert_eq!(verts[2].uv, [0.5, 0.5]);
    }

    #[test]
    fn centered_quad_corners_in_device_space() {
        let (mut batcher, mut backend) = batcher(8);
        // Centered on the viewport, covering it entirely.
        batcher.submit_quad(
            &mut backend,
            None,
            Vec2::new(400.0, 300.0),
            Vec2::new(800.0, 600.0),
            Color::WHITE,
        );
        let verts = batcher.batch(WHITE_TEX).unwrap().vertices();
        let expected = [[-1.0, 1.0], [1.0, 1.0], [1.0, -1.0], [-1.0, -1.0]];
        for (v, e) in verts.iter().zip(expected) {
            assert!((v.position[0] - e[0]).abs() < 1e-5, "{v:?}");
            assert!((v.position[1] - e[1]).abs() < 1e-5, "{v:?}");
        }
    }

    #[test]
    fn remove_batch_reindexes() {
        let (mut batcher, mut backend) = batcher(8);
        quad(&mut batcher, &mut backend, Some(1));
        quad(&mut batcher, &mut backend, Some(2));
        quad(&mut batcher, &mut backend, Some(3));

        let removed = batcher.remove_batch(TextureId(2)).unwrap();
        assert_eq!(removed.quad_count(), 1);
        assert_eq!(batcher.batch_count(), 3);
        assert_eq!(batcher.batch(TextureId(3)).unwrap().texture(), TextureId(3));
        assert!(batcher.remove_batch(WHITE_TEX).is_none());
        assert!(batcher.remove_batch(TextureId(2)).is_none());

        quad(&mut batcher, &mut backend, Some(3));
        assert_eq!(batcher.batch(TextureId(3)).unwrap().quad_count(), 2);
    }

    #[test]
    fn stats_accumulate_until_taken() {
        let (mut batcher, mut backend) = batcher(2);
        for _ in 0..5 {
            quad(&mut batcher, &mut backend, None);
        }
        batcher.flush_all(&mut backend);
        let stats = batcher.take_stats();
        assert_eq!(
            stats,
            FrameStats {
                quads: 5,
                draw_calls: 3,
                auto_flushes: 2,
                vertices_uploaded: 20,
            }
        );
        assert_eq!(batcher.stats(), FrameStats::default());
    }
}
