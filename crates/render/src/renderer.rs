use glam::Vec2;
use quadbatch_assets::{ImageData, TextureRegistry};
use quadbatch_common::{Color, TextureId, UvRect};
use std::collections::HashMap;
use std::path::Path;

use crate::RenderError;
use crate::backend::{GfxBackend, TextureDesc, TextureFilter, TextureWrap};
use crate::batch::{FrameStats, QuadBatcher};
use crate::config::RendererConfig;
use crate::vertex::quad_indices;

/// Where a [`BatchRenderer`] is in its frame cycle.
///
/// `Ready -> (Begun -> Ended)*`. Tear-down is [`BatchRenderer::destroy`],
/// which consumes the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Ready,
    Begun,
    Ended,
}

impl std::fmt::Display for FrameState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Ready => "ready",
            Self::Begun => "begun",
            Self::Ended => "ended",
        };
        f.write_str(s)
    }
}

/// 2D quad renderer driving one graphics backend.
///
/// Owns the backend, the per-texture batches and the frame state. A frame is
/// `clear`, `begin`, any number of quad submissions, then `end`, which
/// flushes every pending batch and presents.
///
/// Not thread-safe; one frame in flight at a time.
pub struct BatchRenderer<B: GfxBackend> {
    backend: B,
    config: RendererConfig,
    batcher: QuadBatcher,
    textures: TextureRegistry<(TextureFilter, TextureWrap), TextureId>,
    /// Live textures and how many `create_texture` calls returned each.
    texture_refs: HashMap<TextureId, usize>,
    white_texture: TextureId,
    state: FrameState,
    last_stats: FrameStats,
}

impl<B: GfxBackend> BatchRenderer<B> {
    /// Validate `config`, upload the shared quad index buffer and the 1x1
    /// white texture untextured quads sample from.
    pub fn create(mut backend: B, config: RendererConfig) -> Result<Self, RenderError> {
        config.validate()?;

        let indices = quad_indices(config.max_quads);
        backend.init_quad_pipeline(&indices, config.max_vertices())?;

        let sampling = (TextureFilter::Nearest, TextureWrap::Repeat);
        let mut textures = TextureRegistry::new();
        let (_, white_texture) =
            textures.get_or_insert_with(&ImageData::white_pixel(), sampling, |img| {
                backend.create_texture(&texture_desc(img, sampling.0, sampling.1))
            })?;
        let texture_refs = HashMap::from([(white_texture, 1)]);

        let mut batcher = QuadBatcher::new(&config, white_texture);
        let (width, height) = backend.surface_size();
        batcher.reset_for_new_frame(width, height);

        tracing::info!(
            "batch renderer created: {} quads per batch, viewport {width}x{height}",
            config.max_quads
        );

        Ok(Self {
            backend,
            config,
            batcher,
            textures,
            texture_refs,
            white_texture,
            state: FrameState::Ready,
            last_stats: FrameStats::default(),
        })
    }

    /// Release the renderer's GPU resources and hand the backend back.
    pub fn destroy(mut self) -> B {
        if self.state == FrameState::Begun {
            tracing::warn!(
                "destroying renderer mid-frame, dropping {} pending quads",
                self.batcher.pending_quads()
            );
        }
        self.backend.shutdown();
        tracing::info!("batch renderer destroyed");
        self.backend
    }

    pub fn clear(&mut self, color: Color) {
        self.backend.clear(color);
    }

    /// Clear to the configured clear color.
    pub fn clear_default(&mut self) {
        self.backend.clear(self.config.clear_color);
    }

    /// Start a frame: recompute the projection for the current viewport.
    pub fn begin(&mut self) -> Result<(), RenderError> {
        if self.state == FrameState::Begun {
            return Err(self.reject("begin"));
        }
        let (width, height) = self.backend.surface_size();
        self.batcher.reset_for_new_frame(width, height);
        self.state = FrameState::Begun;
        Ok(())
    }

    /// Flush every pending batch, present, and return the frame's counters.
    pub fn end(&mut self) -> Result<FrameStats, RenderError> {
        self.expect_begun("end")?;
        self.batcher.flush_all(&mut self.backend);
        self.backend.present();
        self.state = FrameState::Ended;

        let stats = self.batcher.take_stats();
        tracing::debug!("frame ended: {stats}");
        self.last_stats = stats;
        Ok(stats)
    }

    /// Flush pending batches without ending the frame.
    pub fn flush_all(&mut self) -> Result<(), RenderError> {
        self.expect_begun("flush_all")?;
        self.batcher.flush_all(&mut self.backend);
        Ok(())
    }

    /// Queue one quad. `None` draws with the white texture, i.e. solid `tint`.
    pub fn submit_quad(
        &mut self,
        texture: Option<TextureId>,
        position: Vec2,
        size: Vec2,
        tint: Color,
    ) -> Result<(), RenderError> {
        self.draw_sub_texture(texture, position, size, UvRect::FULL, tint)
    }

    pub fn draw_quad(
        &mut self,
        position: Vec2,
        size: Vec2,
        color: Color,
    ) -> Result<(), RenderError> {
        self.submit_quad(None, position, size, color)
    }

    pub fn draw_texture(
        &mut self,
        texture: TextureId,
        position: Vec2,
        size: Vec2,
        tint: Color,
    ) -> Result<(), RenderError> {
        self.submit_quad(Some(texture), position, size, tint)
    }

    /// Queue one quad sampling the `uv` region of `texture`.
    ///
    /// Fails with [`RenderError::UnknownTexture`] for an id this renderer did
    /// not create or has already destroyed.
    pub fn draw_sub_texture(
        &mut self,
        texture: Option<TextureId>,
        position: Vec2,
        size: Vec2,
        uv: UvRect,
        tint: Color,
    ) -> Result<(), RenderError> {
        self.expect_begun("submit_quad")?;
        if let Some(unknown) = texture.filter(|t| !self.texture_refs.contains_key(t)) {
            tracing::warn!("rejected quad with unknown texture {}", unknown.0);
            return Err(RenderError::UnknownTexture(unknown));
        }
        self.batcher
            .submit_quad_uv(&mut self.backend, texture, position, size, uv, tint);
        Ok(())
    }

    /// Upload `image` with nearest filtering and repeat wrapping.
    ///
    /// Identical pixel data with identical sampling maps to the texture
    /// created the first time; each such call needs its own `destroy_texture`.
    pub fn create_texture(&mut self, image: &ImageData) -> Result<TextureId, RenderError> {
        self.create_texture_with(image, TextureFilter::Nearest, TextureWrap::Repeat)
    }

    pub fn create_texture_with(
        &mut self,
        image: &ImageData,
        filter: TextureFilter,
        wrap: TextureWrap,
    ) -> Result<TextureId, RenderError> {
        let backend = &mut self.backend;
        let (asset, texture) = self.textures.get_or_insert_with(image, (filter, wrap), |img| {
            backend.create_texture(&texture_desc(img, filter, wrap))
        })?;
        let refs = self.texture_refs.entry(texture).or_insert(0);
        *refs += 1;
        tracing::debug!(
            "texture {} ({}x{}, {filter:?}/{wrap:?}) for asset {:#x}, {} refs",
            texture.0,
            image.width,
            image.height,
            asset.0,
            *refs
        );
        Ok(texture)
    }

    /// Decode an image file and upload it.
    pub fn load_texture(&mut self, path: impl AsRef<Path>) -> Result<TextureId, RenderError> {
        let image = ImageData::from_file(path)?;
        self.create_texture(&image)
    }

    /// Release one reference to a texture. The GPU texture and its batch go
    /// away with the last reference.
    ///
    /// Only allowed between frames, when every batch is guaranteed to be
    /// empty. The renderer's own reference to the white texture is never
    /// released.
    pub fn destroy_texture(&mut self, texture: TextureId) -> Result<(), RenderError> {
        if self.state == FrameState::Begun {
            return Err(self.reject("destroy_texture"));
        }
        let Some(refs) = self.texture_refs.get_mut(&texture) else {
            tracing::warn!("destroy of unknown texture {}", texture.0);
            return Err(RenderError::UnknownTexture(texture));
        };
        if texture == self.white_texture && *refs == 1 {
            tracing::warn!("refusing to destroy the default white texture");
            return Ok(());
        }
        *refs -= 1;
        if *refs > 0 {
            tracing::debug!("texture {} still has {} refs", texture.0, *refs);
            return Ok(());
        }
        self.texture_refs.remove(&texture);
        self.textures.remove_handle(texture);
        self.batcher.remove_batch(texture);
        self.backend.destroy_texture(texture);
        Ok(())
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn white_texture(&self) -> TextureId {
        self.white_texture
    }

    pub fn batcher(&self) -> &QuadBatcher {
        &self.batcher
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Counters of the most recently ended frame.
    pub fn stats(&self) -> FrameStats {
        self.last_stats
    }

    fn expect_begun(&self, op: &'static str) -> Result<(), RenderError> {
        if self.state == FrameState::Begun {
            Ok(())
        } else {
            Err(self.reject(op))
        }
    }

    fn reject(&self, op: &'static str) -> RenderError {
        tracing::warn!("rejected `{op}` in state {}", self.state);
        RenderError::InvalidState {
            op,
            state: self.state,
        }
    }
}

fn texture_desc(image: &ImageData, filter: TextureFilter, wrap: TextureWrap) -> TextureDesc<'_> {
    TextureDesc {
        width: image.width,
        height: image.height,
        pixels: &image.pixels,
        filter,
        wrap,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QuadAnchor;
    use crate::recording::{BackendCall, RecordingBackend};

    fn renderer(max_quads: usize) -> BatchRenderer<RecordingBackend> {
        BatchRenderer::create(
            RecordingBackend::new(800, 600),
            RendererConfig::with_max_quads(max_quads),
        )
        .unwrap()
    }

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    #[test]
    fn create_uploads_index_pattern_and_white_texture() {
        let r = renderer(3);
        assert_eq!(r.state(), FrameState::Ready);
        let calls = r.backend().calls();
        assert_eq!(
            calls[0],
            BackendCall::InitQuadPipeline {
                index_count: 18,
                max_vertices: 12,
            }
        );
        assert!(matches!(
            calls[1],
            BackendCall::CreateTexture {
                width: 1,
                height: 1,
                filter: TextureFilter::Nearest,
                wrap: TextureWrap::Repeat,
                ..
            }
        ));
        assert_eq!(&r.backend().indices()[12..], &[8, 9, 10, 10, 11, 8]);
        assert_eq!(r.batcher().batch_count(), 1);
    }

    #[test]
    fn create_rejects_invalid_config() {
        let res = BatchRenderer::create(
            RecordingBackend::new(800, 600),
            RendererConfig::with_max_quads(0),
        );
        assert!(matches!(res, Err(RenderError::Config(_))));
    }

    #[test]
    fn end_to_end_single_red_quad() {
        let mut r = renderer(10_000);
        r.clear(Color::rgb(0.1, 0.1, 0.1));
        r.begin().unwrap();
        r.draw_quad(Vec2::new(100.0, 100.0), Vec2::new(64.0, 64.0), Color::RED)
            .unwrap();
        let stats = r.end().unwrap();

        assert_eq!(stats.draw_calls, 1);
        assert_eq!(stats.quads, 1);
        let backend = r.backend();
        assert_eq!(backend.draw_count(), 1);
        assert_eq!(backend.present_count(), 1);

        let (texture, verts, index_count) = backend.draws().next().unwrap();
        assert_eq!(texture, r.white_texture());
        assert_eq!(index_count, 6);
        assert_eq!(verts.len(), 4);
        for v in verts {
            assert!((-1.0..=1.0).contains(&v.position[0]));
            assert!((-1.0..=1.0).contains(&v.position[1]));
            assert_eq!(v.color, [1.0, 0.0, 0.0, 1.0]);
        }
        // Centered on (100, 100): x spans 68..132 pixels.
        assert!(close(verts[0].position[0], 68.0 / 400.0 - 1.0));
        assert!(close(verts[1].position[0], 132.0 / 400.0 - 1.0));
    }

    #[test]
    fn one_texture_below_capacity_is_one_draw() {
        let mut r = renderer(100);
        let tex = r.create_texture(&ImageData::solid(2, 2, [9, 9, 9, 255])).unwrap();
        r.begin().unwrap();
        for i in 0..99 {
            r.draw_texture(tex, Vec2::splat(i as f32), Vec2::ONE, Color::WHITE)
                .unwrap();
        }
        assert_eq!(r.backend().draw_count(), 0);
        assert_eq!(r.batcher().batch(tex).unwrap().index_count(), 6 * 99);

        r.end().unwrap();
        let draws: Vec<_> = r.backend().draws().map(|(t, _, n)| (t, n)).collect();
        assert_eq!(draws, vec![(tex, 6 * 99)]);
    }

    #[test]
    fn max_plus_one_flushes_exactly_once() {
        let mut r = renderer(50);
        r.begin().unwrap();
        for _ in 0..51 {
            r.draw_quad(Vec2::ZERO, Vec2::ONE, Color::WHITE).unwrap();
        }
        assert_eq!(r.backend().draw_count(), 1);
        assert_eq!(r.batcher().batch(r.white_texture()).unwrap().quad_count(), 1);

        let stats = r.end().unwrap();
        assert_eq!(stats.auto_flushes, 1);
        let counts: Vec<_> = r.backend().draws().map(|(_, _, n)| n).collect();
        assert_eq!(counts, vec![300, 6]);
    }

    #[test]
    fn end_leaves_every_batch_empty() {
        let mut r = renderer(16);
        let a = r.create_texture(&ImageData::solid(1, 1, [1, 0, 0, 255])).unwrap();
        let b = r.create_texture(&ImageData::solid(1, 1, [0, 1, 0, 255])).unwrap();
        r.begin().unwrap();
        for i in 0..10 {
            let tex = if i % 2 == 0 { a } else { b };
            r.draw_texture(tex, Vec2::ZERO, Vec2::ONE, Color::WHITE).unwrap();
            r.draw_quad(Vec2::ZERO, Vec2::ONE, Color::GREEN).unwrap();
        }
        r.end().unwrap();

        assert_eq!(r.batcher().batch_count(), 3);
        for batch in r.batcher().batches() {
            assert!(batch.is_empty());
            assert_eq!(batch.index_count(), 0);
        }
        // Draws follow first-use order: default (used second) was created first.
        let order: Vec<_> = r.backend().draws().map(|(t, _, _)| t).collect();
        assert_eq!(order, vec![r.white_texture(), a, b]);
    }

    #[test]
    fn full_viewport_quad_spans_clip_space() {
        let config = RendererConfig {
            anchor: QuadAnchor::TopLeft,
            ..RendererConfig::default()
        };
        let mut r = BatchRenderer::create(RecordingBackend::new(1280, 720), config).unwrap();
        r.begin().unwrap();
        r.draw_quad(Vec2::ZERO, Vec2::new(1280.0, 720.0), Color::WHITE)
            .unwrap();
        r.end().unwrap();

        let (_, verts, _) = r.backend().draws().next().unwrap();
        // Top-left pixel maps to (-1, 1), bottom-right to (1, -1).
        assert!(close(verts[0].position[0], -1.0) && close(verts[0].position[1], 1.0));
        assert!(close(verts[2].position[0], 1.0) && close(verts[2].position[1], -1.0));
    }

    #[test]
    fn begin_tracks_viewport_resizes() {
        let mut r = renderer(8);
        r.backend_mut().set_surface_size(400, 200);
        r.begin().unwrap();
        r.draw_quad(Vec2::new(200.0, 100.0), Vec2::new(400.0, 200.0), Color::WHITE)
            .unwrap();
        r.end().unwrap();
        let (_, verts, _) = r.backend().draws().next().unwrap();
        assert!(close(verts[0].position[0], -1.0));
        assert!(close(verts[2].position[1], -1.0));
    }

    #[test]
    fn state_machine_rejects_misuse() {
        let mut r = renderer(8);
        assert!(matches!(
            r.draw_quad(Vec2::ZERO, Vec2::ONE, Color::WHITE),
            Err(RenderError::InvalidState { op: "submit_quad", state: FrameState::Ready })
        ));
        assert!(r.end().is_err());
        assert!(r.flush_all().is_err());

        r.begin().unwrap();
        assert!(matches!(
            r.begin(),
            Err(RenderError::InvalidState { op: "begin", state: FrameState::Begun })
        ));
        r.end().unwrap();
        assert_eq!(r.state(), FrameState::Ended);
        assert!(r.draw_quad(Vec2::ZERO, Vec2::ONE, Color::WHITE).is_err());

        // Ended -> Begun is a new frame.
        r.begin().unwrap();
        assert_eq!(r.state(), FrameState::Begun);
    }

    #[test]
    fn explicit_flush_mid_frame() {
        let mut r = renderer(8);
        r.begin().unwrap();
        r.draw_quad(Vec2::ZERO, Vec2::ONE, Color::WHITE).unwrap();
        r.flush_all().unwrap();
        assert_eq!(r.backend().draw_count(), 1);
        let stats = r.end().unwrap();
        // Nothing left to draw at end.
        assert_eq!(r.backend().draw_count(), 1);
        assert_eq!(stats.draw_calls, 1);
        assert_eq!(stats.auto_flushes, 0);
    }

    #[test]
    fn identical_images_share_a_texture() {
        let mut r = renderer(8);
        let img = ImageData::checkerboard(8, 2, [255; 4], [0, 0, 0, 255]);
        let a = r.create_texture(&img).unwrap();
        let b = r.create_texture(&img).unwrap();
        assert_eq!(a, b);
        // White pixel is already registered as the default texture.
        assert_eq!(r.create_texture(&ImageData::white_pixel()).unwrap(), r.white_texture());
    }

    #[test]
    fn same_image_with_other_sampling_gets_its_own_texture() {
        let mut r = renderer(8);
        let img = ImageData::checkerboard(8, 2, [255; 4], [0, 0, 0, 255]);
        let nearest = r
            .create_texture_with(&img, TextureFilter::Nearest, TextureWrap::Repeat)
            .unwrap();
        let linear = r
            .create_texture_with(&img, TextureFilter::Linear, TextureWrap::ClampToEdge)
            .unwrap();
        assert_ne!(nearest, linear);

        let user_uploads: Vec<_> = r
            .backend()
            .calls()
            .iter()
            .filter_map(|call| match call {
                BackendCall::CreateTexture {
                    texture,
                    filter,
                    wrap,
                    ..
                } if *texture != r.white_texture() => Some((*texture, *filter, *wrap)),
                _ => None,
            })
            .collect();
        assert_eq!(
            user_uploads,
            vec![
                (nearest, TextureFilter::Nearest, TextureWrap::Repeat),
                (linear, TextureFilter::Linear, TextureWrap::ClampToEdge),
            ]
        );
    }

    #[test]
    fn shared_texture_survives_until_last_destroy() {
        let mut r = renderer(8);
        let img = ImageData::solid(2, 2, [9, 9, 9, 255]);
        let first = r.create_texture(&img).unwrap();
        let second = r.create_texture(&img).unwrap();
        assert_eq!(first, second);

        r.destroy_texture(first).unwrap();
        assert!(!r.backend().calls().contains(&BackendCall::DestroyTexture(first)));
        r.begin().unwrap();
        r.draw_texture(second, Vec2::ZERO, Vec2::ONE, Color::WHITE).unwrap();
        r.end().unwrap();
        assert_eq!(r.backend().draw_count(), 1);

        r.destroy_texture(second).unwrap();
        assert!(r.backend().calls().contains(&BackendCall::DestroyTexture(second)));
        assert!(matches!(
            r.destroy_texture(second),
            Err(RenderError::UnknownTexture(t)) if t == second
        ));
    }

    #[test]
    fn draw_after_destroy_is_rejected() {
        let mut r = renderer(8);
        let tex = r.create_texture(&ImageData::solid(1, 1, [3, 3, 3, 255])).unwrap();
        r.destroy_texture(tex).unwrap();

        r.begin().unwrap();
        assert!(matches!(
            r.draw_texture(tex, Vec2::ZERO, Vec2::ONE, Color::WHITE),
            Err(RenderError::UnknownTexture(t)) if t == tex
        ));
        // Never issued by this renderer.
        assert!(matches!(
            r.draw_texture(TextureId(999), Vec2::ZERO, Vec2::ONE, Color::WHITE),
            Err(RenderError::UnknownTexture(TextureId(999)))
        ));
        let stats = r.end().unwrap();

        assert_eq!(stats.quads, 0);
        assert_eq!(r.backend().draw_count(), 0);
        assert!(r.batcher().batch(tex).is_none());
        // A rejected quad leaves the frame usable.
        assert_eq!(r.state(), FrameState::Ended);
    }

    #[test]
    fn load_missing_texture_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.png");
        let mut r = renderer(8);
        assert!(matches!(r.load_texture(&path), Err(RenderError::Asset(_))));
    }

    #[test]
    fn destroy_texture_between_frames() {
        let mut r = renderer(8);
        let tex = r.create_texture(&ImageData::solid(1, 1, [5, 5, 5, 255])).unwrap();
        r.begin().unwrap();
        r.draw_texture(tex, Vec2::ZERO, Vec2::ONE, Color::WHITE).unwrap();
        assert!(r.destroy_texture(tex).is_err());
        r.end().unwrap();

        r.destroy_texture(tex).unwrap();
        assert!(r.batcher().batch(tex).is_none());
        assert!(r.backend().calls().contains(&BackendCall::DestroyTexture(tex)));

        let white = r.white_texture();
        r.destroy_texture(white).unwrap();
        assert!(r.batcher().batch(white).is_some());
    }

    #[test]
    fn destroy_shuts_backend_down() {
        let mut r = renderer(8);
        r.begin().unwrap();
        r.end().unwrap();
        let backend = r.destroy();
        assert_eq!(backend.calls().last(), Some(&BackendCall::Shutdown));
    }

    #[test]
    fn clear_default_uses_config_color() {
        let mut r = renderer(8);
        r.clear_default();
        assert_eq!(
            r.backend().calls().last(),
            Some(&BackendCall::Clear(RendererConfig::default().clear_color))
        );
    }
}
