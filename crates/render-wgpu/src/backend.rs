use quadbatch_common::{Color, TextureId};
use quadbatch_render::{GfxBackend, RenderError, TextureDesc, TextureFilter, TextureWrap, Vertex};
use std::collections::HashMap;

use crate::context::GpuContext;
use crate::shaders;
use crate::texture::{GpuTexture, create_sampler, texture_bind_group_layout};

struct QuadBuffers {
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    max_vertices: usize,
}

struct Frame {
    surface_texture: wgpu::SurfaceTexture,
    view: wgpu::TextureView,
}

/// [`GfxBackend`] drawing batched quads to a window surface.
///
/// Each `draw_quads` writes the vertex buffer and submits its own command
/// buffer, so a batch flushed mid-frame is on the queue before the next one
/// overwrites the buffer. A requested clear is folded into the load op of the
/// frame's first pass.
pub struct WgpuBackend {
    ctx: GpuContext,
    pipeline: wgpu::RenderPipeline,
    texture_layout: wgpu::BindGroupLayout,
    samplers: HashMap<(TextureFilter, TextureWrap), wgpu::Sampler>,
    textures: HashMap<TextureId, GpuTexture>,
    next_texture: u64,
    buffers: Option<QuadBuffers>,
    frame: Option<Frame>,
    pending_clear: Option<Color>,
}

impl WgpuBackend {
    pub fn new(ctx: GpuContext) -> Self {
        let device = &ctx.device;
        let texture_layout = texture_bind_group_layout(device);

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("quad_pipeline_layout"),
            bind_group_layouts: &[&texture_layout],
            push_constant_ranges: &[],
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("quad_shader"),
            source: wgpu::ShaderSource::Wgsl(shaders::QUAD_SHADER.into()),
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("quad_pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_quad"),
                compilation_options: Default::default(),
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: std::mem::size_of::<Vertex>() as u64,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &wgpu::vertex_attr_array![
                        0 => Float32x3,
                        1 => Float32x2,
                        2 => Float32x4,
                    ],
                }],
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_quad"),
                compilation_options: Default::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: ctx.format(),
                    blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: Default::default(),
            multiview: None,
            cache: None,
        });

        Self {
            ctx,
            pipeline,
            texture_layout,
            samplers: HashMap::new(),
            textures: HashMap::new(),
            next_texture: 0,
            buffers: None,
            frame: None,
            pending_clear: None,
        }
    }

    pub fn context(&self) -> &GpuContext {
        &self.ctx
    }

    /// Reconfigure the surface; the next `begin` picks up the new size.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.frame = None;
        self.ctx.resize(width, height);
    }

    fn ensure_frame(&mut self) -> bool {
        if self.frame.is_some() {
            return true;
        }
        let Some(surface_texture) = self.ctx.acquire_frame() else {
            return false;
        };
        let view = surface_texture
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        self.frame = Some(Frame {
            surface_texture,
            view,
        });
        true
    }

    /// Log and return false when a quad flush for `texture` has nothing to
    /// draw with.
    fn can_draw(&self, texture: TextureId) -> bool {
        if self.buffers.is_none() {
            tracing::error!("draw_quads before init_quad_pipeline");
            return false;
        }
        if !self.textures.contains_key(&texture) {
            tracing::warn!("draw with unknown texture {}, skipped", texture.0);
            return false;
        }
        true
    }

    /// Run a pass that only applies the pending clear.
    fn flush_clear(&mut self) {
        let ready = self.pending_clear.is_some() && self.ensure_frame();
        let Some(load) = take_load(&mut self.pending_clear, ready) else {
            return;
        };
        let Some(frame) = &self.frame else {
            return;
        };
        let mut encoder = self
            .ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("clear_encoder"),
            });
        encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("clear_pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &frame.view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            ..Default::default()
        });
        self.ctx.queue.submit(std::iter::once(encoder.finish()));
    }
}

impl GfxBackend for WgpuBackend {
    fn init_quad_pipeline(
        &mut self,
        indices: &[u32],
        max_vertices: usize,
    ) -> Result<(), RenderError> {
        use wgpu::util::DeviceExt;

        let device = &self.ctx.device;
        let vertex_size = (max_vertices * std::mem::size_of::<Vertex>()) as u64;
        if vertex_size > device.limits().max_buffer_size {
            return Err(RenderError::Backend(format!(
                "vertex buffer of {vertex_size} bytes exceeds the device limit"
            )));
        }

        let vertex_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("quad_vertex_buffer"),
            size: vertex_size,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("quad_index_buffer"),
            contents: bytemuck::cast_slice(indices),
            usage: wgpu::BufferUsages::INDEX,
        });

        tracing::debug!(
            "quad buffers: {max_vertices} vertices, {} indices",
            indices.len()
        );
        self.buffers = Some(QuadBuffers {
            vertex_buffer,
            index_buffer,
            max_vertices,
        });
        Ok(())
    }

    fn create_texture(&mut self, desc: &TextureDesc<'_>) -> Result<TextureId, RenderError> {
        let expected = desc.width as usize * desc.height as usize * 4;
        if desc.width == 0 || desc.height == 0 || desc.pixels.len() != expected {
            return Err(RenderError::Backend(format!(
                "texture {}x{} needs {expected} bytes, got {}",
                desc.width,
                desc.height,
                desc.pixels.len()
            )));
        }

        let id = TextureId(self.next_texture);
        self.next_texture += 1;

        let device = &self.ctx.device;
        let sampler = self
            .samplers
            .entry((desc.filter, desc.wrap))
            .or_insert_with(|| create_sampler(device, desc.filter, desc.wrap));
        let texture = GpuTexture::upload(
            device,
            &self.ctx.queue,
            &self.texture_layout,
            sampler,
            desc.width,
            desc.height,
            desc.pixels,
            &format!("texture_{}", id.0),
        );
        self.textures.insert(id, texture);
        tracing::debug!("uploaded texture {} ({}x{})", id.0, desc.width, desc.height);
        Ok(id)
    }

    fn destroy_texture(&mut self, texture: TextureId) {
        if let Some(gpu) = self.textures.remove(&texture) {
            gpu.texture.destroy();
        }
    }

    fn surface_size(&self) -> (u32, u32) {
        self.ctx.size()
    }

    fn clear(&mut self, color: Color) {
        self.pending_clear = Some(color);
    }

    fn draw_quads(&mut self, texture: TextureId, vertices: &[Vertex], index_count: u32) {
        // A skipped flush must leave the frame's clear for the next pass.
        let ready = self.can_draw(texture) && self.ensure_frame();
        let Some(load) = take_load(&mut self.pending_clear, ready) else {
            return;
        };
        let (Some(buffers), Some(frame), Some(gpu_texture)) =
            (&self.buffers, &self.frame, self.textures.get(&texture))
        else {
            return;
        };
        debug_assert!(vertices.len() <= buffers.max_vertices);
        let vertices = &vertices[..vertices.len().min(buffers.max_vertices)];

        self.ctx
            .queue
            .write_buffer(&buffers.vertex_buffer, 0, bytemuck::cast_slice(vertices));

        let mut encoder = self
            .ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("quad_encoder"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("quad_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &frame.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                ..Default::default()
            });

            let vertex_bytes = std::mem::size_of_val(vertices) as u64;
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &gpu_texture.bind_group, &[]);
            pass.set_vertex_buffer(0, buffers.vertex_buffer.slice(..vertex_bytes));
            pass.set_index_buffer(buffers.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
            pass.draw_indexed(0..index_count, 0, 0..1);
        }
        self.ctx.queue.submit(std::iter::once(encoder.finish()));
    }

    fn present(&mut self) {
        self.flush_clear();
        if let Some(frame) = self.frame.take() {
            frame.surface_texture.present();
        }
    }

    fn shutdown(&mut self) {
        self.frame = None;
        for (_, gpu) in self.textures.drain() {
            gpu.texture.destroy();
        }
        if let Some(buffers) = self.buffers.take() {
            buffers.vertex_buffer.destroy();
            buffers.index_buffer.destroy();
        }
        tracing::info!("wgpu backend shut down");
    }
}

/// Load op for the next pass, or `None` when no pass will run.
///
/// The pending clear is consumed only by a pass that actually runs.
fn take_load(pending: &mut Option<Color>, ready: bool) -> Option<wgpu::LoadOp<wgpu::Color>> {
    if !ready {
        return None;
    }
    Some(match pending.take() {
        Some(c) => wgpu::LoadOp::Clear(wgpu::Color {
            r: c.r as f64,
            g: c.g as f64,
            b: c.b as f64,
            a: c.a as f64,
        }),
        None => wgpu::LoadOp::Load,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skipped_pass_keeps_pending_clear() {
        let mut pending = Some(Color::BLACK);
        assert!(take_load(&mut pending, false).is_none());
        assert_eq!(pending, Some(Color::BLACK));
    }

    #[test]
    fn first_pass_that_runs_takes_the_clear() {
        let mut pending = Some(Color::rgba(0.5, 0.25, 0.0, 1.0));
        let Some(wgpu::LoadOp::Clear(c)) = take_load(&mut pending, true) else {
            panic!("expected a clear load op");
        };
        assert_eq!((c.r, c.g, c.b, c.a), (0.5, 0.25, 0.0, 1.0));
        assert!(pending.is_none());
        // Later passes in the frame keep what was drawn.
        assert!(matches!(take_load(&mut pending, true), Some(wgpu::LoadOp::Load)));
    }
}
