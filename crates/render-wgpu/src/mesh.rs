use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use quadbatch_assets::ImageData;
use quadbatch_common::{Color, TextureId, Transform};
use quadbatch_render::{TextureFilter, TextureWrap};
use std::collections::HashMap;
use std::ops::Range;
use wgpu::util::DeviceExt;

use crate::shaders;
use crate::texture::{
    DEPTH_FORMAT, GpuTexture, create_depth_texture, create_sampler, texture_bind_group_layout,
};

const MAX_INSTANCES: u32 = 4096;

#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
struct Uniforms {
    view_proj: [[f32; 4]; 4],
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct MeshVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
struct InstanceData {
    model_0: [f32; 4],
    model_1: [f32; 4],
    model_2: [f32; 4],
    model_3: [f32; 4],
    tint: [f32; 4],
}

impl InstanceData {
    fn new(model: Mat4, tint: Color) -> Self {
        let cols = model.to_cols_array_2d();
        Self {
            model_0: cols[0],
            model_1: cols[1],
            model_2: cols[2],
            model_3: cols[3],
            tint: tint.to_array(),
        }
    }
}

/// Surface appearance of a mesh instance.
#[derive(Debug, Clone, Copy, Default)]
pub struct Material {
    pub tint: Color,
    /// `None` samples the built-in white texture.
    pub texture: Option<TextureId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshHandle(usize);

struct GpuMesh {
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    index_count: u32,
}

type DrawKey = (MeshHandle, TextureId);

/// Unit cube centered on the origin, one quad per face so each face gets
/// its own normal and full UV range.
pub fn cube_mesh() -> (Vec<MeshVertex>, Vec<u16>) {
    let p = 0.5_f32;
    let faces: [([f32; 3], [[f32; 3]; 4]); 6] = [
        ([0.0, 0.0, 1.0], [[-p, -p, p], [p, -p, p], [p, p, p], [-p, p, p]]),
        ([0.0, 0.0, -1.0], [[p, -p, -p], [-p, -p, -p], [-p, p, -p], [p, p, -p]]),
        ([1.0, 0.0, 0.0], [[p, -p, p], [p, -p, -p], [p, p, -p], [p, p, p]]),
        ([-1.0, 0.0, 0.0], [[-p, -p, -p], [-p, -p, p], [-p, p, p], [-p, p, -p]]),
        ([0.0, 1.0, 0.0], [[-p, p, p], [p, p, p], [p, p, -p], [-p, p, -p]]),
        ([0.0, -1.0, 0.0], [[-p, -p, -p], [p, -p, -p], [p, -p, p], [-p, -p, p]]),
    ];
    let uvs = [[0.0, 1.0], [1.0, 1.0], [1.0, 0.0], [0.0, 0.0]];

    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for (face, (normal, corners)) in faces.iter().enumerate() {
        let base = (face * 4) as u16;
        for (corner, uv) in corners.iter().zip(uvs) {
            vertices.push(MeshVertex {
                position: *corner,
                normal: *normal,
                uv,
            });
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 3, base]);
    }
    (vertices, indices)
}

/// Collapse a sorted key list into one instance range per distinct key.
fn draw_ranges(keys: &[DrawKey]) -> Vec<(DrawKey, Range<u32>)> {
    let mut ranges: Vec<(DrawKey, Range<u32>)> = Vec::new();
    for (i, key) in keys.iter().enumerate() {
        let i = i as u32;
        match ranges.last_mut() {
            Some((last, range)) if last == key => range.end = i + 1,
            _ => ranges.push((*key, i..i + 1)),
        }
    }
    ranges
}

/// Instanced, depth-tested mesh renderer for the 3D viewer.
///
/// Draws are collected between [`begin`](Self::begin) and
/// [`end`](Self::end), grouped by mesh and texture, and issued as one
/// instanced draw per group.
pub struct MeshRenderer {
    pipeline: wgpu::RenderPipeline,
    uniform_buffer: wgpu::Buffer,
    uniform_bind_group: wgpu::BindGroup,
    texture_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    meshes: Vec<GpuMesh>,
    textures: HashMap<TextureId, GpuTexture>,
    next_texture: u64,
    white_texture: TextureId,
    instance_buffer: wgpu::Buffer,
    depth_view: wgpu::TextureView,
    draws: Vec<(DrawKey, InstanceData)>,
}

impl MeshRenderer {
    pub fn new(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        surface_format: wgpu::TextureFormat,
        width: u32,
        height: u32,
    ) -> Self {
        let uniform_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("mesh_uniform_buffer"),
            contents: bytemuck::bytes_of(&Uniforms {
                view_proj: Mat4::IDENTITY.to_cols_array_2d(),
            }),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("mesh_uniform_layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        let uniform_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("mesh_uniform_bind_group"),
            layout: &uniform_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
        });

        let texture_layout = texture_bind_group_layout(device);

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("mesh_pipeline_layout"),
            bind_group_layouts: &[&uniform_layout, &texture_layout],
            push_constant_ranges: &[],
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("mesh_shader"),
            source: wgpu::ShaderSource::Wgsl(shaders::MESH_SHADER.into()),
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("mesh_pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_mesh"),
                compilation_options: Default::default(),
                buffers: &[
                    wgpu::VertexBufferLayout {
                        array_stride: std::mem::size_of::<MeshVertex>() as u64,
                        step_mode: wgpu::VertexStepMode::Vertex,
                        attributes: &wgpu::vertex_attr_array![
                            0 => Float32x3,
                            1 => Float32x3,
                            2 => Float32x2,
                        ],
                    },
                    wgpu::VertexBufferLayout {
                        array_stride: std::mem::size_of::<InstanceData>() as u64,
                        step_mode: wgpu::VertexStepMode::Instance,
                        attributes: &wgpu::vertex_attr_array![
                            3 => Float32x4,
                            4 => Float32x4,
                            5 => Float32x4,
                            6 => Float32x4,
                            7 => Float32x4,
                        ],
                    },
                ],
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_mesh"),
                compilation_options: Default::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: surface_format,
                    blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                cull_mode: Some(wgpu::Face::Back),
                ..Default::default()
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::Less,
                stencil: Default::default(),
                bias: Default::default(),
            }),
            multisample: Default::default(),
            multiview: None,
            cache: None,
        });

        let instance_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("mesh_instance_buffer"),
            size: MAX_INSTANCES as u64 * std::mem::size_of::<InstanceData>() as u64,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let sampler = create_sampler(device, TextureFilter::Linear, TextureWrap::Repeat);
        let white = ImageData::white_pixel();
        let white_gpu = GpuTexture::upload(
            device,
            queue,
            &texture_layout,
            &sampler,
            white.width,
            white.height,
            &white.pixels,
            "mesh_white_texture",
        );
        let white_texture = TextureId(0);
        let mut textures = HashMap::new();
        textures.insert(white_texture, white_gpu);

        Self {
            pipeline,
            uniform_buffer,
            uniform_bind_group,
            texture_layout,
            sampler,
            meshes: Vec::new(),
            textures,
            next_texture: 1,
            white_texture,
            instance_buffer,
            depth_view: create_depth_texture(device, width, height),
            draws: Vec::new(),
        }
    }

    pub fn create_mesh(
        &mut self,
        device: &wgpu::Device,
        vertices: &[MeshVertex],
        indices: &[u16],
    ) -> MeshHandle {
        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("mesh_vertex_buffer"),
            contents: bytemuck::cast_slice(vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("mesh_index_buffer"),
            contents: bytemuck::cast_slice(indices),
            usage: wgpu::BufferUsages::INDEX,
        });
        self.meshes.push(GpuMesh {
            vertex_buffer,
            index_buffer,
            index_count: indices.len() as u32,
        });
        MeshHandle(self.meshes.len() - 1)
    }

    pub fn create_cube(&mut self, device: &wgpu::Device) -> MeshHandle {
        let (vertices, indices) = cube_mesh();
        self.create_mesh(device, &vertices, &indices)
    }

    /// Upload an image with linear filtering and repeat wrap.
    pub fn create_texture(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        image: &ImageData,
    ) -> TextureId {
        let id = TextureId(self.next_texture);
        self.next_texture += 1;
        let gpu = GpuTexture::upload(
            device,
            queue,
            &self.texture_layout,
            &self.sampler,
            image.width,
            image.height,
            &image.pixels,
            &format!("mesh_texture_{}", id.0),
        );
        self.textures.insert(id, gpu);
        id
    }

    pub fn resize(&mut self, device: &wgpu::Device, width: u32, height: u32) {
        self.depth_view = create_depth_texture(device, width, height);
    }

    /// Start a draw list for a frame seen through `view_proj`.
    pub fn begin(&mut self, queue: &wgpu::Queue, view_proj: Mat4) {
        self.draws.clear();
        queue.write_buffer(
            &self.uniform_buffer,
            0,
            bytemuck::bytes_of(&Uniforms {
                view_proj: view_proj.to_cols_array_2d(),
            }),
        );
    }

    pub fn submit(&mut self, mesh: MeshHandle, material: &Material, transform: &Transform) {
        if self.draws.len() >= MAX_INSTANCES as usize {
            tracing::warn!("mesh draw list full, instance dropped");
            return;
        }
        let texture = match material.texture {
            Some(t) if self.textures.contains_key(&t) => t,
            _ => self.white_texture,
        };
        self.draws.push((
            (mesh, texture),
            InstanceData::new(transform.model_matrix(), material.tint),
        ));
    }

    /// Draw everything submitted since `begin` into `view`.
    pub fn end(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        view: &wgpu::TextureView,
        clear_color: Color,
    ) {
        self.draws.sort_by_key(|(key, _)| *key);
        let keys: Vec<DrawKey> = self.draws.iter().map(|(key, _)| *key).collect();
        let instances: Vec<InstanceData> = self.draws.iter().map(|(_, data)| *data).collect();
        if !instances.is_empty() {
            queue.write_buffer(&self.instance_buffer, 0, bytemuck::cast_slice(&instances));
        }

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("mesh_encoder"),
        });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("mesh_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: clear_color.r as f64,
                            g: clear_color.g as f64,
                            b: clear_color.b as f64,
                            a: clear_color.a as f64,
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                ..Default::default()
            });

            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &self.uniform_bind_group, &[]);
            pass.set_vertex_buffer(1, self.instance_buffer.slice(..));
            for ((mesh, texture), range) in draw_ranges(&keys) {
                let (Some(gpu_mesh), Some(gpu_texture)) =
                    (self.meshes.get(mesh.0), self.textures.get(&texture))
                else {
                    continue;
                };
                pass.set_bind_group(1, &gpu_texture.bind_group, &[]);
                pass.set_vertex_buffer(0, gpu_mesh.vertex_buffer.slice(..));
                pass.set_index_buffer(gpu_mesh.index_buffer.slice(..), wgpu::IndexFormat::Uint16);
                pass.draw_indexed(0..gpu_mesh.index_count, 0, range);
            }
        }
        queue.submit(std::iter::once(encoder.finish()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn cube_has_four_vertices_per_face() {
        let (vertices, indices) = cube_mesh();
        assert_eq!(vertices.len(), 24);
        assert_eq!(indices.len(), 36);
        assert!(indices.iter().all(|&i| (i as usize) < vertices.len()));
    }

    #[test]
    fn cube_faces_wind_outward() {
        let (vertices, indices) = cube_mesh();
        for tri in indices.chunks(3) {
            let [a, b, c] = [0, 1, 2].map(|k| Vec3::from(vertices[tri[k] as usize].position));
            let n = Vec3::from(vertices[tri[0] as usize].normal);
            // Counter-clockwise seen from outside.
            assert!((b - a).cross(c - a).dot(n) > 0.0);
        }
    }

    #[test]
    fn cube_face_uvs_cover_texture() {
        let (vertices, _) = cube_mesh();
        for face in vertices.chunks(4) {
            let uvs: Vec<[f32; 2]> = face.iter().map(|v| v.uv).collect();
            assert_eq!(uvs, vec![[0.0, 1.0], [1.0, 1.0], [1.0, 0.0], [0.0, 0.0]]);
        }
    }

    #[test]
    fn ranges_group_runs() {
        let a = (MeshHandle(0), TextureId(0));
        let b = (MeshHandle(0), TextureId(2));
        let c = (MeshHandle(1), TextureId(0));
        let ranges = draw_ranges(&[a, a, a, b, c, c]);
        assert_eq!(ranges, vec![(a, 0..3), (b, 3..4), (c, 4..6)]);
        assert!(draw_ranges(&[]).is_empty());
    }

    #[test]
    fn material_defaults_to_white_untextured() {
        let m = Material::default();
        assert_eq!(m.tint, Color::WHITE);
        assert!(m.texture.is_none());
    }
}
