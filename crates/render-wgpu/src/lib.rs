//! wgpu backend for the quad batch renderer.
//!
//! [`WgpuBackend`] implements `GfxBackend` for a window surface. The mesh
//! viewer uses [`MeshRenderer`] with an [`OrbitCamera`] directly.
//!
//! # Invariants
//! - Quad vertices arrive in device space; the quad shader does no transform.
//! - Every quad flush is its own queue submission.
//! - A lost or outdated surface is reconfigured and the frame skipped.

mod backend;
mod camera;
mod context;
mod mesh;
mod shaders;
mod texture;

pub use backend::WgpuBackend;
pub use camera::OrbitCamera;
pub use context::GpuContext;
pub use mesh::{Material, MeshHandle, MeshRenderer, MeshVertex, cube_mesh};
pub use texture::{DEPTH_FORMAT, GpuTexture};
