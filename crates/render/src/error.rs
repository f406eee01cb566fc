use quadbatch_assets::AssetError;
use quadbatch_common::TextureId;

use crate::config::ConfigError;
use crate::renderer::FrameState;

/// Errors surfaced by the batch renderer.
///
/// `InvalidState` and `UnknownTexture` are caller mistakes. The rest can only
/// happen while creating the renderer or uploading textures. Submitting and
/// flushing quads never fails for backend reasons.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("`{op}` is not allowed while the frame is {state}")]
    InvalidState { op: &'static str, state: FrameState },
    #[error("texture {} is not live in this renderer", .0.0)]
    UnknownTexture(TextureId),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("asset error: {0}")]
    Asset(#[from] AssetError),
    #[error("backend error: {0}")]
    Backend(String),
}
