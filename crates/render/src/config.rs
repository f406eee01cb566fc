use quadbatch_common::Color;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Quads per batch when no configuration says otherwise.
pub const DEFAULT_MAX_QUADS: usize = 10_000;

/// Where a submitted quad's `position` sits on the quad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuadAnchor {
    /// `position` is the quad's center; unit corners at +-0.5.
    #[default]
    Center,
    /// `position` is the quad's top-left pixel; unit corners at 0..1.
    TopLeft,
}

/// Errors from loading or validating a [`RendererConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Renderer creation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Capacity of a single batch. A full batch is flushed before the next
    /// quad is appended to it.
    pub max_quads: usize,
    pub anchor: QuadAnchor,
    pub clear_color: Color,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            max_quads: DEFAULT_MAX_QUADS,
            anchor: QuadAnchor::Center,
            clear_color: Color::rgb(0.1, 0.1, 0.1),
        }
    }
}

impl RendererConfig {
    pub fn with_max_quads(max_quads: usize) -> Self {
        Self {
            max_quads,
            ..Self::default()
        }
    }

    pub fn max_vertices(&self) -> usize {
        self.max_quads * 4
    }

    pub fn max_indices(&self) -> usize {
        self.max_quads * 6
    }

    /// Read a JSON configuration file. Absent fields keep their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_quads == 0 {
            return Err(ConfigError::Invalid("max_quads must be at least 1".into()));
        }
        // Indices address vertices with u32 and the index count itself is a u32.
        let fits = self
            .max_quads
            .checked_mul(6)
            .is_some_and(|n| u32::try_from(n).is_ok());
        if !fits {
            return Err(ConfigError::Invalid(format!(
                "max_quads {} overflows the u32 index range",
                self.max_quads
            )));
        }
        Ok(())
    }
}
