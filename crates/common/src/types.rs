use glam::{Mat4, Quat, Vec2, Vec3};
use serde::{Deserialize, Serialize};

/// Opaque texture identity handed out by a graphics backend.
///
/// Two textures are the same texture exactly when their ids compare equal.
/// Batches are keyed by this value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TextureId(pub u64);

/// Normalized RGBA color, each channel in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const WHITE: Self = Self::rgba(1.0, 1.0, 1.0, 1.0);
    pub const BLACK: Self = Self::rgba(0.0, 0.0, 0.0, 1.0);
    pub const RED: Self = Self::rgba(1.0, 0.0, 0.0, 1.0);
    pub const GREEN: Self = Self::rgba(0.0, 1.0, 0.0, 1.0);
    pub const BLUE: Self = Self::rgba(0.0, 0.0, 1.0, 1.0);
    pub const TRANSPARENT: Self = Self::rgba(0.0, 0.0, 0.0, 0.0);

    pub const fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self::rgba(r, g, b, 1.0)
    }

    /// Build a color from 8-bit channels.
    pub fn from_rgba8(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self::rgba(
            r as f32 / 255.0,
            g as f32 / 255.0,
            b as f32 / 255.0,
            a as f32 / 255.0,
        )
    }

    pub fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::WHITE
    }
}

impl From<[f32; 4]> for Color {
    fn from(c: [f32; 4]) -> Self {
        Self::rgba(c[0], c[1], c[2], c[3])
    }
}

/// Normalized texture-coordinate rectangle. `min` is the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UvRect {
    pub min: Vec2,
    pub max: Vec2,
}

impl UvRect {
    /// The whole texture.
    pub const FULL: Self = Self {
        min: Vec2::ZERO,
        max: Vec2::ONE,
    };

    /// Sub-region of an atlas given in pixels.
    ///
    /// Offsets are divided by the texture dimensions, never by the size of
    /// the quad the region is drawn on.
    pub fn from_pixels(x: f32, y: f32, w: f32, h: f32, texture_w: u32, texture_h: u32) -> Self {
        let tex = Vec2::new(texture_w.max(1) as f32, texture_h.max(1) as f32);
        Self {
            min: Vec2::new(x, y) / tex,
            max: Vec2::new(x + w, y + h) / tex,
        }
    }

    /// UVs in top-left, top-right, bottom-right, bottom-left order.
    pub fn corners(&self) -> [Vec2; 4] {
        [
            self.min,
            Vec2::new(self.max.x, self.min.y),
            self.max,
            Vec2::new(self.min.x, self.max.y),
        ]
    }
}

impl Default for UvRect {
    fn default() -> Self {
        Self::FULL
    }
}

/// Spatial transform: position, rotation, scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    pub fn new(position: Vec3, scale: Vec3) -> Self {
        Self {
            position,
            scale,
            ..Self::default()
        }
    }

    pub fn translate_to(&mut self, position: Vec3) {
        self.position = position;
    }

    /// Replace the rotation with `angle` radians around `axis`.
    ///
    /// A zero-length axis leaves the transform unrotated.
    pub fn rotate(&mut self, angle: f32, axis: Vec3) {
        self.rotation = match axis.try_normalize() {
            Some(axis) => Quat::from_axis_angle(axis, angle),
            None => Quat::IDENTITY,
        };
    }

    pub fn scale_to(&mut self, scale: Vec3) {
        self.scale = scale;
    }

    /// Translation * rotation * scale.
    pub fn model_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }
}
