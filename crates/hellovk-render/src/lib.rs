// SPDX-License-Identifier: CEPL-1.0
//! Host-facing contracts shared by the backend and the platform glue.
use std::sync::Arc;

use anyhow::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use serde::Deserialize;
use thiserror::Error;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// A native window the backend can create a presentation surface for.
pub trait NativeWindow: HasWindowHandle + HasDisplayHandle {
    /// Current drawable size in physical pixels.
    fn inner_size(&self) -> RenderSize;
}

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("asset not found: {0}")]
    NotFound(String),
    #[error("failed to read asset {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Read-only bundle of assets addressed by logical path ("shaders/shader.vert.spv").
pub trait AssetSource {
    fn read(&self, path: &str) -> Result<Vec<u8>, AssetError>;
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("image decode failed: {0}")]
    Malformed(String),
    #[error("decoded image has zero extent")]
    Empty,
    #[error("pixel buffer is {actual} bytes, expected {expected}")]
    SizeMismatch { expected: usize, actual: usize },
}

/// Tightly packed RGBA8 pixels, row-major, top row first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl DecodedImage {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self, DecodeError> {
        if width == 0 || height == 0 {
            return Err(DecodeError::Empty);
        }
        let expected = width as usize * height as usize * 4;
        if pixels.len() != expected {
            return Err(DecodeError::SizeMismatch {
                expected,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// 1x1 image of a single color.
    pub fn solid(rgba: [u8; 4]) -> Self {
        Self {
            width: 1,
            height: 1,
            pixels: rgba.to_vec(),
        }
    }

    pub fn texel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * 4;
        let p = self.pixels.get(i..i + 4)?;
        Some([p[0], p[1], p[2], p[3]])
    }
}

/// Turns compressed image bytes into RGBA8, forcing four channels.
pub trait ImageDecoder {
    fn decode_rgba(&self, bytes: &[u8]) -> Result<DecodedImage, DecodeError>;
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct RendererConfig {
    /// Enables the Khronos validation layer and the debug messenger.
    pub enable_validation: bool,
    pub clear_color: [f32; 4],
    pub vertex_shader: String,
    pub fragment_shader: String,
    pub texture: String,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            enable_validation: false,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            vertex_shader: "shaders/shader.vert.spv".into(),
            fragment_shader: "shaders/shader.frag.spv".into(),
            texture: "texture.png".into(),
        }
    }
}

pub trait Renderer {
    /// First call initializes everything; later calls replace the surface.
    fn bind_window(
        &mut self,
        window: Arc<dyn NativeWindow>,
        assets: Arc<dyn AssetSource>,
    ) -> Result<()>;

    /// Draws one frame. Does nothing until a window is bound.
    fn render(&mut self) -> Result<()>;

    /// The surface was resized or rotated; rebuild the swapchain before the next draw.
    fn surface_changed(&mut self);

    fn set_clear_color(&mut self, rgba: [f32; 4]);

    fn is_initialized(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkerboard() -> DecodedImage {
        let w = [255, 255, 255, 255];
        let b = [0, 0, 0, 255];
        let pixels = [w, b, b, w].concat();
        DecodedImage::new(2, 2, pixels).unwrap()
    }

    #[test]
    fn rejects_mismatched_buffer() {
        let err = DecodedImage::new(2, 2, vec![0; 15]).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::SizeMismatch {
                expected: 16,
                actual: 15
            }
        ));
        assert!(matches!(
            DecodedImage::new(0, 4, vec![]),
            Err(DecodeError::Empty)
        ));
    }

    #[test]
    fn texel_out_of_bounds_is_none() {
        assert_eq!(checkerboard().texel(2, 0), None);
        assert_eq!(DecodedImage::solid([1, 2, 3, 4]).texel(0, 0), Some([1, 2, 3, 4]));
    }

    #[test]
    fn config_defaults_fill_missing_keys() {
        let cfg: RendererConfig = toml::from_str("enable_validation = true").unwrap();
        assert!(cfg.enable_validation);
        assert_eq!(cfg.texture, "texture.png");
        assert_eq!(cfg.vertex_shader, "shaders/shader.vert.spv");
        assert_eq!(cfg.clear_color, [0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn empty_size_detection() {
        assert!(RenderSize { width: 0, height: 10 }.is_empty());
        assert!(!RenderSize { width: 1, height: 1 }.is_empty());
    }
}
