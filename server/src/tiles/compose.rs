//! Tile raster composition and encoding

use bytes::Bytes;
use image::codecs::png::PngEncoder;
use image::{ImageEncoder, RgbaImage, imageops};

use super::cache::Tile;
use super::types::TileError;

/// Transparent square raster that dots are composited onto.
pub struct TileCanvas {
    image: RgbaImage,
}

impl TileCanvas {
    pub fn new(size_px: u32) -> Self {
        Self {
            image: RgbaImage::new(size_px, size_px),
        }
    }

    pub fn size(&self) -> u32 {
        self.image.width()
    }

    /// Composite `dot` centered on the normalized tile position. Parts of
    /// the dot falling outside the tile are clipped.
    pub fn draw_dot(&mut self, dot: &RgbaImage, x_norm: f64, y_norm: f64) {
        let size = self.size() as f64;
        let left = (x_norm * size).round() as i64 - (dot.width() / 2) as i64;
        let top = (y_norm * size).round() as i64 - (dot.height() / 2) as i64;
        imageops::overlay(&mut self.image, dot, left, top);
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    /// Encode the raster as PNG.
    pub fn encode(self) -> Result<Tile, TileError> {
        let (width, height) = self.image.dimensions();
        let mut buffer = Vec::new();
        PngEncoder::new(&mut buffer)
            .write_image(
                self.image.as_raw(),
                width,
                height,
                image::ExtendedColorType::Rgba8,
            )
            .map_err(|e| TileError::Encode(format!("PNG encoding failed: {}", e)))?;

        Ok(Tile {
            data: Bytes::from(buffer),
            width,
            height,
        })
    }
}
